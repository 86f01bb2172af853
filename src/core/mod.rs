pub mod error;
pub mod types;

pub use error::{CommandError, PrevalenceError, Result};
pub use types::{CodecHooks, Command, CustomCodec, DumpFn, LoadFn, Query, System};
