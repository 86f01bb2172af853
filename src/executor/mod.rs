pub mod executer;
pub mod registry;

pub use executer::{Executer, RecoveryScope, ReplayFailure, Replayable};
pub use registry::CommandRegistry;
