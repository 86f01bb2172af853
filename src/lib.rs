// ============================================================================
// RustPrevalent Library
// ============================================================================

//! Object prevalence: keep the whole system in memory, log every command
//! durably before applying it, and snapshot the system now and then.
//!
//! On open, the newest snapshot is loaded and every newer command log is
//! replayed, which rebuilds exactly the state callers had observed.
//!
//! ```no_run
//! use rustprevalent::{Command, CommandError, CommandRegistry, Marshaller, Prevalence,
//!     PrevalenceConfig, System};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Bank {
//!     balance: i64,
//! }
//!
//! impl System for Bank {
//!     type Context = ();
//!
//!     fn register_commands<M: Marshaller>(
//!         commands: &mut CommandRegistry<Self, M>,
//!     ) -> rustprevalent::Result<()> {
//!         commands.register::<Deposit>()
//!     }
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct Deposit(i64);
//!
//! impl Command<Bank> for Deposit {
//!     type Output = i64;
//!     const KIND: &'static str = "bank.deposit";
//!
//!     fn execute(&self, bank: &mut Bank, _: &()) -> Result<i64, CommandError> {
//!         bank.balance += self.0;
//!         Ok(bank.balance)
//!     }
//! }
//!
//! let bank = Prevalence::open(PrevalenceConfig::new("bank-data"), Bank::default)?;
//! bank.execute_command(Deposit(30))?;
//! bank.take_snapshot()?;
//! # Ok::<(), rustprevalent::PrevalenceError>(())
//! ```

pub mod clock;
pub mod core;
pub mod executor;
pub mod facade;
pub mod sanity;
pub mod storage;

pub use clock::{Clock, ClockedSystem, Tick, TimeActor};
pub use core::{
    CodecHooks, Command, CommandError, CustomCodec, PrevalenceError, Query, Result, System,
};
pub use executor::{CommandRegistry, ReplayFailure};
pub use facade::{Prevalence, PrevalenceBuilder, PrevalenceConfig};
pub use storage::{
    FileService, InMemoryFileService, Json, Marshaller, MessagePack, OsFileService, RecoveryReport,
};
