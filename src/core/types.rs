use super::error::{CommandError, Result};
use crate::executor::CommandRegistry;
use crate::storage::Marshaller;
use serde::Serialize;
use serde::de::DeserializeOwned;

// ============================================================================
// Prevalent System
// ============================================================================

/// The application's in-memory object graph.
///
/// A system is owned by exactly one [`Prevalence`](crate::Prevalence) kernel,
/// is only mutated by commands, and is written whole into snapshots.
pub trait System: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Value handed unchanged to every command and query, supplied once when
    /// the kernel is opened. Use `()` when nothing needs injecting.
    type Context: Send + Sync + 'static;

    /// Registers the commands this system accepts. Only registered commands
    /// can be executed, since only they can be decoded again on replay.
    fn register_commands<M: Marshaller>(commands: &mut CommandRegistry<Self, M>) -> Result<()> {
        let _ = commands;
        Ok(())
    }
}

// ============================================================================
// Commands and Queries
// ============================================================================

/// A logged, replayable state mutation.
///
/// The kernel stores the command durably before calling [`execute`](Self::execute),
/// and calls it again during recovery, so `execute` must be deterministic with
/// respect to the system state and the command's own data.
///
/// Commands that go through the marshaller also need `Serialize` and
/// `DeserializeOwned` and are registered with
/// [`CommandRegistry::register`]. Commands with a custom codec need neither
/// and are registered with [`CommandRegistry::register_custom`].
pub trait Command<S: System>: Send + Sync + 'static {
    type Output;

    /// Stable name written to the log next to the payload. Replay looks the
    /// decoder up by this name, so it must not change once records exist.
    const KIND: &'static str;

    fn execute(&self, system: &mut S, context: &S::Context)
    -> std::result::Result<Self::Output, CommandError>;

    /// Custom (de)serialization hooks. The default defers to the marshaller.
    fn codec() -> CodecHooks<Self>
    where
        Self: Sized,
    {
        CodecHooks::marshalled()
    }

    /// Coalescible commands (clock ticks) may be collapsed by the logger: only
    /// the last one before the next regular command reaches the disk.
    fn is_coalescible(&self) -> bool {
        false
    }
}

/// A read-only operation. Never logged, runs under the shared lock.
///
/// Queries receive `&S`; mutating through interior mutability breaks replay
/// and is not detected.
pub trait Query<S: System> {
    type Output;

    fn query(&self, system: &S, context: &S::Context)
    -> std::result::Result<Self::Output, CommandError>;
}

// ============================================================================
// Custom Codecs
// ============================================================================

/// Commands that encode themselves instead of going through the marshaller.
pub trait CustomCodec: Sized {
    fn marshal_dump(&self) -> Result<Vec<u8>>;
    fn marshal_load(bytes: &[u8]) -> Result<Self>;
}

pub type DumpFn<C> = fn(&C) -> Result<Vec<u8>>;
pub type LoadFn<C> = fn(&[u8]) -> Result<C>;

/// Capability table a command type declares for its log payload.
///
/// Either both hooks are present (custom codec) or neither (marshaller).
/// A half-declared codec is rejected as an invalid command.
pub struct CodecHooks<C> {
    pub dump: Option<DumpFn<C>>,
    pub load: Option<LoadFn<C>>,
}

impl<C> CodecHooks<C> {
    pub fn marshalled() -> Self {
        Self {
            dump: None,
            load: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.dump.is_some() || self.load.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.dump.is_some() == self.load.is_some()
    }
}

impl<C: CustomCodec> CodecHooks<C> {
    pub fn custom() -> Self {
        Self {
            dump: Some(C::marshal_dump),
            load: Some(C::marshal_load),
        }
    }
}

impl<C> Clone for CodecHooks<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for CodecHooks<C> {}

impl<C> std::fmt::Debug for CodecHooks<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecHooks")
            .field("dump", &self.dump.is_some())
            .field("load", &self.load.is_some())
            .finish()
    }
}
