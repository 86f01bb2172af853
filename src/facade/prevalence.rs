//! The prevalence kernel: the one object callers talk to.
//!
//! Commands are written to the command log before they touch the system, so
//! every change the caller has seen survives a crash. Queries never touch
//! the disk. A single reader-writer lock gives commands, snapshots and close
//! exclusive access and lets queries run side by side.

use super::config::PrevalenceConfig;
use crate::core::{Command, PrevalenceError, Query, Result, System};
use crate::executor::{CommandRegistry, Executer};
use crate::sanity::SanityCheck;
use crate::storage::{
    FileService, Logger, Marshaller, MessagePack, OsFileService, Recoverer, RecoveryReport,
    Snapshotter,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, info_span};

/// Everything the lock guards.
struct KernelState<S: System, M: Marshaller> {
    executer: Executer<S>,
    logger: Logger<M>,
    snapshotter: Snapshotter<M>,
    closed: bool,
    /// Set when a log write failed; the reason is repeated to later callers.
    halted: Option<String>,
}

impl<S: System, M: Marshaller> KernelState<S, M> {
    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(PrevalenceError::Closed);
        }
        match &self.halted {
            Some(reason) => Err(PrevalenceError::Halted(reason.clone())),
            None => Ok(()),
        }
    }
}

pub struct Prevalence<S: System, M: Marshaller = MessagePack> {
    state: RwLock<KernelState<S, M>>,
    registry: CommandRegistry<S, M>,
    marshaller: Arc<M>,
    directory: PathBuf,
    recovery_report: RecoveryReport,
}

impl<S: System> Prevalence<S, MessagePack> {
    /// Opens (or creates) the store in `config.directory` with the default
    /// MessagePack marshaller on the real filesystem.
    ///
    /// `system_constructor` is only called when no snapshot exists yet.
    pub fn open<F>(config: PrevalenceConfig<S::Context>, system_constructor: F) -> Result<Self>
    where
        F: FnOnce() -> S,
    {
        Self::open_with(config, MessagePack, Arc::new(OsFileService), system_constructor)
    }

    pub fn builder(config: PrevalenceConfig<S::Context>) -> PrevalenceBuilder<S, MessagePack> {
        PrevalenceBuilder::new(config)
    }
}

impl<S: System, M: Marshaller> Prevalence<S, M> {
    pub fn open_with<F>(
        config: PrevalenceConfig<S::Context>,
        marshaller: M,
        file_service: Arc<dyn FileService>,
        system_constructor: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> S,
    {
        let mut registry = CommandRegistry::new();
        S::register_commands(&mut registry)?;
        let sanity_check = Arc::clone(SanityCheck::global());
        Self::boot(config, marshaller, file_service, registry, &sanity_check, system_constructor)
    }

    fn boot<F>(
        config: PrevalenceConfig<S::Context>,
        marshaller: M,
        file_service: Arc<dyn FileService>,
        registry: CommandRegistry<S, M>,
        sanity_check: &SanityCheck,
        system_constructor: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> S,
    {
        let PrevalenceConfig {
            directory,
            context,
            skip_sanity_check,
        } = config;
        let span = info_span!("open", directory = %directory.display(), marshaller = marshaller.name());
        let _guard = span.enter();

        if !skip_sanity_check {
            sanity_check.run_once(&marshaller)?;
        }

        let marshaller = Arc::new(marshaller);
        let logger = Logger::new(&directory, Arc::clone(&marshaller), Arc::clone(&file_service))?;
        let snapshotter = Snapshotter::new(&directory, Arc::clone(&marshaller), Arc::clone(&file_service));
        let recoverer = Recoverer::new(&directory, Arc::clone(&marshaller), file_service);

        let snapshot_id = recoverer.latest_snapshot_id()?;
        let system = recoverer.recover_snapshot(system_constructor)?;
        let mut executer = Executer::new(system, context);
        let replay = recoverer.recover_logs(&mut executer, &registry)?;

        let recovery_report = RecoveryReport {
            snapshot_id,
            log_files: replay.log_files,
            records_replayed: replay.records_replayed,
            failures: replay.failures,
        };
        info!(
            snapshot_id = ?recovery_report.snapshot_id,
            records = recovery_report.records_replayed,
            failures = recovery_report.failures.len(),
            "prevalence kernel open"
        );

        Ok(Self {
            state: RwLock::new(KernelState {
                executer,
                logger,
                snapshotter,
                closed: false,
                halted: None,
            }),
            registry,
            marshaller,
            directory,
            recovery_report,
        })
    }

    // ========================================================================
    // Commands and queries
    // ========================================================================

    /// Logs `command` durably, then applies it to the system.
    ///
    /// If the command itself fails the record is already in the log and will
    /// fail the same way on replay, where the error is swallowed.
    ///
    /// If the log write fails, the command is not applied and its record may
    /// or may not be on disk. The kernel halts: this call returns the write
    /// error and every later operation returns [`PrevalenceError::Halted`].
    /// Reopening the store rebuilds the system from what reached the disk.
    pub fn execute_command<C: Command<S>>(&self, command: C) -> Result<C::Output> {
        self.registry.validate::<C>()?;

        let mut state = self.state.write()?;
        state.ensure_usable()?;
        let record = self.registry.encode(&self.marshaller, &command)?;
        if let Err(err) = state.logger.store(record) {
            state.logger.abandon();
            error!(kind = C::KIND, error = %err, "command log write failed, kernel halted");
            state.halted = Some(err.to_string());
            return Err(err);
        }
        debug!(kind = C::KIND, "command logged");
        state.executer.execute(&command)
    }

    /// Runs `query` under the shared lock. Nothing is logged.
    pub fn execute_query<Q: Query<S>>(&self, query: Q) -> Result<Q::Output> {
        let state = self.state.read()?;
        state.ensure_usable()?;
        state.executer.query(&query)
    }

    /// Closure form of [`execute_query`](Self::execute_query).
    pub fn read<T, F>(&self, reader: F) -> Result<T>
    where
        F: FnOnce(&S, &S::Context) -> T,
    {
        let state = self.state.read()?;
        state.ensure_usable()?;
        Ok(reader(state.executer.system(), state.executer.context()))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Writes a snapshot of the current system and deletes the command logs
    /// it subsumes. Returns the snapshot path.
    pub fn take_snapshot(&self) -> Result<PathBuf> {
        let mut guard = self.state.write()?;
        guard.ensure_usable()?;
        let state = &mut *guard;
        state.logger.close()?;
        let path = state.snapshotter.take(state.executer.system())?;
        state.logger.reset()?;
        Ok(path)
    }

    /// Closes the kernel. Later calls return [`PrevalenceError::Closed`]
    /// without touching the disk. Closing twice is allowed, and so is
    /// closing a halted kernel.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write()?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.logger.close()?;
        debug!(directory = %self.directory.display(), "prevalence kernel closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().map(|state| state.closed).unwrap_or(true)
    }

    /// True once a failed log write has halted the kernel.
    pub fn is_halted(&self) -> bool {
        self.state.read().map(|state| state.halted.is_some()).unwrap_or(true)
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Id of the command log currently open for writing, if any.
    pub fn current_log_id(&self) -> Result<Option<u64>> {
        Ok(self.state.read()?.logger.current_log_id())
    }

    pub fn registry(&self) -> &CommandRegistry<S, M> {
        &self.registry
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Opens a kernel with extra commands, a non-default marshaller or a custom
/// file service.
///
/// ```no_run
/// # use rustprevalent::{PrevalenceBuilder, PrevalenceConfig, System};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Default, Serialize, Deserialize)]
/// # struct Bank;
/// # impl System for Bank { type Context = (); }
/// let kernel = PrevalenceBuilder::new(PrevalenceConfig::new("/var/lib/bank"))
///     .open(Bank::default)?;
/// # Ok::<(), rustprevalent::PrevalenceError>(())
/// ```
pub struct PrevalenceBuilder<S: System, M: Marshaller = MessagePack> {
    config: PrevalenceConfig<S::Context>,
    marshaller: M,
    file_service: Arc<dyn FileService>,
    registry: CommandRegistry<S, M>,
    sanity_check: Arc<SanityCheck>,
    /// First registration error; reported by `open`.
    error: Option<PrevalenceError>,
}

impl<S: System> PrevalenceBuilder<S, MessagePack> {
    pub fn new(config: PrevalenceConfig<S::Context>) -> Self {
        Self::with_marshaller(config, MessagePack)
    }
}

impl<S: System, M: Marshaller> PrevalenceBuilder<S, M> {
    /// Starts a builder for a store written with `marshaller`.
    pub fn with_marshaller(config: PrevalenceConfig<S::Context>, marshaller: M) -> Self {
        let mut registry = CommandRegistry::new();
        let error = S::register_commands(&mut registry).err();
        Self {
            config,
            marshaller,
            file_service: Arc::new(OsFileService),
            registry,
            sanity_check: Arc::clone(SanityCheck::global()),
            error,
        }
    }

    /// Registers one more marshalled command type.
    pub fn command<C>(mut self) -> Self
    where
        C: Command<S> + Serialize + DeserializeOwned,
    {
        if let Err(err) = self.registry.register::<C>() {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Registers one more command type that encodes itself.
    pub fn custom_command<C: Command<S>>(mut self) -> Self {
        if let Err(err) = self.registry.register_custom::<C>() {
            self.error.get_or_insert(err);
        }
        self
    }

    pub fn file_service(mut self, file_service: Arc<dyn FileService>) -> Self {
        self.file_service = file_service;
        self
    }

    /// Use `sanity_check` instead of the process-wide instance.
    pub fn sanity_check(mut self, sanity_check: Arc<SanityCheck>) -> Self {
        self.sanity_check = sanity_check;
        self
    }

    pub fn open<F>(self, system_constructor: F) -> Result<Prevalence<S, M>>
    where
        F: FnOnce() -> S,
    {
        if let Some(err) = self.error {
            return Err(err);
        }
        Prevalence::boot(
            self.config,
            self.marshaller,
            self.file_service,
            self.registry,
            &self.sanity_check,
            system_constructor,
        )
    }
}
