use crate::core::{Command, CommandError, PrevalenceError, Query, Result, System};
use serde::Serialize;
use tracing::warn;

/// Type-erased command as decoded from a log record.
pub trait Replayable<S: System>: Send {
    fn kind(&self) -> &'static str;

    fn replay(&self, system: &mut S, context: &S::Context) -> std::result::Result<(), CommandError>;
}

impl<S: System, C: Command<S>> Replayable<S> for C {
    fn kind(&self) -> &'static str {
        C::KIND
    }

    fn replay(&self, system: &mut S, context: &S::Context) -> std::result::Result<(), CommandError> {
        self.execute(system, context).map(|_| ())
    }
}

/// A command error swallowed during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub log_id: u64,
    /// Index of the record within its log file.
    pub position: usize,
    pub kind: String,
    pub message: String,
}

/// Applies commands and queries to the system it owns.
pub struct Executer<S: System> {
    system: S,
    context: S::Context,
}

impl<S: System> Executer<S> {
    pub fn new(system: S, context: S::Context) -> Self {
        Self { system, context }
    }

    /// Runs a command. Its error always propagates.
    pub fn execute<C: Command<S>>(&mut self, command: &C) -> Result<C::Output> {
        command
            .execute(&mut self.system, &self.context)
            .map_err(|source| PrevalenceError::CommandExecution {
                kind: C::KIND.to_string(),
                source,
            })
    }

    pub fn query<Q: Query<S>>(&self, query: &Q) -> Result<Q::Output> {
        query
            .query(&self.system, &self.context)
            .map_err(|source| PrevalenceError::CommandExecution {
                kind: std::any::type_name::<Q>().to_string(),
                source,
            })
    }

    /// Runs `block` in recovery mode.
    ///
    /// Commands replayed through the [`RecoveryScope`] may fail because they
    /// depended on environment state that cannot be reproduced; such errors
    /// are logged and collected instead of aborting recovery. Errors returned
    /// by `block` itself (I/O, corruption) still propagate. Recovery mode ends
    /// when `block` returns.
    pub fn recovery<T, F>(&mut self, block: F) -> Result<(T, Vec<ReplayFailure>)>
    where
        F: FnOnce(&mut RecoveryScope<'_, S>) -> Result<T>,
    {
        let mut scope = RecoveryScope {
            executer: self,
            failures: Vec::new(),
        };
        let value = block(&mut scope)?;
        Ok((value, scope.failures))
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut S {
        &mut self.system
    }

    pub fn context(&self) -> &S::Context {
        &self.context
    }

    pub fn into_system(self) -> S {
        self.system
    }
}

pub struct RecoveryScope<'a, S: System> {
    executer: &'a mut Executer<S>,
    failures: Vec<ReplayFailure>,
}

impl<S: System> RecoveryScope<'_, S> {
    /// Replays one logged command, swallowing its error.
    pub fn replay(&mut self, command: &dyn Replayable<S>, log_id: u64, position: usize) {
        let executer = &mut *self.executer;
        if let Err(err) = command.replay(&mut executer.system, &executer.context) {
            warn!(
                log_id,
                position,
                kind = command.kind(),
                error = %err,
                "command failed during replay; continuing recovery"
            );
            self.failures.push(ReplayFailure {
                log_id,
                position,
                kind: command.kind().to_string(),
                message: format!("{:#}", err),
            });
        }
    }

    pub fn failures(&self) -> &[ReplayFailure] {
        &self.failures
    }

    pub fn system(&self) -> &S {
        &self.executer.system
    }
}
