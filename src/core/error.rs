use std::path::PathBuf;
use thiserror::Error;

/// Error type produced by a command's or query's own logic.
pub type CommandError = anyhow::Error;

#[derive(Error, Debug)]
pub enum PrevalenceError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Prevalence kernel is closed")]
    Closed,

    /// A command log write failed, so the log's tail is unknown. The
    /// in-memory system may no longer match the disk; reopen the store.
    #[error("Prevalence kernel halted after a failed log write: {0}")]
    Halted(String),

    #[error("Command '{kind}' failed: {source}")]
    CommandExecution {
        kind: String,
        #[source]
        source: CommandError,
    },

    #[error("Corrupt prevalence store at '{}': {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock error: {0}")]
    LockPoisoned(String),

    #[error("Sanity check failed: {0}")]
    SanityCheckFailed(String),
}

impl PrevalenceError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors after which the store must not be trusted without
    /// operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. }
                | Self::Halted(_)
                | Self::SanityCheckFailed(_)
                | Self::LockPoisoned(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PrevalenceError>;

impl<T> From<std::sync::PoisonError<T>> for PrevalenceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned(err.to_string())
    }
}
