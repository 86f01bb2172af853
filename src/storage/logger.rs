use super::command_log::{CommandLog, LogRecord};
use super::file_service::FileService;
use super::marshaller::Marshaller;
use crate::core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Owns the currently open command log, if any.
///
/// A log is opened lazily on the first physical write after startup or
/// after [`reset`](Self::reset), so every generation gets a fresh id.
pub struct Logger<M: Marshaller> {
    directory: PathBuf,
    marshaller: Arc<M>,
    file_service: Arc<dyn FileService>,
    log: Option<CommandLog<M>>,
    /// Last coalescible record not yet written.
    pending: Option<LogRecord>,
    /// Highest log id this logger has opened; ids are never reused after a reset.
    last_log_id: u64,
}

impl<M: Marshaller> Logger<M> {
    pub fn new(
        directory: &Path,
        marshaller: Arc<M>,
        file_service: Arc<dyn FileService>,
    ) -> Result<Self> {
        if !file_service.exists(directory) {
            file_service.create_dir_all(directory)?;
        }
        Ok(Self {
            directory: directory.to_path_buf(),
            marshaller,
            file_service,
            log: None,
            pending: None,
            last_log_id: 0,
        })
    }

    /// Stores a record durably, or buffers it if it is coalescible.
    ///
    /// A buffered coalescible record replaces the previous one and is written
    /// just before the next regular record. It stays pending until that
    /// write succeeds.
    pub fn store(&mut self, record: LogRecord) -> Result<()> {
        if record.coalescible {
            self.pending = Some(record);
            return Ok(());
        }
        if let Some(pending) = &self.pending {
            let pending = pending.clone();
            self.internal_store(&pending)?;
            self.pending = None;
        }
        self.internal_store(&record)
    }

    fn internal_store(&mut self, record: &LogRecord) -> Result<()> {
        let log = match self.log.as_mut() {
            Some(log) => log,
            None => {
                let log = CommandLog::create_after(
                    &self.directory,
                    self.last_log_id,
                    Arc::clone(&self.marshaller),
                    self.file_service.as_ref(),
                )?;
                self.last_log_id = log.id();
                self.log.insert(log)
            }
        };
        log.store(record)
    }

    /// Closes the current log and deletes every command log in the directory.
    ///
    /// Only valid once the state those logs describe is in a durable snapshot.
    pub fn reset(&mut self) -> Result<()> {
        self.close()?;
        let names = CommandLog::<M>::log_file_names(self.file_service.as_ref(), &self.directory)?;
        for name in &names {
            self.file_service.remove(&self.directory.join(name))?;
        }
        debug!(deleted = names.len(), directory = %self.directory.display(), "reset command logs");
        Ok(())
    }

    /// Closes the current log. A pending coalescible record is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.pending = None;
        if let Some(mut log) = self.log.take() {
            log.close()?;
        }
        Ok(())
    }

    /// Drops the open log and the pending record.
    ///
    /// Used after a failed write: the log's tail is unknown, so nothing more
    /// may be appended to that generation.
    pub fn abandon(&mut self) {
        self.pending = None;
        if let Some(log) = self.log.take() {
            debug!(log_id = log.id(), "abandoned command log");
        }
    }

    pub fn current_log_id(&self) -> Option<u64> {
        self.log.as_ref().map(CommandLog::id)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
