//! Append-only command log for one generation

use super::file_service::{FileService, SyncWrite};
use super::marshaller::Marshaller;
use super::numbered_file::{self, FileKind, NumberedFile};
use crate::core::{PrevalenceError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Log Record
// ============================================================================

/// Envelope written to the log for every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// In-memory only: lets the logger collapse runs of clock ticks.
    #[serde(skip)]
    pub coalescible: bool,
}

impl LogRecord {
    pub fn new(kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            coalescible: false,
        }
    }

    pub fn coalescible(mut self, coalescible: bool) -> Self {
        self.coalescible = coalescible;
        self
    }
}

// ============================================================================
// Command Log
// ============================================================================

pub struct CommandLog<M: Marshaller> {
    id: u64,
    path: PathBuf,
    file: Option<Box<dyn SyncWrite>>,
    marshaller: Arc<M>,
}

impl<M: Marshaller> CommandLog<M> {
    /// Opens a new generation with id one above the highest log in `directory`.
    pub fn create(
        directory: &Path,
        marshaller: Arc<M>,
        file_service: &dyn FileService,
    ) -> Result<Self> {
        Self::create_after(directory, 0, marshaller, file_service)
    }

    /// Like [`create`](Self::create), but never picks an id at or below `floor`
    /// even when the logs that used those ids have been deleted.
    pub fn create_after(
        directory: &Path,
        floor: u64,
        marshaller: Arc<M>,
        file_service: &dyn FileService,
    ) -> Result<Self> {
        let highest = numbered_file::highest_id(file_service, directory, FileKind::CommandLog)?;
        let id = highest.max(floor) + 1;
        let path = NumberedFile::new(directory, FileKind::CommandLog, id).path();
        let file = file_service.open_for_append(&path)?;
        debug!(log_id = id, path = %path.display(), "opened command log");
        Ok(Self {
            id,
            path,
            file: Some(file),
            marshaller,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Durably appends one record.
    ///
    /// The record is fully serialized before the first byte reaches the file,
    /// so a serialization failure leaves the log untouched.
    pub fn store(&mut self, record: &LogRecord) -> Result<()> {
        let buffer = self.marshaller.to_bytes(record)?;
        let file = self.file.as_mut().ok_or_else(|| {
            PrevalenceError::Io(io::Error::other(format!(
                "command log {} is closed",
                self.path.display()
            )))
        })?;
        file.write_all(&buffer)?;
        file.flush()?;
        file.sync()?;
        debug!(log_id = self.id, kind = %record.kind, bytes = buffer.len(), "stored command");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            debug!(log_id = self.id, "closed command log");
        }
        Ok(())
    }

    /// Names of every command log in `directory`, in replay order.
    pub fn log_file_names(file_service: &dyn FileService, directory: &Path) -> Result<Vec<String>> {
        numbered_file::matching_names(file_service, directory, FileKind::CommandLog)
    }
}

// ============================================================================
// Log Reader
// ============================================================================

/// Sequentially decodes the records of one log file until end of stream.
///
/// Any record that fails to decode, including a truncated trailing record,
/// yields a [`PrevalenceError::Corruption`].
pub struct LogReader<'m, M: Marshaller> {
    path: PathBuf,
    reader: BufReader<Box<dyn Read + Send>>,
    marshaller: &'m M,
    position: usize,
    failed: bool,
}

impl<'m, M: Marshaller> LogReader<'m, M> {
    pub fn open(file_service: &dyn FileService, path: &Path, marshaller: &'m M) -> Result<Self> {
        let source = file_service.open_for_read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(source),
            marshaller,
            position: 0,
            failed: false,
        })
    }

    /// Index of the next record to be read.
    pub fn position(&self) -> usize {
        self.position
    }

    fn read_next(&mut self) -> Result<Option<LogRecord>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let record = self
            .marshaller
            .load::<LogRecord>(&mut self.reader)
            .map_err(|e| {
                PrevalenceError::corruption(
                    &self.path,
                    format!("record {}: {}", self.position, e),
                )
            })?;
        self.position += 1;
        Ok(Some(record))
    }
}

impl<M: Marshaller> Iterator for LogReader<'_, M> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.read_next();
        if next.is_err() {
            self.failed = true;
        }
        next.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_service::InMemoryFileService;
    use crate::storage::marshaller::MessagePack;

    fn some_path() -> PathBuf {
        PathBuf::from("/some/path")
    }

    #[test]
    fn test_file_opening_picks_next_id() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.put(dir.join("000000000000000000001.command_log"), Vec::new());
        fs.put(dir.join("000000000000000000003.command_log"), Vec::new());
        fs.put(dir.join("000000000000000000002.command_log"), Vec::new());

        let log = CommandLog::create(&dir, Arc::new(MessagePack), &fs).unwrap();
        assert_eq!(log.id(), 4);
        assert_eq!(log.path(), dir.join("000000000000000000004.command_log"));
        assert!(fs.exists(log.path()));
    }

    #[test]
    fn test_create_after_respects_floor() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.put(dir.join("000000000000000000002.command_log"), Vec::new());

        let log = CommandLog::create_after(&dir, 7, Arc::new(MessagePack), &fs).unwrap();
        assert_eq!(log.id(), 8);
        let log = CommandLog::create_after(&dir, 1, Arc::new(MessagePack), &fs).unwrap();
        assert_eq!(log.id(), 9);
    }

    #[test]
    fn test_log_file_names_sorted() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.put(dir.join("000000000000000000010.command_log"), Vec::new());
        fs.put(dir.join("000000000000000000002.command_log"), Vec::new());
        fs.put(dir.join("000000000000000000001.snapshot"), Vec::new());
        fs.put(dir.join("junk.command_log"), Vec::new());

        let names = CommandLog::<MessagePack>::log_file_names(&fs, &dir).unwrap();
        assert_eq!(
            names,
            vec![
                "000000000000000000002.command_log".to_string(),
                "000000000000000000010.command_log".to_string(),
            ]
        );
    }

    #[test]
    fn test_writing_command_flushes_and_syncs() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.create_dir_all(&dir).unwrap();

        let mut log = CommandLog::create(&dir, Arc::new(MessagePack), &fs).unwrap();
        let record = LogRecord::new("add", vec![1, 2, 3, 4]);
        log.store(&record).unwrap();
        log.store(&LogRecord::new("add", vec![5])).unwrap();

        assert_eq!(fs.sync_count(), 2);
        let records: Vec<LogRecord> = LogReader::open(&fs, log.path(), &MessagePack)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record);
        assert_eq!(records[1].payload, vec![5]);
    }

    struct ExplodingMarshaller;

    impl Marshaller for ExplodingMarshaller {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn dump<T: Serialize + ?Sized>(&self, value: &T, sink: &mut dyn Write) -> Result<()> {
            // Large enough that a streaming writer would already have written.
            sink.write_all(&[b'x'; 5000])?;
            let _ = value;
            Err(PrevalenceError::Serialization("exploded".to_string()))
        }

        fn load<T: serde::de::DeserializeOwned>(&self, _source: &mut dyn Read) -> Result<T> {
            Err(PrevalenceError::Serialization("exploded".to_string()))
        }
    }

    #[test]
    fn test_failure_during_marshalling_writes_nothing_to_log() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.create_dir_all(&dir).unwrap();

        let mut log = CommandLog::create(&dir, Arc::new(ExplodingMarshaller), &fs).unwrap();
        let result = log.store(&LogRecord::new("boom", Vec::new()));

        assert!(matches!(result, Err(PrevalenceError::Serialization(_))));
        assert_eq!(fs.write_count(), 0);
        assert_eq!(fs.contents(log.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_sync_failure_propagates() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.create_dir_all(&dir).unwrap();
        let mut log = CommandLog::create(&dir, Arc::new(MessagePack), &fs).unwrap();

        fs.fail_syncs(true);
        let result = log.store(&LogRecord::new("add", vec![1]));
        assert!(matches!(result, Err(PrevalenceError::Io(_))));
    }

    #[test]
    fn test_store_after_close_fails() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        fs.create_dir_all(&dir).unwrap();
        let mut log = CommandLog::create(&dir, Arc::new(MessagePack), &fs).unwrap();

        log.close().unwrap();
        log.close().unwrap();
        assert!(!log.is_open());
        assert!(log.store(&LogRecord::new("add", vec![1])).is_err());
    }

    #[test]
    fn test_reader_reports_truncated_tail_as_corruption() {
        let fs = InMemoryFileService::new();
        let dir = some_path();
        let mut bytes = MessagePack.to_bytes(&LogRecord::new("add", vec![9; 16])).unwrap();
        let second = MessagePack.to_bytes(&LogRecord::new("add", vec![7; 16])).unwrap();
        bytes.extend_from_slice(&second[..second.len() - 4]);
        let path = dir.join("000000000000000000001.command_log");
        fs.put(path.clone(), bytes);

        let mut reader = LogReader::open(&fs, &path, &MessagePack).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(PrevalenceError::Corruption { .. }))
        ));
        assert!(reader.next().is_none());
    }
}
