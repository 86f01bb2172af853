use super::command_log::{CommandLog, LogReader};
use super::file_service::FileService;
use super::marshaller::Marshaller;
use super::numbered_file::{self, FileKind, NumberedFile};
use crate::core::{PrevalenceError, Result, System};
use crate::executor::{CommandRegistry, Executer, ReplayFailure};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// What recovery found and did when the kernel was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Snapshot the system was loaded from; `None` means it was constructed fresh.
    pub snapshot_id: Option<u64>,
    /// Log files replayed, in order.
    pub log_files: Vec<String>,
    pub records_replayed: usize,
    /// Commands whose errors were swallowed during replay.
    pub failures: Vec<ReplayFailure>,
}

/// Result of replaying the command logs.
#[derive(Debug, Clone, Default)]
pub struct LogReplay {
    pub log_files: Vec<String>,
    pub records_replayed: usize,
    pub failures: Vec<ReplayFailure>,
}

pub struct Recoverer<M: Marshaller> {
    directory: PathBuf,
    marshaller: Arc<M>,
    file_service: Arc<dyn FileService>,
}

impl<M: Marshaller> Recoverer<M> {
    pub fn new(directory: &Path, marshaller: Arc<M>, file_service: Arc<dyn FileService>) -> Self {
        Self {
            directory: directory.to_path_buf(),
            marshaller,
            file_service,
        }
    }

    pub fn latest_snapshot_id(&self) -> Result<Option<u64>> {
        let id = numbered_file::highest_id(self.file_service.as_ref(), &self.directory, FileKind::Snapshot)?;
        Ok((id > 0).then_some(id))
    }

    /// Loads the highest snapshot, or builds a fresh system when there is none.
    ///
    /// A snapshot that does not decode is fatal: the store is corrupt.
    pub fn recover_snapshot<S, F>(&self, system_constructor: F) -> Result<S>
    where
        S: DeserializeOwned,
        F: FnOnce() -> S,
    {
        let Some(id) = self.latest_snapshot_id()? else {
            event!(Level::INFO, directory = %self.directory.display(), "no snapshot, constructing new system");
            return Ok(system_constructor());
        };

        let path = NumberedFile::new(&self.directory, FileKind::Snapshot, id).path();
        let mut reader = BufReader::new(self.file_service.open_for_read(&path)?);
        let system = self
            .marshaller
            .load(&mut reader)
            .map_err(|e| PrevalenceError::corruption(&path, e))?;
        event!(Level::INFO, snapshot_id = id, "loaded snapshot");
        Ok(system)
    }

    /// Replays every command log, oldest first, in recovery mode.
    pub fn recover_logs<S: System>(
        &self,
        executer: &mut Executer<S>,
        registry: &CommandRegistry<S, M>,
    ) -> Result<LogReplay> {
        let file_service = self.file_service.as_ref();
        let log_files = CommandLog::<M>::log_file_names(file_service, &self.directory)?;
        let span = info_span!("recover_logs", logs = log_files.len());
        let _guard = span.enter();

        let (records_replayed, failures) = executer.recovery(|scope| {
            let mut replayed = 0;
            for name in &log_files {
                let path = self.directory.join(name);
                let log_id = numbered_file::parse_id(name, FileKind::CommandLog).unwrap_or_default();
                let reader = LogReader::open(file_service, &path, self.marshaller.as_ref())?;
                for (position, record) in reader.enumerate() {
                    let record = record?;
                    let command = registry
                        .decode(&self.marshaller, &record)
                        .map_err(|e| {
                            PrevalenceError::corruption(&path, format!("record {}: {}", position, e))
                        })?;
                    scope.replay(command.as_ref(), log_id, position);
                    replayed += 1;
                }
            }
            Ok(replayed)
        })?;

        event!(
            Level::INFO,
            records = records_replayed,
            failed = failures.len(),
            "command logs replayed"
        );
        Ok(LogReplay {
            log_files,
            records_replayed,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Command, CommandError};
    use crate::storage::command_log::LogRecord;
    use crate::storage::file_service::InMemoryFileService;
    use crate::storage::marshaller::MessagePack;
    use anyhow::ensure;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        total: u64,
    }

    impl System for Tally {
        type Context = ();
    }

    #[derive(Serialize, Deserialize)]
    struct Add(u64);

    impl Command<Tally> for Add {
        type Output = u64;
        const KIND: &'static str = "add";

        fn execute(&self, system: &mut Tally, _: &()) -> std::result::Result<u64, CommandError> {
            ensure!(self.0 > 0, "zero is not allowed");
            system.total += self.0;
            Ok(system.total)
        }
    }

    fn setup() -> (InMemoryFileService, Recoverer<MessagePack>, CommandRegistry<Tally, MessagePack>) {
        let fs = InMemoryFileService::new();
        fs.create_dir_all(Path::new("/store")).unwrap();
        let recoverer = Recoverer::new(Path::new("/store"), Arc::new(MessagePack), Arc::new(fs.clone()));
        let mut registry = CommandRegistry::new();
        registry.register::<Add>().unwrap();
        (fs, recoverer, registry)
    }

    fn write_log(fs: &InMemoryFileService, id: u64, values: &[u64]) {
        let mut bytes = Vec::new();
        for value in values {
            let record = LogRecord::new("add", MessagePack.to_bytes(&Add(*value)).unwrap());
            MessagePack.dump(&record, &mut bytes).unwrap();
        }
        fs.put(NumberedFile::new("/store", FileKind::CommandLog, id).path(), bytes);
    }

    #[test]
    fn test_no_snapshot_uses_constructor() {
        let (_fs, recoverer, _) = setup();
        let system: Tally = recoverer.recover_snapshot(|| Tally { total: 11 }).unwrap();
        assert_eq!(system.total, 11);
        assert_eq!(recoverer.latest_snapshot_id().unwrap(), None);
    }

    #[test]
    fn test_highest_snapshot_wins() {
        let (fs, recoverer, _) = setup();
        fs.put("/store/000000000000000000001.snapshot", MessagePack.to_bytes(&Tally { total: 1 }).unwrap());
        fs.put("/store/000000000000000000002.snapshot", MessagePack.to_bytes(&Tally { total: 2 }).unwrap());
        fs.put("/store/000000000000000000003.snapshot.tmp", vec![0xc1]);

        let system: Tally = recoverer
            .recover_snapshot(|| panic!("constructor must not run"))
            .unwrap();
        assert_eq!(system.total, 2);
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() {
        let (fs, recoverer, _) = setup();
        fs.put("/store/000000000000000000001.snapshot", vec![0xc1, 0x00]);
        let result: Result<Tally> = recoverer.recover_snapshot(Tally::default);
        let err = result.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_logs_replay_in_numeric_order_and_swallow_errors() {
        let (fs, recoverer, registry) = setup();
        write_log(&fs, 10, &[100]);
        write_log(&fs, 2, &[1, 0, 2]);

        let mut executer = Executer::new(Tally::default(), ());
        let replay = recoverer.recover_logs(&mut executer, &registry).unwrap();

        assert_eq!(executer.system().total, 103);
        assert_eq!(replay.records_replayed, 4);
        assert_eq!(
            replay.log_files,
            vec![
                "000000000000000000002.command_log".to_string(),
                "000000000000000000010.command_log".to_string(),
            ]
        );
        assert_eq!(replay.failures.len(), 1);
        assert_eq!(replay.failures[0].log_id, 2);
        assert_eq!(replay.failures[0].position, 1);
    }

    #[test]
    fn test_unknown_kind_is_corruption() {
        let (fs, recoverer, registry) = setup();
        let mut bytes = Vec::new();
        MessagePack.dump(&LogRecord::new("mystery", vec![]), &mut bytes).unwrap();
        fs.put("/store/000000000000000000001.command_log", bytes);

        let mut executer = Executer::new(Tally::default(), ());
        let err = recoverer.recover_logs(&mut executer, &registry).unwrap_err();
        assert!(matches!(err, PrevalenceError::Corruption { .. }));
    }
}
