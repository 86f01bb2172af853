//! Durable storage: numbered files, command logs, snapshots and recovery.

pub mod command_log;
pub mod file_service;
pub mod logger;
pub mod marshaller;
pub mod numbered_file;
pub mod recovery;
pub mod snapshot;

pub use command_log::{CommandLog, LogReader, LogRecord};
pub use file_service::{FileService, InMemoryFileService, OsFileService, SyncWrite};
pub use logger::Logger;
pub use marshaller::{Json, Marshaller, MessagePack};
pub use numbered_file::{FILE_COUNTER_SIZE, FileKind, NumberedFile};
pub use recovery::{LogReplay, Recoverer, RecoveryReport};
pub use snapshot::Snapshotter;
