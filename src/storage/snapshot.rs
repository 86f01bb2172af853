use super::file_service::{FileService, SyncWrite};
use super::marshaller::Marshaller;
use super::numbered_file::{self, FileKind, NumberedFile};
use crate::core::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Writes full snapshots of the system.
///
/// A snapshot is written to `<name>.tmp`, flushed, fsynced and then renamed
/// to `<name>`. Recovery only ever sees renamed files, so a crash before the
/// rename leaves a stray temporary file and nothing else.
pub struct Snapshotter<M: Marshaller> {
    directory: PathBuf,
    marshaller: Arc<M>,
    file_service: Arc<dyn FileService>,
}

impl<M: Marshaller> Snapshotter<M> {
    pub fn new(directory: &Path, marshaller: Arc<M>, file_service: Arc<dyn FileService>) -> Self {
        Self {
            directory: directory.to_path_buf(),
            marshaller,
            file_service,
        }
    }

    /// Writes `system` as the next snapshot and returns its final path.
    pub fn take<S: Serialize + ?Sized>(&self, system: &S) -> Result<PathBuf> {
        let id = numbered_file::highest_id(self.file_service.as_ref(), &self.directory, FileKind::Snapshot)? + 1;
        let numbered = NumberedFile::new(&self.directory, FileKind::Snapshot, id);
        let span = info_span!("snapshot", snapshot_id = id);
        let _guard = span.enter();

        let tmp_path = numbered.tmp_path();
        let path = numbered.path();
        // Left behind by a crash mid-snapshot; appending to it would corrupt the new one.
        if self.file_service.exists(&tmp_path) {
            self.file_service.remove(&tmp_path)?;
        }
        {
            let mut sink = self.file_service.open_for_append(&tmp_path)?;
            self.marshaller.dump(system, &mut sink)?;
            sink.flush()?;
            sink.sync()?;
        }
        self.file_service.rename(&tmp_path, &path)?;
        self.file_service.sync_directory(&self.directory)?;

        event!(Level::INFO, path = %path.display(), "snapshot written");
        Ok(path)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
