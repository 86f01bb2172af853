//! Canonical names for numbered log and snapshot files

use super::file_service::FileService;
use crate::core::Result;
use std::path::{Path, PathBuf};

/// Width of the zero-padded id in every numbered file name.
///
/// `u64::MAX` has 20 decimal digits, so a `u64` id always fits.
pub const FILE_COUNTER_SIZE: usize = 21;

pub const TMP_SUFFIX: &str = "tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    CommandLog,
    Snapshot,
}

impl FileKind {
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::CommandLog => "command_log",
            FileKind::Snapshot => "snapshot",
        }
    }
}

/// A `(directory, kind, id)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedFile {
    directory: PathBuf,
    kind: FileKind,
    id: u64,
}

impl NumberedFile {
    pub fn new<P: AsRef<Path>>(directory: P, kind: FileKind, id: u64) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            kind,
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn file_name(&self) -> String {
        file_name(self.kind, self.id)
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }

    /// Transient name a snapshot is written under before its rename.
    pub fn tmp_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.file_name(), TMP_SUFFIX))
    }
}

pub fn file_name(kind: FileKind, id: u64) -> String {
    format!(
        "{:0width$}.{}",
        id,
        kind.extension(),
        width = FILE_COUNTER_SIZE
    )
}

/// Returns the id of `name` if it is exactly `FILE_COUNTER_SIZE` digits
/// followed by `.` and the kind's extension.
pub fn parse_id(name: &str, kind: FileKind) -> Option<u64> {
    let (digits, extension) = name.split_once('.')?;
    if extension != kind.extension() || digits.len() != FILE_COUNTER_SIZE {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Entries of `directory` that are numbered files of `kind`, sorted by id.
pub fn matching_names(
    file_service: &dyn FileService,
    directory: &Path,
    kind: FileKind,
) -> Result<Vec<String>> {
    if !file_service.exists(directory) {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = file_service
        .list_entries(directory)?
        .into_iter()
        .filter(|name| parse_id(name, kind).is_some())
        .collect();
    // Fixed-width padding makes lexicographic order numeric order.
    names.sort();
    Ok(names)
}

/// Highest id of `kind` present in `directory`, or 0 when there is none.
pub fn highest_id(file_service: &dyn FileService, directory: &Path, kind: FileKind) -> Result<u64> {
    Ok(matching_names(file_service, directory, kind)?
        .iter()
        .filter_map(|name| parse_id(name, kind))
        .max()
        .unwrap_or(0))
}
