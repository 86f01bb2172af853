//! Filesystem capability used by the log and snapshot layers.
//!
//! Everything that touches the prevalence directory goes through
//! [`FileService`], so file-selection logic can be exercised against
//! [`InMemoryFileService`] without real disk I/O.

use crate::core::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A byte sink that can be forced to stable storage.
pub trait SyncWrite: Write + Send + Sync {
    /// Flushes buffered bytes and fsyncs the underlying file.
    fn sync(&mut self) -> io::Result<()>;
}

impl SyncWrite for BufWriter<File> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_all()
    }
}

pub trait FileService: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// File names (not paths) in `directory`, in no particular order.
    fn list_entries(&self, directory: &Path) -> Result<Vec<String>>;

    /// Opens `path` for binary append, creating it if absent.
    fn open_for_append(&self, path: &Path) -> Result<Box<dyn SyncWrite>>;

    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Makes a completed rename in `directory` durable where the platform
    /// supports it.
    fn sync_directory(&self, _directory: &Path) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// OS File Service
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileService;

impl FileService for OsFileService {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_entries(&self, directory: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            // Non-UTF-8 names can never match a numbered file.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn open_for_append(&self, path: &Path) -> Result<Box<dyn SyncWrite>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self, directory: &Path) -> Result<()> {
        File::open(directory)?.sync_all()?;
        Ok(())
    }
}

// ============================================================================
// In-Memory File Service
// ============================================================================

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct MemoryCounters {
    writes: AtomicUsize,
    syncs: AtomicUsize,
    fail_syncs: AtomicBool,
}

#[derive(Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, SharedBuffer>,
    directories: BTreeSet<PathBuf>,
}

/// In-memory [`FileService`] for tests. Clones share the same tree.
#[derive(Clone, Default)]
pub struct InMemoryFileService {
    tree: Arc<Mutex<MemoryTree>>,
    counters: Arc<MemoryCounters>,
}

impl InMemoryFileService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file, registering its parent directories.
    pub fn put<P: Into<PathBuf>>(&self, path: P, contents: Vec<u8>) {
        let path = path.into();
        let mut tree = self.lock_tree();
        if let Some(parent) = path.parent() {
            register_ancestors(&mut tree.directories, parent);
        }
        tree.files.insert(path, Arc::new(Mutex::new(contents)));
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        let tree = self.lock_tree();
        let buffer = tree.files.get(path)?;
        let bytes = buffer.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Some(bytes)
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.lock_tree().files.keys().cloned().collect()
    }

    /// Number of `write` calls that carried at least one byte.
    pub fn write_count(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn sync_count(&self) -> usize {
        self.counters.syncs.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `sync` fail, as a full disk would.
    pub fn fail_syncs(&self, fail: bool) {
        self.counters.fail_syncs.store(fail, Ordering::SeqCst);
    }

    fn lock_tree(&self) -> std::sync::MutexGuard<'_, MemoryTree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn register_ancestors(directories: &mut BTreeSet<PathBuf>, directory: &Path) {
    for ancestor in directory.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        directories.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

struct MemoryFile {
    buffer: SharedBuffer,
    counters: Arc<MemoryCounters>,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.counters.writes.fetch_add(1, Ordering::SeqCst);
        }
        self.buffer
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SyncWrite for MemoryFile {
    fn sync(&mut self) -> io::Result<()> {
        if self.counters.fail_syncs.load(Ordering::SeqCst) {
            return Err(io::Error::other("simulated fsync failure"));
        }
        self.counters.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl FileService for InMemoryFileService {
    fn exists(&self, path: &Path) -> bool {
        let tree = self.lock_tree();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn list_entries(&self, directory: &Path) -> Result<Vec<String>> {
        let tree = self.lock_tree();
        if !tree.directories.contains(directory) {
            return Err(not_found(directory).into());
        }
        let names = tree
            .files
            .keys()
            .chain(tree.directories.iter())
            .filter(|path| path.parent() == Some(directory))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    fn open_for_append(&self, path: &Path) -> Result<Box<dyn SyncWrite>> {
        let mut tree = self.lock_tree();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !tree.directories.contains(parent) => {
                return Err(not_found(parent).into());
            }
            _ => {}
        }
        let buffer = tree
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();
        Ok(Box::new(MemoryFile {
            buffer,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let bytes = self.contents(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut tree = self.lock_tree();
        let buffer = tree.files.remove(from).ok_or_else(|| not_found(from))?;
        tree.files.insert(to.to_path_buf(), buffer);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let mut tree = self.lock_tree();
        tree.files.remove(path).ok_or_else(|| not_found(path))?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        register_ancestors(&mut self.lock_tree().directories, path);
        Ok(())
    }
}
