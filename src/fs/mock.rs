// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct MockFile {
    contents: Vec<u8>,
    mtime: SystemTime,
}

/// In-memory filesystem for tests.
///
/// Files carry an explicit modification time so sentinel mtime behaviour can
/// be driven deterministically with [`MockFileSystem::touch`]. The `exists`
/// call counter lets tests assert that concurrent flag refreshes coalesce
/// onto a single check.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockFile>>>,
    exists_calls: Arc<AtomicUsize>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap();
        files.insert(
            path.as_ref().to_path_buf(),
            MockFile {
                contents: content.into(),
                mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000),
            },
        );
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let mut files = self.files.lock().unwrap();
        files.remove(path.as_ref());
    }

    /// Bump the file's modification time by `secs`, creating it if absent.
    pub fn touch(&self, path: impl AsRef<Path>, secs: u64) {
        let mut files = self.files.lock().unwrap();
        let entry = files
            .entry(path.as_ref().to_path_buf())
            .or_insert_with(|| MockFile {
                contents: Vec::new(),
                mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000),
            });
        entry.mtime += Duration::from_secs(secs);
    }

    /// How many times `exists` has been called on this filesystem.
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        files.contains_key(path)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .map(|f| f.mtime)
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(file) => String::from_utf8(file.contents.clone())
                .map_err(|e| anyhow!("Invalid UTF-8: {}", e)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }
}
