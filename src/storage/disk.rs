//! File-backed cursor slot.
//!
//! The record lives in a single file. Writes go to a sibling temp file which
//! is synced and then renamed over the record, so a power loss mid-write
//! leaves either the old record or the new one, never a torn mix:
//!
//! ```text
//! {root}/cursor.bin      committed record
//! {root}/cursor.tmp      in-flight write (removed by rename)
//! ```

use crate::error::{Error, Result};
use crate::storage::ByteStore;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Statistics about cursor file operations.
#[derive(Debug, Clone, Default)]
pub struct FileStoreStats {
    /// Records committed.
    pub writes: u64,
    /// Records read.
    pub reads: u64,
}

/// Cursor slot stored in a single file with atomic replacement.
pub struct FileByteStore {
    path: PathBuf,
    stats: parking_lot::RwLock<FileStoreStats>,
}

impl FileByteStore {
    /// Open (or prepare) the record file at `path`.
    ///
    /// The parent directory is created if missing. The file itself is only
    /// created by the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create cursor directory: {e}"))
                })?;
            }
        }

        debug!("Cursor store at {}", path.display());

        Ok(Self {
            path,
            stats: parking_lot::RwLock::new(FileStoreStats::default()),
        })
    }

    /// Path of the committed record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of operation counters.
    #[must_use]
    pub fn stats(&self) -> FileStoreStats {
        self.stats.read().clone()
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

impl ByteStore for FileByteStore {
    fn read_cursor(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                self.stats.write().reads += 1;
                trace!("Read {} cursor bytes", bytes.len());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read cursor file: {e}"))),
        }
    }

    fn write_cursor(&mut self, bytes: &[u8]) -> Result<()> {
        // Atomic write: temp file + rename
        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp file: {e}")))?;

        file.write_all(bytes)
            .map_err(|e| Error::Storage(format!("Failed to write cursor: {e}")))?;

        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync cursor: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::Storage(format!("Failed to rename temp file: {e}")))?;

        self.stats.write().writes += 1;
        trace!("Committed {} cursor bytes", bytes.len());
        Ok(())
    }
}
