//! Durable storage for the ledger cursor.
//!
//! The cursor is the only state that survives a power cycle. It is written
//! through a [`ByteStore`], a tiny persistent slot that holds one encoded
//! record:
//!
//! ```text
//! ┌──────────────────────────┬──────────┐
//! │ page (u64, little-endian)│ "OK"     │
//! └──────────────────────────┴──────────┘
//!        8 bytes                2 bytes
//! ```
//!
//! A record whose marker is missing or damaged loads as an invalid cursor,
//! which the reconciler treats as page 0 (full history rescan).
//!
//! # Example
//!
//! ```rust,no_run
//! use scooter_node::storage::{CursorStore, FileByteStore};
//!
//! # fn main() -> scooter_node::Result<()> {
//! let bytes = FileByteStore::open("/var/lib/scooter/cursor.bin")?;
//! let mut store = CursorStore::new(Box::new(bytes));
//! let cursor = store.load();
//! store.store(cursor.effective_page() + 1)?;
//! # Ok(())
//! # }
//! ```

mod cursor;
mod disk;

pub use cursor::{Cursor, CursorStore, CURSOR_MARKER, CURSOR_RECORD_LEN};
pub use disk::FileByteStore;

use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// A single persistent slot for the encoded cursor record.
pub trait ByteStore: Send {
    /// Read the stored record. `Ok(None)` means nothing was ever written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn read_cursor(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored record. Must be durable when this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be committed.
    fn write_cursor(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Volatile byte store.
///
/// Clones share the same slot, so a test can hand one clone to a cursor
/// store, drop that store to simulate a crash, and reopen from another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryByteStore {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryByteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with raw bytes.
    #[must_use]
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(bytes))),
        }
    }

    /// Snapshot of the raw stored bytes.
    #[must_use]
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.slot.lock().clone()
    }

    /// Overwrite the raw stored bytes, bypassing the cursor encoding.
    pub fn corrupt_with(&self, bytes: Vec<u8>) {
        *self.slot.lock() = Some(bytes);
    }
}

impl ByteStore for MemoryByteStore {
    fn read_cursor(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.slot.lock().clone())
    }

    fn write_cursor(&mut self, bytes: &[u8]) -> Result<()> {
        *self.slot.lock() = Some(bytes.to_vec());
        Ok(())
    }
}
