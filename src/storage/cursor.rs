//! Cursor store: the last fully reconciled ledger page.

use crate::error::Result;
use crate::storage::ByteStore;
use tracing::{debug, warn};

/// Integrity marker written after the page number.
pub const CURSOR_MARKER: [u8; 2] = *b"OK";

/// Encoded record length: 8-byte page plus marker.
pub const CURSOR_RECORD_LEN: usize = 8 + CURSOR_MARKER.len();

/// Persisted reconciliation cursor.
///
/// `page` is the highest ledger page fully accounted for. When `valid` is
/// false the page must be treated as 0; use [`Cursor::effective_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Stored page number.
    pub page: u64,
    /// Whether the stored record passed its integrity check.
    pub valid: bool,
}

impl Cursor {
    /// Cursor for a missing or corrupt record.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            page: 0,
            valid: false,
        }
    }

    /// Page the reconciler should resume after.
    #[must_use]
    pub const fn effective_page(&self) -> u64 {
        if self.valid {
            self.page
        } else {
            0
        }
    }

    fn encode(page: u64) -> [u8; CURSOR_RECORD_LEN] {
        let mut record = [0u8; CURSOR_RECORD_LEN];
        let (page_bytes, marker) = record.split_at_mut(8);
        page_bytes.copy_from_slice(&page.to_le_bytes());
        marker.copy_from_slice(&CURSOR_MARKER);
        record
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CURSOR_RECORD_LEN {
            return None;
        }
        let (page_bytes, marker) = bytes.split_at(8);
        if marker != CURSOR_MARKER {
            return None;
        }
        let page = u64::from_le_bytes(page_bytes.try_into().ok()?);
        Some(Self { page, valid: true })
    }
}

/// Durable cursor persistence over a [`ByteStore`].
pub struct CursorStore {
    bytes: Box<dyn ByteStore>,
}

impl CursorStore {
    /// Wrap a byte store.
    #[must_use]
    pub fn new(bytes: Box<dyn ByteStore>) -> Self {
        Self { bytes }
    }

    /// Load the persisted cursor.
    ///
    /// Never fails: a missing, unreadable or corrupt record loads as
    /// [`Cursor::invalid`] so reconciliation restarts from page 0.
    #[must_use]
    pub fn load(&self) -> Cursor {
        match self.bytes.read_cursor() {
            Ok(Some(raw)) => Cursor::decode(&raw).unwrap_or_else(|| {
                warn!(
                    "Cursor record failed integrity check ({} bytes), rescanning from page 0",
                    raw.len()
                );
                Cursor::invalid()
            }),
            Ok(None) => {
                debug!("No cursor record found, starting from page 0");
                Cursor::invalid()
            }
            Err(e) => {
                warn!("Failed to read cursor record, rescanning from page 0: {e}");
                Cursor::invalid()
            }
        }
    }

    /// Persist `page` as the highest fully reconciled page.
    ///
    /// Synchronous: returns only once the record is committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte store could not commit the record. The
    /// caller must not treat the page as consumed in that case.
    pub fn store(&mut self, page: u64) -> Result<()> {
        self.bytes.write_cursor(&Cursor::encode(page))?;
        debug!("Cursor committed at page {page}");
        Ok(())
    }
}
