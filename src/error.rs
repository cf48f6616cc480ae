//! Error types for scooter-node.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scooter-node.
///
/// Normal polling outcomes (no payment yet, a corrupt cursor that falls back
/// to a full rescan) are not errors and are reported through outcome types
/// instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error. Fatal at boot.
    #[error("configuration error: {0}")]
    Config(String),

    /// A link the controller depends on (wifi, broker, ledger node) is down.
    #[error("connectivity fault: {0}")]
    Connectivity(String),

    /// No position fix is available.
    #[error("no position fix")]
    NoPositionFix,

    /// The ledger answered, but a field the caller depends on is missing or
    /// has the wrong shape.
    #[error("malformed ledger response: {0}")]
    MalformedLedgerResponse(String),

    /// Transport-level ledger error.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Durable storage could not be written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Offer generation failed.
    #[error("offer error: {0}")]
    Offer(String),

    /// The rental record was asked to break one of its invariants.
    #[error("session error: {0}")]
    Session(String),

    /// The settlement transaction could not be built or signed.
    #[error("settlement error: {0}")]
    Settlement(String),

    /// The settlement transaction was rejected or never reached the ledger.
    #[error("send failure: {0}")]
    SendFailure(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true for errors caused by an unreachable or misbehaving remote
    /// ledger, which the controller retries on a later tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Ledger(_) | Self::MalformedLedgerResponse(_)
        )
    }
}
