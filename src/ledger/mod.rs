//! Ledger access and payment reconciliation.
//!
//! The scooter never trusts its own view of a payment. It advertises an
//! offer, then walks the receiving wallet's append-only history, oldest
//! first, until it finds the rental-start transaction that carries the
//! offer's session identifier.
//!
//! ```text
//! ┌───────────────┐   poll (throttled)   ┌─────────────────┐
//! │  Reconciler   │ ───────────────────► │ LedgerTransport │
//! │  cursor ──────┼──► CursorStore       │  (HTTP / sim)   │
//! └───────────────┘                      └─────────────────┘
//! ```
//!
//! Every transaction the reconciler looks at is either consumed (cursor
//! advanced and persisted before the poll returns) or left untouched for the
//! next poll. There is no third outcome.

mod address;
mod http;
mod reconciler;
mod simulated;

pub use address::{is_valid_address, parse_ledger_address, LedgerAddress, LEDGER_ADDRESS_LEN};
pub use http::{
    parse_node_status, parse_received_page, parse_send_response, parse_wallet, HttpLedgerClient,
};
pub use reconciler::{
    MatchedPayment, PollOutcome, Reconciler, ReconcilerConfig, ReconcilerStats, WalletState,
};
pub use simulated::{SentTransaction, SimulatedLedger};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Type id of the rental-start custom transaction.
pub const RENTAL_START_TYPE: u16 = 500;

/// Type group of the rental custom transactions.
pub const RENTAL_TYPE_GROUP: u32 = 4000;

/// Transaction kind as reported by the ledger (`type`, `typeGroup`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxKind {
    /// Transaction type within its group.
    pub type_id: u16,
    /// Transaction type group.
    pub type_group: u32,
}

impl TxKind {
    /// Plain value transfer.
    pub const TRANSFER: Self = Self {
        type_id: 0,
        type_group: 1,
    };

    /// Rental-start custom transaction.
    pub const RENTAL_START: Self = Self {
        type_id: RENTAL_START_TYPE,
        type_group: RENTAL_TYPE_GROUP,
    };

    /// Whether this is the rental-start kind.
    #[must_use]
    pub fn is_rental_start(&self) -> bool {
        *self == Self::RENTAL_START
    }
}

/// Renter position embedded in a rental-start asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetGps {
    /// Unix timestamp of the fix, if reported.
    pub timestamp: Option<u64>,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// Custom asset of a rental-start transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalStartAsset {
    /// Hex session identifier copied from the offer.
    pub session_id: String,
    /// Rate the renter saw, if reported.
    pub rate: Option<u64>,
    /// Renter position, if reported.
    pub gps: Option<AssetGps>,
}

/// One transaction from the wallet's received history.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedTx {
    /// Transaction id.
    pub id: String,
    /// Transaction kind.
    pub kind: TxKind,
    /// Amount in minor units.
    pub amount: u64,
    /// Sender address.
    pub sender: String,
    /// Sender public key (hex).
    pub sender_public_key: String,
    /// Free-text vendor field.
    pub vendor_field: Option<String>,
    /// Rental-start asset, present only for that kind.
    pub asset: Option<RentalStartAsset>,
}

/// Wallet balance and nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletSummary {
    /// Balance in minor units.
    pub balance: u64,
    /// Nonce of the last transaction sent from the wallet.
    pub nonce: u64,
}

/// A signed transaction ready to post.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    /// Transaction id the ledger will report on acceptance.
    pub id: String,
    /// Canonical JSON encoding.
    pub json: serde_json::Value,
}

/// Ledger answer to a transaction post.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendReceipt {
    /// Ids accepted into the pool.
    pub accepted: Vec<String>,
    /// Ids rejected as invalid.
    pub invalid: Vec<String>,
}

impl SendReceipt {
    /// Whether `id` was accepted.
    #[must_use]
    pub fn is_accepted(&self, id: &str) -> bool {
        self.accepted.iter().any(|a| a == id)
    }
}

/// Remote ledger API.
///
/// Pages are 1-based and ordered oldest first. `received_page` returns an
/// empty vector for a page past the end of the history.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Whether the ledger node is reachable and synced with the chain.
    async fn node_synced(&self) -> Result<bool>;

    /// Current balance and nonce of `address`.
    async fn wallet_summary(&self, address: &LedgerAddress) -> Result<WalletSummary>;

    /// One page of the received-transaction history of `address`.
    async fn received_page(
        &self,
        address: &LedgerAddress,
        page: u64,
        limit: u32,
    ) -> Result<Vec<ReceivedTx>>;

    /// Post a signed transaction.
    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<SendReceipt>;
}
