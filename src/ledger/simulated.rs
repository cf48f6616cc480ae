//! In-memory ledger.
//!
//! Holds a received history, a wallet and a send log behind a shared lock.
//! Clones share state, so a test or the devnet can keep one handle to script
//! payments while the controller owns another.

use crate::error::{Error, Result};
use crate::ledger::{
    AssetGps, LedgerAddress, LedgerTransport, ReceivedTx, RentalStartAsset, SendReceipt,
    SignedTransaction, TxKind, WalletSummary,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// A transaction posted to the simulated ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransaction {
    /// The signed transaction.
    pub signed: SignedTransaction,
    /// Whether the ledger accepted it.
    pub accepted: bool,
}

#[derive(Debug)]
struct LedgerState {
    synced: bool,
    wallet: WalletSummary,
    received: Vec<ReceivedTx>,
    sent: Vec<SentTransaction>,
    failing_reads: u32,
    rejecting_sends: u32,
}

/// Shared in-memory [`LedgerTransport`].
#[derive(Debug, Clone)]
pub struct SimulatedLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    /// A synced ledger with an empty wallet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                synced: true,
                wallet: WalletSummary::default(),
                received: Vec::new(),
                sent: Vec::new(),
                failing_reads: 0,
                rejecting_sends: 0,
            })),
        }
    }

    /// Set the node sync flag.
    pub fn set_synced(&self, synced: bool) {
        self.state.lock().synced = synced;
    }

    /// Set balance and nonce.
    pub fn set_wallet(&self, balance: u64, nonce: u64) {
        self.state.lock().wallet = WalletSummary { balance, nonce };
    }

    /// Current balance and nonce.
    #[must_use]
    pub fn wallet(&self) -> WalletSummary {
        self.state.lock().wallet
    }

    /// Number of received transactions.
    #[must_use]
    pub fn received_len(&self) -> u64 {
        self.state.lock().received.len() as u64
    }

    /// Append a plain transfer and return its history index.
    pub fn push_transfer(&self, sender: &str, amount: u64) -> u64 {
        self.push(sender, amount, TxKind::TRANSFER, None)
    }

    /// Append a rental start carrying `session_hex` and return its index.
    pub fn push_rental_start(&self, sender: &str, amount: u64, session_hex: &str) -> u64 {
        let asset = RentalStartAsset {
            session_id: session_hex.to_string(),
            rate: None,
            gps: None,
        };
        self.push(sender, amount, TxKind::RENTAL_START, Some(asset))
    }

    /// Append a rental start with full asset details and return its index.
    pub fn push_rental_start_at(
        &self,
        sender: &str,
        amount: u64,
        session_hex: &str,
        rate: u64,
        gps: AssetGps,
    ) -> u64 {
        let asset = RentalStartAsset {
            session_id: session_hex.to_string(),
            rate: Some(rate),
            gps: Some(gps),
        };
        self.push(sender, amount, TxKind::RENTAL_START, Some(asset))
    }

    /// Fail the next `n` history or wallet reads with a transport error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().failing_reads = n;
    }

    /// Reject the next `n` sends as invalid.
    pub fn reject_next_sends(&self, n: u32) {
        self.state.lock().rejecting_sends = n;
    }

    /// All posted transactions.
    #[must_use]
    pub fn sent(&self) -> Vec<SentTransaction> {
        self.state.lock().sent.clone()
    }

    fn push(&self, sender: &str, amount: u64, kind: TxKind, asset: Option<RentalStartAsset>) -> u64 {
        let mut state = self.state.lock();
        let index = state.received.len() as u64 + 1;
        let id = hex::encode(Sha256::digest(format!("{sender}:{index}:{amount}").as_bytes()));
        state.received.push(ReceivedTx {
            id,
            kind,
            amount,
            sender: sender.to_string(),
            sender_public_key: String::new(),
            vendor_field: None,
            asset,
        });
        state.wallet.balance = state.wallet.balance.saturating_add(amount);
        debug!("Simulated ledger: page {index} {kind:?} amount {amount}");
        index
    }

    fn take_read_failure(state: &mut LedgerState) -> Result<()> {
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(Error::Ledger("simulated transport failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransport for SimulatedLedger {
    async fn node_synced(&self) -> Result<bool> {
        Ok(self.state.lock().synced)
    }

    async fn wallet_summary(&self, _address: &LedgerAddress) -> Result<WalletSummary> {
        let mut state = self.state.lock();
        Self::take_read_failure(&mut state)?;
        Ok(state.wallet)
    }

    async fn received_page(
        &self,
        _address: &LedgerAddress,
        page: u64,
        limit: u32,
    ) -> Result<Vec<ReceivedTx>> {
        let mut state = self.state.lock();
        Self::take_read_failure(&mut state)?;

        let limit = limit as usize;
        let start = usize::try_from(page.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .saturating_mul(limit);
        Ok(state
            .received
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<SendReceipt> {
        let mut state = self.state.lock();
        let accepted = if state.rejecting_sends > 0 {
            state.rejecting_sends -= 1;
            false
        } else {
            true
        };

        if accepted {
            if let Some(nonce) = signed
                .json
                .get("nonce")
                .and_then(serde_json::Value::as_str)
                .and_then(|n| n.parse().ok())
            {
                state.wallet.nonce = nonce;
            }
        }

        state.sent.push(SentTransaction {
            signed: signed.clone(),
            accepted,
        });

        Ok(if accepted {
            SendReceipt {
                accepted: vec![signed.id.clone()],
                invalid: Vec::new(),
            }
        } else {
            SendReceipt {
                accepted: Vec::new(),
                invalid: vec![signed.id.clone()],
            }
        })
    }
}
