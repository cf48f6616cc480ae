//! Ledger reconciler: exactly-once payment detection over a paginated history.
//!
//! The reconciler walks the wallet's received history oldest first, starting
//! after the persisted cursor. Each transaction it evaluates is classified as
//! one of:
//!
//! - **discarded**: not a rental start
//! - **mismatched**: a rental start for some other offer (not refunded)
//! - **matched**: a rental start carrying the expected session identifier
//!
//! All three consume the transaction. The cursor is persisted before the
//! poll returns, and the in-memory cursor only moves once that write
//! succeeded, so a failed write just repeats the evaluation on the next poll.

use crate::error::{Error, Result};
use crate::ledger::{LedgerAddress, LedgerTransport, ReceivedTx, SendReceipt, SignedTransaction};
use crate::offer::SessionId;
use crate::scheduler::Interval;
use crate::storage::CursorStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default poll interval (8 seconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 8_000;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Transactions per remote page.
    pub page_size: u32,
    /// Minimum time between two throttled polls.
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            page_size: 1,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Wallet view held by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletState {
    /// Last fetched balance.
    pub balance: u64,
    /// Nonce to build the next transaction from.
    pub nonce: u64,
    /// Highest transaction index fully reconciled; mirrors the cursor store.
    pub last_confirmed_page: u64,
}

/// A payment that answered the expected offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPayment {
    /// Payer address.
    pub sender: String,
    /// Amount paid in minor units.
    pub amount: u64,
    /// History index of the transaction.
    pub page: u64,
    /// Transaction id.
    pub tx_id: String,
}

/// Result of a payment poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The poll interval has not elapsed; nothing was fetched.
    NotDue,
    /// No matching payment yet.
    NoMatch,
    /// The expected payment arrived.
    Matched(MatchedPayment),
}

/// Statistics about reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerStats {
    /// Polls that reached the ledger.
    pub polls: u64,
    /// Transactions evaluated and consumed.
    pub transactions_scanned: u64,
    /// Non rental-start transactions skipped.
    pub discarded: u64,
    /// Rental starts for another offer.
    pub mismatched: u64,
    /// Rental starts without a rental asset, skipped.
    pub malformed: u64,
    /// Matches reported.
    pub matched: u64,
    /// Failed ledger calls (transport or malformed).
    pub ledger_errors: u64,
    /// Transactions sent and accepted.
    pub sends_accepted: u64,
    /// Transactions that failed to send.
    pub send_failures: u64,
}

enum Verdict {
    Discarded,
    Malformed,
    Mismatched,
    Matched(MatchedPayment),
}

/// Reconciles the wallet's received history against the expected offer.
pub struct Reconciler {
    transport: Arc<dyn LedgerTransport>,
    cursor_store: CursorStore,
    address: LedgerAddress,
    config: ReconcilerConfig,
    wallet: WalletState,
    poll: Interval,
    stats: parking_lot::RwLock<ReconcilerStats>,
}

impl Reconciler {
    /// Create a reconciler, loading the persisted cursor.
    ///
    /// A corrupt or missing cursor resumes from page 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `page_size` or `poll_interval_ms` is zero.
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        cursor_store: CursorStore,
        address: LedgerAddress,
        config: ReconcilerConfig,
        now_ms: u64,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(Error::Config("ledger page size must be at least 1".to_string()));
        }
        if config.poll_interval_ms == 0 {
            return Err(Error::Config("ledger poll interval must be non-zero".to_string()));
        }

        let cursor = cursor_store.load();
        info!(
            "Reconciler for {address} resuming after page {} (cursor {})",
            cursor.effective_page(),
            if cursor.valid { "valid" } else { "reset" }
        );

        Ok(Self {
            transport,
            cursor_store,
            address,
            wallet: WalletState {
                last_confirmed_page: cursor.effective_page(),
                ..WalletState::default()
            },
            poll: Interval::starting_at(now_ms, config.poll_interval_ms),
            config,
            stats: parking_lot::RwLock::new(ReconcilerStats::default()),
        })
    }

    /// Highest history index fully reconciled.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.wallet.last_confirmed_page
    }

    /// Whether the transaction at `page` was already consumed.
    #[must_use]
    pub fn is_consumed(&self, page: u64) -> bool {
        page <= self.cursor()
    }

    /// Current wallet view.
    #[must_use]
    pub fn wallet(&self) -> &WalletState {
        &self.wallet
    }

    /// The wallet being reconciled.
    #[must_use]
    pub fn address(&self) -> &LedgerAddress {
        &self.address
    }

    /// Snapshot of reconciliation counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        self.stats.read().clone()
    }

    /// Whether the ledger node is reachable and synced.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the node cannot be queried.
    pub async fn node_synced(&self) -> Result<bool> {
        self.transport.node_synced().await
    }

    /// Refresh balance and nonce from the ledger.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the previous wallet view is kept.
    pub async fn fetch_wallet_summary(&mut self) -> Result<WalletState> {
        let summary = match self.transport.wallet_summary(&self.address).await {
            Ok(summary) => summary,
            Err(e) => {
                self.stats.write().ledger_errors += 1;
                return Err(e);
            }
        };

        self.wallet.balance = summary.balance;
        self.wallet.nonce = summary.nonce;
        debug!(
            "Wallet {}: balance {} nonce {}",
            self.address, summary.balance, summary.nonce
        );
        Ok(self.wallet)
    }

    /// Increment the nonce for the next send and return it.
    ///
    /// Not rolled back if the send fails.
    pub fn reserve_nonce(&mut self) -> u64 {
        self.wallet.nonce = self.wallet.nonce.saturating_add(1);
        self.wallet.nonce
    }

    /// Restart the poll interval at `now_ms`.
    pub fn reset_poll_timer(&mut self, now_ms: u64) {
        self.poll.reset(now_ms);
    }

    /// Fetch the transaction at history index `page` (1-based) without
    /// consuming it.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn scan_one_page(&self, page: u64) -> Result<Option<ReceivedTx>> {
        if page == 0 {
            return Ok(None);
        }
        let (remote_page, offset) = self.locate(page);
        let txs = self
            .transport
            .received_page(&self.address, remote_page, self.config.page_size)
            .await?;
        Ok(txs.into_iter().nth(offset))
    }

    /// Throttled poll for the payment carrying `expected`.
    ///
    /// At most one remote call per poll interval; returns
    /// [`PollOutcome::NotDue`] in between.
    ///
    /// # Errors
    ///
    /// See [`Self::reconcile_next`].
    pub async fn poll_for_matching_payment(
        &mut self,
        expected: &SessionId,
        now_ms: u64,
    ) -> Result<PollOutcome> {
        if !self.poll.fire(now_ms) {
            return Ok(PollOutcome::NotDue);
        }
        self.reconcile_next(expected).await
    }

    /// Evaluate the next unconsumed transactions, unthrottled.
    ///
    /// Fetches the one remote page holding the next unconsumed transaction
    /// and evaluates the rest of that page in order, stopping at the first
    /// match.
    ///
    /// # Errors
    ///
    /// Returns a transport or malformed-response error with the cursor
    /// untouched, or a storage error if the cursor could not be persisted (the
    /// evaluation is then repeated on the next poll).
    pub async fn reconcile_next(&mut self, expected: &SessionId) -> Result<PollOutcome> {
        self.stats.write().polls += 1;

        let cursor = self.cursor();
        let next = cursor + 1;
        let (remote_page, offset) = self.locate(next);

        let txs = match self
            .transport
            .received_page(&self.address, remote_page, self.config.page_size)
            .await
        {
            Ok(txs) => txs,
            Err(e) => {
                self.stats.write().ledger_errors += 1;
                return Err(e);
            }
        };

        let mut consumed = cursor;
        let mut matched = None;
        for tx in txs.iter().skip(offset) {
            consumed += 1;
            match classify(tx, expected, consumed) {
                Verdict::Discarded => {
                    debug!("Page {consumed}: discarded {} (not a rental start)", tx.id);
                    self.stats.write().discarded += 1;
                }
                Verdict::Malformed => {
                    warn!(
                        "Page {consumed}: rental start {} from {} carries no rental asset, skipped",
                        tx.id, tx.sender
                    );
                    self.stats.write().malformed += 1;
                }
                Verdict::Mismatched => {
                    warn!(
                        "Page {consumed}: rental start {} from {} is for another session, not refunded",
                        tx.id, tx.sender
                    );
                    self.stats.write().mismatched += 1;
                }
                Verdict::Matched(payment) => {
                    matched = Some(payment);
                    break;
                }
            }
        }

        if consumed == cursor {
            debug!("No transaction at page {next}");
            return Ok(PollOutcome::NoMatch);
        }

        self.commit(consumed)?;
        self.stats.write().transactions_scanned += consumed - cursor;

        match matched {
            Some(payment) => {
                self.stats.write().matched += 1;
                info!(
                    "Page {}: payment of {} from {} matches session {expected}",
                    payment.page, payment.amount, payment.sender
                );
                Ok(PollOutcome::Matched(payment))
            }
            None => Ok(PollOutcome::NoMatch),
        }
    }

    /// Fast-forward the cursor past the existing history.
    ///
    /// Consumes at most `limit` transactions without matching any of them and
    /// returns how many were skipped. Progress made before a failure is
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns the first transport or storage error.
    pub async fn catch_up(&mut self, limit: u64) -> Result<u64> {
        let start = self.cursor();
        let mut consumed = start;
        let mut failure = None;

        while consumed - start < limit {
            let (remote_page, offset) = self.locate(consumed + 1);
            match self
                .transport
                .received_page(&self.address, remote_page, self.config.page_size)
                .await
            {
                Ok(txs) => {
                    let available = txs.len().saturating_sub(offset) as u64;
                    if available == 0 {
                        break;
                    }
                    consumed += available.min(limit - (consumed - start));
                }
                Err(e) => {
                    self.stats.write().ledger_errors += 1;
                    failure = Some(e);
                    break;
                }
            }
        }

        if consumed > start {
            self.commit(consumed)?;
            info!("Catch-up skipped {} historical transactions", consumed - start);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(consumed - start),
        }
    }

    /// Post a signed transaction and require its acceptance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailure`] if the post fails or the ledger does
    /// not list the transaction as accepted.
    pub async fn send_transaction(&self, signed: &SignedTransaction) -> Result<SendReceipt> {
        let receipt = match self.transport.send_transaction(signed).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.stats.write().send_failures += 1;
                return Err(match e {
                    Error::SendFailure(msg) => Error::SendFailure(msg),
                    other => Error::SendFailure(other.to_string()),
                });
            }
        };

        if !receipt.is_accepted(&signed.id) {
            self.stats.write().send_failures += 1;
            return Err(Error::SendFailure(format!(
                "transaction {} not accepted (invalid: {:?})",
                signed.id, receipt.invalid
            )));
        }

        self.stats.write().sends_accepted += 1;
        info!("Transaction {} accepted", signed.id);
        Ok(receipt)
    }

    /// Remote page and in-page offset of history index `index` (1-based).
    fn locate(&self, index: u64) -> (u64, usize) {
        let page_size = u64::from(self.config.page_size);
        let zero_based = index.saturating_sub(1);
        let offset = usize::try_from(zero_based % page_size).unwrap_or(0);
        (zero_based / page_size + 1, offset)
    }

    fn commit(&mut self, page: u64) -> Result<()> {
        self.cursor_store.store(page)?;
        self.wallet.last_confirmed_page = page;
        Ok(())
    }
}

fn classify(tx: &ReceivedTx, expected: &SessionId, page: u64) -> Verdict {
    if !tx.kind.is_rental_start() {
        return Verdict::Discarded;
    }
    let Some(asset) = tx.asset.as_ref() else {
        return Verdict::Malformed;
    };

    if expected.matches_hex(&asset.session_id) {
        Verdict::Matched(MatchedPayment {
            sender: tx.sender.clone(),
            amount: tx.amount,
            page,
            tx_id: tx.id.clone(),
        })
    } else {
        Verdict::Mismatched
    }
}
