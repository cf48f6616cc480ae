//! Local devnet: one scooter against a simulated ledger.
//!
//! The devnet wires a [`SessionController`] to an in-memory ledger, a
//! manually driven clock and recording peripherals, then plays a renter who
//! scans each displayed offer and pays it. It runs on virtual time, so a
//! dozen rentals complete in milliseconds, and reports every settled ride.

use crate::config::NodeConfig;
use crate::ledger::{SignedTransaction, SimulatedLedger};
use crate::offer::SessionId;
use crate::peripherals::{
    ManualClock, PositionFix, RecordingDisplay, RecordingTelemetry, SharedBattery, SharedLinks,
    SharedLock, SharedPosition,
};
use crate::session::{
    ControllerBuilder, Peripherals, SessionController, SettlementRequest, State, TransactionSigner,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

// =============================================================================
// Devnet Constants
// =============================================================================

/// Wallet the devnet scooter receives payments on.
pub const DEVNET_WALLET_ADDRESS: &str = "TRXA2NUACckkYwWnS9JRkATQA453ukAcD1";

/// Wallet the scripted renter pays from.
pub const DEVNET_RENTER_ADDRESS: &str = "TLdYHTKRSD3rG66zsytqpAgJDX75qbcvgT";

/// Unrelated wallet that sends stray transfers.
const DEVNET_STRAY_ADDRESS: &str = "TCYU4Pk8DWxyo6qSkqM3ksc8nEbNxeWtgE";

/// Public key the devnet signer stamps on settlements.
const DEVNET_SENDER_PUBLIC_KEY: &str =
    "03f1b8a4e02d7b9c0e6d3f5b1c1e1f0a9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e";

/// Virtual time per controller tick (milliseconds).
const DEFAULT_TICK_MS: u64 = 1_000;

/// Default number of rentals to play.
pub const DEFAULT_RIDE_COUNT: usize = 3;

/// Default paid ride length (seconds).
const DEFAULT_RIDE_SECONDS: u64 = 20;

/// Default number of historical transfers present before boot.
const DEFAULT_HISTORY: u64 = 4;

/// Ticks allowed per requested ride before the run is declared stalled.
const TICKS_PER_RIDE_BUDGET: u64 = 1_000;

/// Wall-clock origin of the virtual clock (2020-03-02).
const DEVNET_UNIX_BASE: u64 = 1_583_125_216;

/// Initial devnet wallet balance.
const DEVNET_STARTING_BALANCE: u64 = 99_990_386_752;

/// Error type for devnet operations.
#[derive(Debug, thiserror::Error)]
pub enum DevnetError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller error
    #[error("Controller error: {0}")]
    Controller(#[from] crate::error::Error),

    /// The rentals did not complete in time
    #[error("Devnet stalled: {0}")]
    Stalled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for devnet operations.
pub type Result<T> = std::result::Result<T, DevnetError>;

/// Configuration for the devnet.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    /// Rentals to play (default: 3).
    pub rides: usize,

    /// Seconds of riding the renter pays for.
    pub ride_seconds: u64,

    /// Historical transfers on the wallet before boot.
    pub history: u64,

    /// Send an unrelated transfer ahead of every rental payment.
    pub stray_payments: bool,

    /// Pay a stale session identifier ahead of every rental payment.
    pub stale_payments: bool,

    /// Virtual time per tick.
    pub tick: Duration,

    /// Root directory for the cursor file.
    pub data_dir: PathBuf,

    /// Whether to remove the data directory on shutdown.
    pub cleanup_data_dir: bool,

    /// Base node configuration; wallet, data directory and time sync are
    /// overridden for the devnet.
    pub node: NodeConfig,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        let suffix: u64 = rand::random();
        Self {
            rides: DEFAULT_RIDE_COUNT,
            ride_seconds: DEFAULT_RIDE_SECONDS,
            history: DEFAULT_HISTORY,
            stray_payments: true,
            stale_payments: false,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            data_dir: std::env::temp_dir().join(format!("scooter_devnet_{suffix:x}")),
            cleanup_data_dir: true,
            node: NodeConfig::default(),
        }
    }
}

impl DevnetConfig {
    /// One short ride on an empty wallet.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            rides: 1,
            ride_seconds: 1,
            history: 0,
            stray_payments: false,
            ..Self::default()
        }
    }

    /// Node configuration for the devnet scooter.
    #[must_use]
    pub fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig {
            root_dir: self.data_dir.clone(),
            ..self.node.clone()
        };
        config.wallet.address = DEVNET_WALLET_ADDRESS.to_string();
        config.startup.time_sync_timeout_secs = 0;
        config
    }
}

/// An offer as read off the display by a renter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedOffer {
    /// Wallet to pay.
    pub address: String,
    /// Hex session identifier.
    pub session_hex: String,
    /// Advertised rate.
    pub rate: u64,
}

/// Parse an offer payload (`scheme:address?hash=..&rate=..&lat=..&lon=..`).
#[must_use]
pub fn scan_offer(payload: &str) -> Option<ScannedOffer> {
    let (_, rest) = payload.split_once(':')?;
    let (address, query) = rest.split_once('?')?;

    let mut session_hex = None;
    let mut rate = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("hash", value)) => session_hex = Some(value.to_string()),
            Some(("rate", value)) => rate = value.parse().ok(),
            _ => {}
        }
    }

    Some(ScannedOffer {
        address: address.to_string(),
        session_hex: session_hex?,
        rate: rate?,
    })
}

/// Signer for the devnet: stamps a fixed public key and derives the id from
/// the body hash. Produces no real signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevnetSigner;

impl TransactionSigner for DevnetSigner {
    fn sign(&self, request: &SettlementRequest) -> crate::error::Result<SignedTransaction> {
        let mut json = request.to_json();
        json["senderPublicKey"] = DEVNET_SENDER_PUBLIC_KEY.into();
        let id = hex::encode(Sha256::digest(json.to_string().as_bytes()));
        json["id"] = id.clone().into();
        Ok(SignedTransaction { id, json })
    }
}

/// A rental the devnet completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRide {
    /// Hex session identifier.
    pub session_id: String,
    /// Renter address.
    pub renter: String,
    /// Amount paid.
    pub amount: u64,
    /// Paid seconds.
    pub seconds: u64,
    /// Settlement transaction id, if one was accepted.
    pub settlement_id: Option<String>,
}

/// Devnet report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevnetReport {
    /// Wallet the scooter received on.
    pub wallet: String,
    /// Completed rentals.
    pub rides: Vec<CompletedRide>,
    /// Final cursor.
    pub cursor: u64,
    /// Controller ticks evaluated.
    pub ticks: u64,
    /// Telemetry packets published.
    pub telemetry_packets: usize,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Creation time (Unix seconds).
    pub created_at: u64,
}

/// Handles to the simulated hardware, shared with the controller.
#[derive(Debug, Clone)]
pub struct DevnetHardware {
    /// Link flags.
    pub links: SharedLinks,
    /// Position source.
    pub position: SharedPosition,
    /// Display history.
    pub display: RecordingDisplay,
    /// Telemetry history.
    pub telemetry: RecordingTelemetry,
    /// Asset lock.
    pub lock: SharedLock,
    /// Virtual clock.
    pub clock: ManualClock,
    /// Battery gauge.
    pub battery: SharedBattery,
}

impl DevnetHardware {
    /// All links up, a fix at the configured fallback location.
    #[must_use]
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            links: SharedLinks::new(true, true),
            position: SharedPosition::new(Some(PositionFix {
                latitude: config.telemetry.fallback_latitude,
                longitude: config.telemetry.fallback_longitude,
                speed_knots: 0.4,
                satellites: 5,
            })),
            display: RecordingDisplay::new(),
            telemetry: RecordingTelemetry::new(),
            lock: SharedLock::new(),
            clock: ManualClock::new(Some(DEVNET_UNIX_BASE)),
            battery: SharedBattery::new(96),
        }
    }

    /// Peripherals for the controller.
    #[must_use]
    pub fn peripherals(&self) -> Peripherals {
        Peripherals {
            links: Arc::new(self.links.clone()),
            position: Arc::new(self.position.clone()),
            display: Arc::new(self.display.clone()),
            telemetry: Arc::new(self.telemetry.clone()),
            lock: Arc::new(self.lock.clone()),
            clock: Arc::new(self.clock.clone()),
            battery: Arc::new(self.battery.clone()),
        }
    }
}

/// A local devnet scooter.
pub struct Devnet {
    config: DevnetConfig,
    ledger: SimulatedLedger,
    hardware: DevnetHardware,
    controller: SessionController,
}

impl Devnet {
    /// Seed the ledger history and boot the controller.
    ///
    /// # Errors
    ///
    /// Returns `DevnetError::Config` for zero rides or ride length, and
    /// `DevnetError::Controller` if the controller fails to start.
    pub async fn new(config: DevnetConfig) -> Result<Self> {
        if config.rides == 0 {
            return Err(DevnetError::Config("At least one ride is required".to_string()));
        }
        if config.ride_seconds == 0 {
            return Err(DevnetError::Config(
                "Ride length must be at least one second".to_string(),
            ));
        }
        if config.tick.is_zero() {
            return Err(DevnetError::Config("Tick must be non-zero".to_string()));
        }

        tokio::fs::create_dir_all(&config.data_dir).await?;

        let ledger = SimulatedLedger::new();
        ledger.set_wallet(DEVNET_STARTING_BALANCE, 0);
        for i in 0..config.history {
            ledger.push_transfer(DEVNET_STRAY_ADDRESS, 1_000 + i);
        }

        let node_config = config.node_config();
        let hardware = DevnetHardware::new(&node_config);
        let controller =
            ControllerBuilder::new(node_config, hardware.peripherals(), Arc::new(DevnetSigner))
                .with_transport(Arc::new(ledger.clone()))
                .build()
                .await?;

        Ok(Self {
            config,
            ledger,
            hardware,
            controller,
        })
    }

    /// Play the configured rentals to completion.
    ///
    /// # Errors
    ///
    /// Returns `DevnetError::Stalled` if the rides do not complete within the
    /// tick budget.
    pub async fn run(&mut self) -> Result<DevnetReport> {
        info!(
            "Playing {} rentals of {}s at rate {}",
            self.config.rides, self.config.ride_seconds, self.config.node.rental.rate
        );

        let tick_ms = u64::try_from(self.config.tick.as_millis()).unwrap_or(u64::MAX);
        let budget = TICKS_PER_RIDE_BUDGET.saturating_mul(self.config.rides as u64);
        let mut rides = Vec::new();
        let mut paid_session: Option<String> = None;
        let mut riding: Option<CompletedRide> = None;

        for _ in 0..budget {
            self.hardware.clock.advance_ms(tick_ms);
            let settled_before = self.ledger.sent().len();
            let state = self.controller.tick().await.clone();

            match &state {
                State::AwaitingPayment { .. } => {
                    if let Some(ride) = self.pay_displayed_offer(paid_session.as_deref()) {
                        paid_session = Some(ride.session_id.clone());
                        riding = Some(ride);
                    }
                }
                State::Settling => {
                    if let Some(mut ride) = riding.take() {
                        ride.settlement_id = self
                            .ledger
                            .sent()
                            .get(settled_before..)
                            .and_then(|sent| sent.iter().find(|s| s.accepted))
                            .map(|s| s.signed.id.clone());
                        info!("Ride {} settled", ride.session_id);
                        rides.push(ride);
                    }
                    if rides.len() == self.config.rides {
                        return Ok(self.report(rides));
                    }
                }
                _ => {}
            }
        }

        Err(DevnetError::Stalled(format!(
            "{} of {} rides completed after {budget} ticks (state {})",
            rides.len(),
            self.config.rides,
            self.controller.state()
        )))
    }

    /// Scan the offer on the display and pay it, unless already paid.
    fn pay_displayed_offer(&self, already_paid: Option<&str>) -> Option<CompletedRide> {
        let payload = self.hardware.display.current_offer()?;
        let Some(offer) = scan_offer(&payload) else {
            warn!("Renter could not scan {payload}");
            return None;
        };
        if already_paid == Some(offer.session_hex.as_str()) {
            return None;
        }

        let amount = offer.rate.saturating_mul(self.config.ride_seconds);
        if self.config.stray_payments {
            self.ledger.push_transfer(DEVNET_STRAY_ADDRESS, 7);
        }
        if self.config.stale_payments {
            let stale = already_paid.map_or_else(|| SessionId::from_seed(0).to_hex(), str::to_string);
            self.ledger
                .push_rental_start(DEVNET_RENTER_ADDRESS, amount, &stale);
        }
        let page = self
            .ledger
            .push_rental_start(DEVNET_RENTER_ADDRESS, amount, &offer.session_hex);
        debug!("Renter paid {amount} for {} at page {page}", offer.session_hex);

        Some(CompletedRide {
            session_id: offer.session_hex,
            renter: DEVNET_RENTER_ADDRESS.to_string(),
            amount,
            seconds: self.config.ride_seconds,
            settlement_id: None,
        })
    }

    fn report(&self, rides: Vec<CompletedRide>) -> DevnetReport {
        DevnetReport {
            wallet: DEVNET_WALLET_ADDRESS.to_string(),
            rides,
            cursor: self.controller.reconciler().cursor(),
            ticks: self.controller.stats().ticks,
            telemetry_packets: self.hardware.telemetry.packets().len(),
            data_dir: self.config.data_dir.clone(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        }
    }

    /// Remove the data directory if configured to.
    ///
    /// # Errors
    ///
    /// Never fails; cleanup problems are logged.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down devnet");
        if self.config.cleanup_data_dir {
            if let Err(e) = tokio::fs::remove_dir_all(&self.config.data_dir).await {
                warn!("Failed to cleanup devnet data directory: {}", e);
            }
        }
        Ok(())
    }

    /// Get devnet configuration.
    #[must_use]
    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    /// The simulated ledger.
    #[must_use]
    pub fn ledger(&self) -> &SimulatedLedger {
        &self.ledger
    }

    /// The simulated hardware.
    #[must_use]
    pub fn hardware(&self) -> &DevnetHardware {
        &self.hardware
    }
}
