//! Configuration for scooter-node.

use crate::error::{Error, Result};
use crate::ledger::{parse_ledger_address, LedgerAddress};
use crate::session::settlement::{DEFAULT_SETTLEMENT_AMOUNT, DEFAULT_SETTLEMENT_FEE};
use crate::session::{RentalRate, SettlementTerms};
use crate::telemetry::{DEFAULT_FALLBACK_LATITUDE, DEFAULT_FALLBACK_LONGITUDE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the cursor record under `root_dir`.
pub const CURSOR_FILE_NAME: &str = "cursor.bin";

/// Default rental rate in minor units per second.
pub const DEFAULT_RENTAL_RATE: u64 = 61_667;

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for node data.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Receiving wallet.
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Rental terms.
    #[serde(default)]
    pub rental: RentalConfig,

    /// Ledger access.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Telemetry publishing.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Display refresh.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Startup behaviour.
    #[serde(default)]
    pub startup: StartupConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Receiving wallet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Base58 address rental payments are sent to.
    #[serde(default)]
    pub address: String,
}

/// Rental terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalConfig {
    /// Minor units per second of riding. Must be greater than zero.
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Fee paid on the settlement transaction.
    #[serde(default = "default_settlement_fee")]
    pub settlement_fee: u64,

    /// Amount sent back on the settlement transaction.
    #[serde(default = "default_settlement_amount")]
    pub settlement_amount: u64,

    /// Prefix of the settlement vendor field.
    #[serde(default = "default_vendor_field")]
    pub vendor_field: String,

    /// URI scheme of the offer payload.
    #[serde(default = "default_uri_scheme")]
    pub uri_scheme: String,
}

/// Ledger access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// API root, e.g. `https://radians.nl/api`.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Minimum time between payment polls in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Transactions per history page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Interval between node sync checks in milliseconds.
    #[serde(default = "default_sync_check_interval")]
    pub sync_check_interval_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Skip the existing history at startup.
    #[serde(default = "default_catch_up_on_start")]
    pub catch_up_on_start: bool,

    /// Maximum transactions skipped by the startup catch-up.
    #[serde(default = "default_catch_up_page_limit")]
    pub catch_up_page_limit: u64,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Publish interval in milliseconds.
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,

    /// Latitude reported without a fix.
    #[serde(default = "default_fallback_latitude")]
    pub fallback_latitude: f64,

    /// Longitude reported without a fix.
    #[serde(default = "default_fallback_longitude")]
    pub fallback_longitude: f64,
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Ride display refresh interval in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

/// Startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Maximum wait for wall-clock synchronization in seconds.
    #[serde(default = "default_time_sync_timeout")]
    pub time_sync_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            wallet: WalletConfig::default(),
            rental: RentalConfig::default(),
            ledger: LedgerConfig::default(),
            telemetry: TelemetryConfig::default(),
            display: DisplayConfig::default(),
            startup: StartupConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RentalConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            settlement_fee: default_settlement_fee(),
            settlement_amount: default_settlement_amount(),
            vendor_field: default_vendor_field(),
            uri_scheme: default_uri_scheme(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval(),
            page_size: default_page_size(),
            sync_check_interval_ms: default_sync_check_interval(),
            request_timeout_secs: default_request_timeout(),
            catch_up_on_start: default_catch_up_on_start(),
            catch_up_page_limit: default_catch_up_page_limit(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: default_publish_interval(),
            fallback_latitude: default_fallback_latitude(),
            fallback_longitude: default_fallback_longitude(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            time_sync_timeout_secs: default_time_sync_timeout(),
        }
    }
}

impl LedgerConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the cursor record.
    #[must_use]
    pub fn cursor_path(&self) -> PathBuf {
        self.root_dir.join(CURSOR_FILE_NAME)
    }

    /// Validated receiving address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address is missing or malformed.
    pub fn wallet_address(&self) -> Result<LedgerAddress> {
        if self.wallet.address.is_empty() {
            return Err(Error::Config("wallet.address is not set".to_string()));
        }
        parse_ledger_address(&self.wallet.address)
    }

    /// Validated rental rate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero rate.
    pub fn rental_rate(&self) -> Result<RentalRate> {
        RentalRate::new(self.rental.rate)
    }

    /// Settlement amount and fee.
    #[must_use]
    pub const fn settlement_terms(&self) -> SettlementTerms {
        SettlementTerms {
            amount: self.rental.settlement_amount,
            fee: self.rental.settlement_fee,
        }
    }

    /// Check every value the controller depends on.
    ///
    /// Called once at boot; any violation is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.wallet_address()?;
        self.rental_rate()?;

        if self.rental.settlement_amount == 0 {
            return Err(Error::Config(
                "rental.settlement_amount must be greater than zero".to_string(),
            ));
        }
        if self.rental.uri_scheme.is_empty() {
            return Err(Error::Config("rental.uri_scheme is empty".to_string()));
        }
        if self.ledger.api_url.is_empty() {
            return Err(Error::Config("ledger.api_url is empty".to_string()));
        }
        if self.ledger.page_size == 0 {
            return Err(Error::Config("ledger.page_size must be at least 1".to_string()));
        }

        for (name, value) in [
            ("ledger.poll_interval_ms", self.ledger.poll_interval_ms),
            ("ledger.sync_check_interval_ms", self.ledger.sync_check_interval_ms),
            ("ledger.request_timeout_secs", self.ledger.request_timeout_secs),
            ("telemetry.publish_interval_ms", self.telemetry.publish_interval_ms),
            ("display.refresh_interval_ms", self.display.refresh_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}

fn default_root_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "scooter-node").map_or_else(
        || PathBuf::from(".scooter"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_rate() -> u64 {
    DEFAULT_RENTAL_RATE
}

const fn default_settlement_fee() -> u64 {
    DEFAULT_SETTLEMENT_FEE
}

const fn default_settlement_amount() -> u64 {
    DEFAULT_SETTLEMENT_AMOUNT
}

fn default_vendor_field() -> String {
    "Ride End: ".to_string()
}

fn default_uri_scheme() -> String {
    "rad".to_string()
}

fn default_api_url() -> String {
    "https://radians.nl/api".to_string()
}

const fn default_poll_interval() -> u64 {
    8_000
}

const fn default_page_size() -> u32 {
    1
}

const fn default_sync_check_interval() -> u64 {
    10_000
}

const fn default_request_timeout() -> u64 {
    10
}

const fn default_catch_up_on_start() -> bool {
    true
}

const fn default_catch_up_page_limit() -> u64 {
    10_000
}

const fn default_publish_interval() -> u64 {
    15_000
}

const fn default_fallback_latitude() -> f64 {
    DEFAULT_FALLBACK_LATITUDE
}

const fn default_fallback_longitude() -> f64 {
    DEFAULT_FALLBACK_LONGITUDE
}

const fn default_refresh_interval() -> u64 {
    1_000
}

const fn default_time_sync_timeout() -> u64 {
    30
}
