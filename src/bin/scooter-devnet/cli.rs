//! CLI definition for scooter-devnet.

use clap::{Parser, ValueEnum};
use scooter_node::config::NodeConfig;
use scooter_node::devnet::DevnetConfig;
use std::path::PathBuf;

/// Local devnet runner for scooter-node.
#[derive(Parser, Debug)]
#[command(name = "scooter-devnet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Rentals to play.
    #[arg(long, env = "SCOOTER_DEVNET_RIDES")]
    pub rides: Option<usize>,

    /// Seconds of riding paid per rental.
    #[arg(long, env = "SCOOTER_DEVNET_RIDE_SECONDS")]
    pub ride_seconds: Option<u64>,

    /// Rental rate in minor units per second.
    #[arg(long, env = "SCOOTER_RATE")]
    pub rate: Option<u64>,

    /// Historical transfers on the wallet before boot.
    #[arg(long)]
    pub history: Option<u64>,

    /// Send an unrelated transfer ahead of every payment.
    #[arg(long, default_value_t = true)]
    pub stray_payments: bool,

    /// Pay a stale session ahead of every payment.
    #[arg(long)]
    pub stale_payments: bool,

    /// Virtual milliseconds per tick.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Preset: minimal, default.
    #[arg(long)]
    pub preset: Option<String>,

    /// Data directory for the cursor file.
    #[arg(long, env = "SCOOTER_ROOT_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Remove data directory on shutdown.
    #[arg(long, default_value_t = true)]
    pub cleanup: bool,

    /// Path to a node configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Path to write the devnet report JSON.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Log level.
    #[arg(long, value_enum, default_value = "info", env = "RUST_LOG")]
    pub log_level: CliLogLevel,
}

/// Log level CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum CliLogLevel {
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace messages (verbose).
    Trace,
}

impl Cli {
    /// Convert CLI arguments into a `DevnetConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<DevnetConfig> {
        let mut config = match self.preset.as_deref() {
            Some("minimal") => DevnetConfig::minimal(),
            _ => DevnetConfig::default(),
        };

        if let Some(ref path) = self.config {
            config.node = NodeConfig::from_file(path)?;
        }

        if let Some(rides) = self.rides {
            config.rides = rides;
        }
        if let Some(seconds) = self.ride_seconds {
            config.ride_seconds = seconds;
        }
        if let Some(rate) = self.rate {
            config.node.rental.rate = rate;
        }
        if let Some(history) = self.history {
            config.history = history;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick = std::time::Duration::from_millis(tick_ms);
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        config.stray_payments = self.stray_payments;
        config.stale_payments = self.stale_payments;
        config.cleanup_data_dir = self.cleanup;
        config.node.log_level = self.log_level.into();

        Ok(config)
    }
}

impl From<CliLogLevel> for String {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => "error".to_string(),
            CliLogLevel::Warn => "warn".to_string(),
            CliLogLevel::Info => "info".to_string(),
            CliLogLevel::Debug => "debug".to_string(),
            CliLogLevel::Trace => "trace".to_string(),
        }
    }
}
