//! Hardware collaborators of the session controller.
//!
//! Every piece of hardware the controller touches sits behind a small trait
//! so the control loop can run against real devices, the devnet simulation,
//! or test doubles alike. Sinks are fire-and-forget: they never fail the
//! caller.

use crate::session::RentalStatus;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Knots to kilometres per hour.
pub const KNOTS_TO_KMH: f64 = 1.852;

/// A satellite position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Ground speed in knots.
    pub speed_knots: f64,
    /// Satellites in view.
    pub satellites: u32,
}

impl PositionFix {
    /// Stationary fix at the given coordinates.
    #[must_use]
    pub const fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed_knots: 0.0,
            satellites: 0,
        }
    }

    /// Ground speed in km/h.
    #[must_use]
    pub fn speed_kmh(&self) -> f64 {
        self.speed_knots * KNOTS_TO_KMH
    }
}

/// Network link probes.
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the wireless link is up.
    fn wifi_connected(&self) -> bool;
    /// Whether the telemetry broker session is up.
    fn broker_connected(&self) -> bool;
}

/// Source of position fixes.
pub trait PositionSource: Send + Sync {
    /// The current fix, or `None` without one.
    fn position_fix(&self) -> Option<PositionFix>;
}

/// What the rider sees.
pub trait DisplaySink: Send + Sync {
    /// Show an offer's encoded payload (rendered as a scannable code).
    fn show_offer(&self, payload: &str);
    /// Withdraw any offer and show the idle screen.
    fn show_splash(&self);
    /// Report link and rental status.
    fn show_status(&self, status: &StatusLine);
    /// Show ride progress.
    fn show_ride(&self, remaining_secs: u64, speed_kmh: f64);
}

/// Link and rental status shown on the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    /// Rental status label.
    pub status: RentalStatus,
    /// Wireless link up.
    pub wifi: bool,
    /// Broker session up.
    pub broker: bool,
    /// Ledger node synced.
    pub ledger: bool,
    /// Position fix available.
    pub fix: bool,
}

/// Telemetry channel.
pub trait TelemetrySink: Send + Sync {
    /// Publish one encoded packet.
    fn publish(&self, packet: &str);
}

/// The physical lock on the asset.
pub trait AssetLock: Send + Sync {
    /// Release the asset for riding.
    fn unlock(&self);
    /// Lock the asset.
    fn lock(&self);
}

/// Monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;
    /// Seconds since the Unix epoch, or `None` while unsynchronized.
    fn unix_time(&self) -> Option<u64>;
}

/// Battery state of charge.
pub trait BatteryGauge: Send + Sync {
    /// State of charge in percent.
    fn percent(&self) -> u8;
}

/// Wall clock considered unsynchronized before this instant (2020-01-01).
const MIN_SYNCED_UNIX: u64 = 1_577_836_800;

/// Host clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a clock with its monotonic origin at now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn unix_time(&self) -> Option<u64> {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        (secs >= MIN_SYNCED_UNIX).then_some(secs)
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
    unix_base: Arc<Mutex<Option<u64>>>,
}

impl ManualClock {
    /// Clock at monotonic time 0 with the wall clock at `unix_base`.
    #[must_use]
    pub fn new(unix_base: Option<u64>) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(0)),
            unix_base: Arc::new(Mutex::new(unix_base)),
        }
    }

    /// Move monotonic time forward.
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the wall clock base (`None` makes it unsynchronized).
    pub fn set_unix_base(&self, unix_base: Option<u64>) {
        *self.unix_base.lock() = unix_base;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn unix_time(&self) -> Option<u64> {
        self.unix_base.lock().map(|base| base + self.now_ms() / 1000)
    }
}

/// Link flags that can be flipped at runtime. Clones share state.
#[derive(Debug, Clone)]
pub struct SharedLinks {
    wifi: Arc<AtomicBool>,
    broker: Arc<AtomicBool>,
}

impl SharedLinks {
    /// Links with the given initial state.
    #[must_use]
    pub fn new(wifi: bool, broker: bool) -> Self {
        Self {
            wifi: Arc::new(AtomicBool::new(wifi)),
            broker: Arc::new(AtomicBool::new(broker)),
        }
    }

    /// Set the wireless link state.
    pub fn set_wifi(&self, up: bool) {
        self.wifi.store(up, Ordering::SeqCst);
    }

    /// Set the broker session state.
    pub fn set_broker(&self, up: bool) {
        self.broker.store(up, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for SharedLinks {
    fn wifi_connected(&self) -> bool {
        self.wifi.load(Ordering::SeqCst)
    }

    fn broker_connected(&self) -> bool {
        self.broker.load(Ordering::SeqCst)
    }
}

/// Position source with a settable fix. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SharedPosition {
    fix: Arc<Mutex<Option<PositionFix>>>,
}

impl SharedPosition {
    /// Source reporting `fix`.
    #[must_use]
    pub fn new(fix: Option<PositionFix>) -> Self {
        Self {
            fix: Arc::new(Mutex::new(fix)),
        }
    }

    /// Replace the reported fix.
    pub fn set(&self, fix: Option<PositionFix>) {
        *self.fix.lock() = fix;
    }
}

impl PositionSource for SharedPosition {
    fn position_fix(&self) -> Option<PositionFix> {
        *self.fix.lock()
    }
}

/// Fixed battery level. Clones share state.
#[derive(Debug, Clone)]
pub struct SharedBattery(Arc<AtomicU8>);

impl SharedBattery {
    /// Gauge reading `percent`.
    #[must_use]
    pub fn new(percent: u8) -> Self {
        Self(Arc::new(AtomicU8::new(percent.min(100))))
    }

    /// Set the reading.
    pub fn set(&self, percent: u8) {
        self.0.store(percent.min(100), Ordering::SeqCst);
    }
}

impl BatteryGauge for SharedBattery {
    fn percent(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something shown on a display.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    /// Offer payload.
    Offer(String),
    /// Idle screen.
    Splash,
    /// Status bar.
    Status(StatusLine),
    /// Ride progress.
    Ride {
        /// Seconds left.
        remaining_secs: u64,
        /// Speed in km/h.
        speed_kmh: f64,
    },
}

/// Display that records every screen. Clones share the history.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    screens: Arc<Mutex<Vec<Screen>>>,
}

impl RecordingDisplay {
    /// Empty display.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All screens shown so far.
    #[must_use]
    pub fn screens(&self) -> Vec<Screen> {
        self.screens.lock().clone()
    }

    /// Payload of the most recent offer shown, if any.
    #[must_use]
    pub fn current_offer(&self) -> Option<String> {
        self.screens.lock().iter().rev().find_map(|s| match s {
            Screen::Offer(payload) => Some(payload.clone()),
            _ => None,
        })
    }
}

impl DisplaySink for RecordingDisplay {
    fn show_offer(&self, payload: &str) {
        self.screens.lock().push(Screen::Offer(payload.to_string()));
    }

    fn show_splash(&self) {
        self.screens.lock().push(Screen::Splash);
    }

    fn show_status(&self, status: &StatusLine) {
        self.screens.lock().push(Screen::Status(*status));
    }

    fn show_ride(&self, remaining_secs: u64, speed_kmh: f64) {
        self.screens.lock().push(Screen::Ride {
            remaining_secs,
            speed_kmh,
        });
    }
}

/// Telemetry sink that keeps every packet. Clones share the history.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    packets: Arc<Mutex<Vec<String>>>,
}

impl RecordingTelemetry {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets published so far.
    #[must_use]
    pub fn packets(&self) -> Vec<String> {
        self.packets.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn publish(&self, packet: &str) {
        self.packets.lock().push(packet.to_string());
    }
}

/// Lock that tracks its state. Clones share state.
#[derive(Debug, Clone)]
pub struct SharedLock {
    unlocked: Arc<AtomicBool>,
    unlocks: Arc<AtomicU64>,
}

impl SharedLock {
    /// A locked asset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unlocked: Arc::new(AtomicBool::new(false)),
            unlocks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the asset is currently unlocked.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Number of unlocks so far.
    #[must_use]
    pub fn unlock_count(&self) -> u64 {
        self.unlocks.load(Ordering::SeqCst)
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLock for SharedLock {
    fn unlock(&self) {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        self.unlocked.store(true, Ordering::SeqCst);
    }

    fn lock(&self) {
        self.unlocked.store(false, Ordering::SeqCst);
    }
}

/// Display that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn show_offer(&self, payload: &str) {
        info!("Display: offer {payload}");
    }

    fn show_splash(&self) {
        info!("Display: splash");
    }

    fn show_status(&self, status: &StatusLine) {
        info!(
            "Display: {} wifi={} broker={} ledger={} fix={}",
            status.status, status.wifi, status.broker, status.ledger, status.fix
        );
    }

    fn show_ride(&self, remaining_secs: u64, speed_kmh: f64) {
        info!("Display: {remaining_secs}s left, {speed_kmh:.1} km/h");
    }
}
