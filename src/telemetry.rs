//! Periodic telemetry packets.
//!
//! While the broker session is up the controller publishes one JSON packet
//! per interval:
//!
//! ```text
//! {"status":"Rented","fix":1,"lat":53.538,"lon":-113.275,"speed":0.74,"sat":5,"bal":99990386752,"bat":96}
//! ```
//!
//! A settlement send failure since the previous packet is reported once in
//! an extra `err` field.

use crate::error::{Error, Result};
use crate::peripherals::{PositionFix, TelemetrySink};
use crate::scheduler::Interval;
use crate::session::RentalStatus;
use serde::Serialize;
use tracing::{debug, trace};

/// Default publish interval (15 seconds).
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 15_000;

/// Default latitude reported without a fix.
pub const DEFAULT_FALLBACK_LATITUDE: f64 = 53.535_839_08;

/// Default longitude reported without a fix.
pub const DEFAULT_FALLBACK_LONGITUDE: f64 = -113.276_741_03;

/// One telemetry packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPacket {
    /// Rental status label.
    pub status: RentalStatus,
    /// 1 with a position fix, else 0.
    pub fix: u8,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Speed in km/h.
    pub speed: f64,
    /// Satellites in view.
    pub sat: u32,
    /// Wallet balance in minor units.
    pub bal: u64,
    /// Battery percent.
    pub bat: u8,
    /// Most recent settlement failure, reported once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl TelemetryPacket {
    /// Encode as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Inputs for one packet.
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySnapshot {
    /// Rental status.
    pub status: RentalStatus,
    /// Current fix.
    pub position: Option<PositionFix>,
    /// Wallet balance.
    pub balance: u64,
    /// Battery percent.
    pub battery: u8,
}

/// Throttled packet publisher.
#[derive(Debug)]
pub struct TelemetryPublisher {
    interval: Interval,
    fallback: (f64, f64),
    pending_error: Option<String>,
    published: u64,
}

impl TelemetryPublisher {
    /// Publisher whose first packet is due one interval after `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64, interval_ms: u64, fallback_latitude: f64, fallback_longitude: f64) -> Self {
        Self {
            interval: Interval::starting_at(now_ms, interval_ms),
            fallback: (fallback_latitude, fallback_longitude),
            pending_error: None,
            published: 0,
        }
    }

    /// Remember an error for the next packet.
    pub fn report_error(&mut self, error: impl Into<String>) {
        self.pending_error = Some(error.into());
    }

    /// Packets published so far.
    #[must_use]
    pub const fn published(&self) -> u64 {
        self.published
    }

    /// Build a packet from `snapshot`.
    #[must_use]
    pub fn packet(&self, snapshot: &TelemetrySnapshot) -> TelemetryPacket {
        let (fix, lat, lon, speed, sat) = match snapshot.position {
            Some(p) => (1, p.latitude, p.longitude, p.speed_kmh(), p.satellites),
            None => (0, self.fallback.0, self.fallback.1, 0.0, 0),
        };
        TelemetryPacket {
            status: snapshot.status,
            fix,
            lat,
            lon,
            speed,
            sat,
            bal: snapshot.balance,
            bat: snapshot.battery,
            err: self.pending_error.clone(),
        }
    }

    /// Publish if the interval elapsed and the broker is connected.
    ///
    /// The interval advances whether or not the broker is up. Returns true
    /// if a packet was sent.
    pub fn maybe_publish(
        &mut self,
        now_ms: u64,
        broker_connected: bool,
        snapshot: &TelemetrySnapshot,
        sink: &dyn TelemetrySink,
    ) -> bool {
        if !self.interval.fire(now_ms) || !broker_connected {
            return false;
        }

        let packet = self.packet(snapshot);
        match packet.to_json() {
            Ok(encoded) => {
                trace!("Telemetry: {encoded}");
                sink.publish(&encoded);
                self.pending_error = None;
                self.published += 1;
                true
            }
            Err(e) => {
                debug!("Dropping telemetry packet: {e}");
                false
            }
        }
    }
}
