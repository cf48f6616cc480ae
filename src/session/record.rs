//! The rental record and the values it is built from.

use crate::error::{Error, Result};
use crate::offer::SessionId;
use crate::peripherals::PositionFix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Maximum vendor field length in bytes.
pub const VENDOR_FIELD_MAX_LEN: usize = 255;

/// Rental status label shown on the display and in telemetry.
///
/// A label only: control flow is driven by the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RentalStatus {
    /// Ready to rent.
    Available,
    /// A ride is in progress.
    Rented,
    /// A precondition is missing.
    Broken,
    /// Charging.
    Charging,
}

impl RentalStatus {
    /// Label as published.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Rented => "Rented",
            Self::Broken => "Broken",
            Self::Charging => "Charging",
        }
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rental rate in minor units per second. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RentalRate(NonZeroU64);

impl RentalRate {
    /// Validate a configured rate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero rate.
    pub fn new(units_per_second: u64) -> Result<Self> {
        NonZeroU64::new(units_per_second)
            .map(Self)
            .ok_or_else(|| Error::Config("rental rate must be greater than zero".to_string()))
    }

    /// Minor units per second.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RentalRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ride length bought by `amount`: `floor(amount / rate)` seconds.
#[must_use]
pub const fn session_seconds(amount: u64, rate: RentalRate) -> u64 {
    amount / rate.0.get()
}

/// Length-checked settlement annotation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VendorField(String);

impl VendorField {
    /// Validate `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if `text` is longer than
    /// [`VENDOR_FIELD_MAX_LEN`] bytes.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.len() > VENDOR_FIELD_MAX_LEN {
            return Err(Error::Session(format!(
                "vendor field is {} bytes, limit is {VENDOR_FIELD_MAX_LEN}",
                text.len()
            )));
        }
        Ok(Self(text))
    }

    /// The annotation text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where and when a ride started or finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    /// Unix time, `None` if the wall clock was unsynchronized.
    pub unix_time: Option<u64>,
    /// Position, `None` without a fix.
    pub position: Option<PositionFix>,
}

/// The current rental session.
#[derive(Debug, Clone, PartialEq)]
pub struct RentalRecord {
    /// Display/telemetry label.
    pub status: RentalStatus,
    rate: RentalRate,
    session_id: Option<SessionId>,
    counterparty: Option<String>,
    payment_amount: Option<u64>,
    start: Option<Waypoint>,
    end: Option<Waypoint>,
    vendor_field: VendorField,
}

impl RentalRecord {
    /// Fresh record at `rate`.
    #[must_use]
    pub fn new(rate: RentalRate) -> Self {
        Self {
            status: RentalStatus::Broken,
            rate,
            session_id: None,
            counterparty: None,
            payment_amount: None,
            start: None,
            end: None,
            vendor_field: VendorField::default(),
        }
    }

    /// Configured rate.
    #[must_use]
    pub const fn rate(&self) -> RentalRate {
        self.rate
    }

    /// Session identifier of the open offer.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Payer of the current session.
    #[must_use]
    pub fn counterparty(&self) -> Option<&str> {
        self.counterparty.as_deref()
    }

    /// Amount paid for the current session.
    #[must_use]
    pub const fn payment_amount(&self) -> Option<u64> {
        self.payment_amount
    }

    /// Ride start.
    #[must_use]
    pub const fn start(&self) -> Option<&Waypoint> {
        self.start.as_ref()
    }

    /// Ride finish.
    #[must_use]
    pub const fn end(&self) -> Option<&Waypoint> {
        self.end.as_ref()
    }

    /// Settlement annotation.
    #[must_use]
    pub fn vendor_field(&self) -> &VendorField {
        &self.vendor_field
    }

    /// Seconds bought by the recorded payment.
    #[must_use]
    pub fn session_seconds(&self) -> Option<u64> {
        self.payment_amount
            .map(|amount| session_seconds(amount, self.rate))
    }

    /// Start a new session for a freshly issued offer.
    pub fn reset_for_offer(&mut self, session_id: SessionId) {
        self.clear();
        self.session_id = Some(session_id);
    }

    /// Record the matched payment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if no offer is open or a payment was
    /// already recorded for this session.
    pub fn record_payment(&mut self, counterparty: &str, amount: u64) -> Result<()> {
        if self.session_id.is_none() {
            return Err(Error::Session("payment without an open offer".to_string()));
        }
        if self.payment_amount.is_some() {
            return Err(Error::Session(
                "payment already recorded for this session".to_string(),
            ));
        }
        self.counterparty = Some(counterparty.to_string());
        self.payment_amount = Some(amount);
        Ok(())
    }

    /// Record the ride start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if no payment was recorded.
    pub fn begin_ride(&mut self, at: Waypoint) -> Result<()> {
        if self.payment_amount.is_none() {
            return Err(Error::Session("ride started before payment".to_string()));
        }
        self.start = Some(at);
        Ok(())
    }

    /// Record the ride finish and the settlement annotation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the ride never started or the
    /// annotation is too long.
    pub fn finish_ride(&mut self, at: Waypoint, vendor_field: VendorField) -> Result<()> {
        if self.start.is_none() {
            return Err(Error::Session("ride finished before it started".to_string()));
        }
        self.end = Some(at);
        self.vendor_field = vendor_field;
        Ok(())
    }

    /// Drop all session data. The rate is kept.
    pub fn clear(&mut self) {
        self.session_id = None;
        self.counterparty = None;
        self.payment_amount = None;
        self.start = None;
        self.end = None;
        self.vendor_field = VendorField::default();
    }
}
