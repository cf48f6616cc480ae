//! Settlement transaction.
//!
//! When a ride ends the scooter posts one closing transaction back to the
//! renter. It records where and when the ride started and finished and
//! carries the session identifier of the offer that was paid. Signing is
//! delegated to a [`TransactionSigner`].

use crate::error::{Error, Result};
use crate::ledger::{SignedTransaction, RENTAL_TYPE_GROUP};
use crate::offer::SessionId;
use crate::session::record::{RentalRecord, VendorField, Waypoint};
use serde_json::{json, Value};

/// Type id of the rental-finish custom transaction.
pub const RENTAL_FINISH_TYPE: u16 = 501;

/// Default settlement fee in minor units.
pub const DEFAULT_SETTLEMENT_FEE: u64 = 10_000_000;

/// Default settlement amount in minor units. The ledger rejects zero.
pub const DEFAULT_SETTLEMENT_AMOUNT: u64 = 1;

/// Degrees to integer micro-degrees, truncated toward zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn micro_degrees(degrees: f64) -> i64 {
    (degrees * 1_000_000.0) as i64
}

/// Fixed settlement parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementTerms {
    /// Amount sent back to the renter.
    pub amount: u64,
    /// Network fee.
    pub fee: u64,
}

impl Default for SettlementTerms {
    fn default() -> Self {
        Self {
            amount: DEFAULT_SETTLEMENT_AMOUNT,
            fee: DEFAULT_SETTLEMENT_FEE,
        }
    }
}

/// One end of a ride as encoded on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPoint {
    /// Unix time, 0 if unknown.
    pub timestamp: u64,
    /// Latitude in micro-degrees.
    pub latitude: i64,
    /// Longitude in micro-degrees.
    pub longitude: i64,
}

impl From<&Waypoint> for SettlementPoint {
    fn from(waypoint: &Waypoint) -> Self {
        let (latitude, longitude) = waypoint
            .position
            .map_or((0, 0), |p| (micro_degrees(p.latitude), micro_degrees(p.longitude)));
        Self {
            timestamp: waypoint.unix_time.unwrap_or(0),
            latitude,
            longitude,
        }
    }
}

/// Unsigned settlement transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    /// Renter address.
    pub recipient: String,
    /// Amount in minor units.
    pub amount: u64,
    /// Fee in minor units.
    pub fee: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Session the ride belonged to.
    pub session_id: SessionId,
    /// Whether a refund is included. Always false.
    pub contains_refund: bool,
    /// Ride start (index 0).
    pub start: SettlementPoint,
    /// Ride finish (index 1).
    pub finish: SettlementPoint,
    /// Annotation.
    pub vendor_field: VendorField,
}

impl SettlementRequest {
    /// Build the settlement for a finished ride.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settlement`] if the record has no payer, session,
    /// start or finish.
    pub fn from_record(record: &RentalRecord, terms: SettlementTerms, nonce: u64) -> Result<Self> {
        let missing = |what: &str| Error::Settlement(format!("rental record has no {what}"));

        Ok(Self {
            recipient: record
                .counterparty()
                .ok_or_else(|| missing("counterparty"))?
                .to_string(),
            amount: terms.amount,
            fee: terms.fee,
            nonce,
            session_id: *record.session_id().ok_or_else(|| missing("session"))?,
            contains_refund: false,
            start: record.start().ok_or_else(|| missing("ride start"))?.into(),
            finish: record.end().ok_or_else(|| missing("ride finish"))?.into(),
            vendor_field: record.vendor_field().clone(),
        })
    }

    /// Custom asset as carried on the ledger.
    #[must_use]
    pub fn asset_json(&self) -> Value {
        let point = |p: &SettlementPoint| {
            json!({
                "timestamp": p.timestamp,
                "latitude": p.latitude.to_string(),
                "longitude": p.longitude.to_string(),
            })
        };
        json!({
            "gps": [point(&self.start), point(&self.finish)],
            "sessionId": self.session_id.to_hex(),
            "containsRefund": self.contains_refund,
        })
    }

    /// Unsigned transaction body; signers add key material and the id.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "version": 2,
            "type": RENTAL_FINISH_TYPE,
            "typeGroup": RENTAL_TYPE_GROUP,
            "nonce": self.nonce.to_string(),
            "amount": self.amount.to_string(),
            "fee": self.fee.to_string(),
            "recipientId": self.recipient,
            "vendorField": self.vendor_field.as_str(),
            "asset": self.asset_json(),
        })
    }
}

/// Settlement annotation: `prefix` followed by the hex session identifier.
///
/// # Errors
///
/// Returns [`Error::Session`] if the result exceeds the vendor field limit.
pub fn settlement_vendor_field(prefix: &str, session_id: &SessionId) -> Result<VendorField> {
    VendorField::new(format!("{prefix}{session_id}"))
}

/// Signs settlement transactions.
pub trait TransactionSigner: Send + Sync {
    /// Sign `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settlement`] if signing fails.
    fn sign(&self, request: &SettlementRequest) -> Result<SignedTransaction>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::peripherals::PositionFix;
    use crate::session::RentalRate;

    fn finished_record() -> RentalRecord {
        let session_id = SessionId::from_seed(1);
        let mut record = RentalRecord::new(RentalRate::new(5).expect("rate"));
        record.reset_for_offer(session_id);
        record
            .record_payment("TLdYHTKRSD3rG66zsytqpAgJDX75qbcvgT", 50)
            .expect("payment");
        record
            .begin_ride(Waypoint {
                unix_time: Some(1_583_125_216),
                position: Some(PositionFix::at(1.111_111_9, -180.222_222_9)),
            })
            .expect("begin");
        record
            .finish_ride(
                Waypoint {
                    unix_time: None,
                    position: None,
                },
                settlement_vendor_field("Ride End: ", &session_id).expect("vendor field"),
            )
            .expect("finish");
        record
    }

    #[test]
    fn test_micro_degrees_truncate_toward_zero() {
        assert_eq!(micro_degrees(1.111_111_9), 1_111_111);
        assert_eq!(micro_degrees(-180.222_222_9), -180_222_222);
        assert_eq!(micro_degrees(0.0), 0);
    }

    #[test]
    fn test_request_from_record() {
        let request =
            SettlementRequest::from_record(&finished_record(), SettlementTerms::default(), 41)
                .expect("request");

        assert_eq!(request.recipient, "TLdYHTKRSD3rG66zsytqpAgJDX75qbcvgT");
        assert_eq!(request.amount, 1);
        assert_eq!(request.fee, 10_000_000);
        assert_eq!(request.nonce, 41);
        assert!(!request.contains_refund);
        assert_eq!(request.start.timestamp, 1_583_125_216);
        assert_eq!(request.start.latitude, 1_111_111);
        assert_eq!(request.finish.timestamp, 0);
        assert_eq!(request.finish.latitude, 0);
        assert!(request
            .vendor_field
            .as_str()
            .starts_with("Ride End: 6b86b273"));
    }

    #[test]
    fn test_request_requires_finished_ride() {
        let mut record = finished_record();
        record.clear();
        assert!(matches!(
            SettlementRequest::from_record(&record, SettlementTerms::default(), 1),
            Err(Error::Settlement(_))
        ));
    }

    #[test]
    fn test_json_contract() {
        let request =
            SettlementRequest::from_record(&finished_record(), SettlementTerms::default(), 41)
                .expect("request");
        let body = request.to_json();

        assert_eq!(body["type"], 501);
        assert_eq!(body["typeGroup"], 4000);
        assert_eq!(body["nonce"], "41");
        assert_eq!(body["fee"], "10000000");
        assert_eq!(body["asset"]["containsRefund"], false);
        assert_eq!(body["asset"]["gps"][0]["latitude"], "1111111");
        assert_eq!(body["asset"]["gps"][1]["timestamp"], 0);
        assert_eq!(
            body["asset"]["sessionId"],
            SessionId::from_seed(1).to_hex()
        );
    }
}
