//! Rental offer generation.
//!
//! An offer ties one advertised rental to the one payment expected to answer
//! it. Its session identifier is the SHA-256 of the decimal rendering of a
//! fresh random seed, so it cannot be predicted from earlier offers. The
//! renter's wallet copies the identifier into the rental-start transaction,
//! and the reconciler matches on it.

use crate::error::{Error, Result};
use crate::ledger::LedgerAddress;
use crate::peripherals::PositionFix;
use crate::session::RentalRate;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};

/// Maximum encoded offer payload length.
pub const OFFER_PAYLOAD_MAX_LEN: usize = 256;

/// Seed draws allowed before giving up on a repeated identifier.
const MAX_SEED_DRAWS: usize = 4;

/// 32-byte session identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 32]);

impl SessionId {
    /// Identifier for `seed`: SHA-256 of its decimal string.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        let digest = Sha256::digest(seed.to_string().as_bytes());
        Self(digest.into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether `hex_id` encodes this identifier (case-insensitive).
    #[must_use]
    pub fn matches_hex(&self, hex_id: &str) -> bool {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_id, &mut bytes).is_ok() && bytes == self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.to_hex())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Length-checked offer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferPayload(String);

impl OfferPayload {
    /// Validate an encoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offer`] if the payload exceeds
    /// [`OFFER_PAYLOAD_MAX_LEN`] bytes.
    pub fn new(text: String) -> Result<Self> {
        if text.len() > OFFER_PAYLOAD_MAX_LEN {
            return Err(Error::Offer(format!(
                "offer payload is {} bytes, limit is {OFFER_PAYLOAD_MAX_LEN}",
                text.len()
            )));
        }
        Ok(Self(text))
    }

    /// Encoded payload.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfferPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An advertised rental offer.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    /// Identifier the payment must carry.
    pub session_id: SessionId,
    /// Encoded payload for display.
    pub payload: OfferPayload,
    /// Rate advertised.
    pub rate: RentalRate,
    /// Position advertised.
    pub position: PositionFix,
}

/// Encode an offer as `{scheme}:{address}?hash=..&rate=..&lat=..&lon=..`.
///
/// # Errors
///
/// Returns [`Error::Offer`] if the encoding is too long.
pub fn encode_offer_uri(
    scheme: &str,
    address: &LedgerAddress,
    session_id: &SessionId,
    rate: RentalRate,
    position: &PositionFix,
) -> Result<OfferPayload> {
    OfferPayload::new(format!(
        "{scheme}:{address}?hash={session_id}&rate={rate}&lat={:.6}&lon={:.6}",
        position.latitude, position.longitude
    ))
}

/// Source of unpredictable seeds.
pub trait SeedSource: Send {
    /// Draw one seed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offer`] if the source cannot be sampled.
    fn next_seed(&mut self) -> Result<u64>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::Offer(format!("random source unavailable: {e}")))?;
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Produces offers for one asset.
pub struct OfferGenerator {
    address: LedgerAddress,
    rate: RentalRate,
    uri_scheme: String,
    seeds: Box<dyn SeedSource>,
    last: Option<SessionId>,
}

impl OfferGenerator {
    /// Create a generator.
    ///
    /// # Arguments
    ///
    /// * `address` - Wallet the renter pays
    /// * `rate` - Advertised rate
    /// * `uri_scheme` - Payload URI scheme (e.g. `rad`)
    /// * `seeds` - Seed source
    #[must_use]
    pub fn new(
        address: LedgerAddress,
        rate: RentalRate,
        uri_scheme: impl Into<String>,
        seeds: Box<dyn SeedSource>,
    ) -> Self {
        Self {
            address,
            rate,
            uri_scheme: uri_scheme.into(),
            seeds,
            last: None,
        }
    }

    /// Identifier of the most recent offer.
    #[must_use]
    pub fn last_session_id(&self) -> Option<&SessionId> {
        self.last.as_ref()
    }

    /// Generate a fresh offer at `position`.
    ///
    /// The identifier never repeats the previous offer's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offer`] if the seed source fails, keeps repeating,
    /// or the payload does not fit.
    pub fn generate_offer(&mut self, position: &PositionFix) -> Result<Offer> {
        let session_id = self.fresh_session_id()?;
        let payload = encode_offer_uri(
            &self.uri_scheme,
            &self.address,
            &session_id,
            self.rate,
            position,
        )?;

        debug!("Generated offer {session_id}");
        self.last = Some(session_id);

        Ok(Offer {
            session_id,
            payload,
            rate: self.rate,
            position: *position,
        })
    }

    fn fresh_session_id(&mut self) -> Result<SessionId> {
        for _ in 0..MAX_SEED_DRAWS {
            let candidate = SessionId::from_seed(self.seeds.next_seed()?);
            if self.last.as_ref() != Some(&candidate) {
                return Ok(candidate);
            }
            warn!("Seed source repeated the previous session identifier, redrawing");
        }
        Err(Error::Offer(format!(
            "seed source repeated the previous identifier {MAX_SEED_DRAWS} times"
        )))
    }
}
