//! Ledger wallet addresses.
//!
//! Handles parsing and validation of the base58 wallet address the scooter
//! receives rental payments on.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a ledger address in characters.
pub const LEDGER_ADDRESS_LEN: usize = 34;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// A validated base58 ledger address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerAddress(String);

impl LedgerAddress {
    /// The address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LedgerAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        parse_ledger_address(&value)
    }
}

impl From<LedgerAddress> for String {
    fn from(address: LedgerAddress) -> Self {
        address.0
    }
}

impl std::str::FromStr for LedgerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_ledger_address(s)
    }
}

/// Parse a ledger address string.
///
/// # Arguments
///
/// * `address` - Base58 address string (e.g., "TRXA2NUACckkYwWnS9JRkATQA453ukAcD1")
///
/// # Errors
///
/// Returns an error if the address format is invalid.
pub fn parse_ledger_address(address: &str) -> Result<LedgerAddress> {
    if address.len() != LEDGER_ADDRESS_LEN {
        return Err(Error::Config(format!(
            "Invalid ledger address length: expected {LEDGER_ADDRESS_LEN} characters, got {}",
            address.len()
        )));
    }

    if let Some(bad) = address.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(Error::Config(format!(
            "Invalid ledger address: '{bad}' is not a base58 character in {address}"
        )));
    }

    Ok(LedgerAddress(address.to_string()))
}

/// Validate that a ledger address is properly formatted.
///
/// # Returns
///
/// `true` if the address is valid, `false` otherwise.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    parse_ledger_address(address).is_ok()
}
