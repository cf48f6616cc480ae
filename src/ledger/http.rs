//! HTTP transport for the ledger's public REST API.
//!
//! Decoding is split from I/O: the `parse_*` functions take the decoded JSON
//! body and map every missing or ill-typed field the reconciler depends on to
//! [`Error::MalformedLedgerResponse`]. Amounts, balances and nonces travel as
//! decimal strings.

use crate::error::{Error, Result};
use crate::ledger::{
    AssetGps, LedgerAddress, LedgerTransport, ReceivedTx, RentalStartAsset, SendReceipt,
    SignedTransaction, TxKind, WalletSummary,
};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

/// `reqwest`-backed [`LedgerTransport`].
pub struct HttpLedgerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://radians.nl/api`
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("scooter-node/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Ledger(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// API root this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn received_url(&self, address: &LedgerAddress, page: u64, limit: u32) -> String {
        format!(
            "{}/wallets/{address}/transactions/received?page={page}&limit={limit}&orderBy=timestamp:asc",
            self.base_url
        )
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Ledger(format!("Ledger request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Ledger(format!(
                "Ledger returned status: {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::MalformedLedgerResponse(format!("Body is not JSON: {e}")))?;
        trace!("Ledger response: {body}");
        Ok(body)
    }
}

#[async_trait]
impl LedgerTransport for HttpLedgerClient {
    async fn node_synced(&self) -> Result<bool> {
        let body = self
            .get_json(&format!("{}/node/status", self.base_url))
            .await?;
        parse_node_status(&body)
    }

    async fn wallet_summary(&self, address: &LedgerAddress) -> Result<WalletSummary> {
        let body = self
            .get_json(&format!("{}/wallets/{address}", self.base_url))
            .await?;
        parse_wallet(&body)
    }

    async fn received_page(
        &self,
        address: &LedgerAddress,
        page: u64,
        limit: u32,
    ) -> Result<Vec<ReceivedTx>> {
        let body = self.get_json(&self.received_url(address, page, limit)).await?;
        parse_received_page(&body)
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> Result<SendReceipt> {
        let url = format!("{}/transactions", self.base_url);
        let payload = serde_json::json!({ "transactions": [signed.json] });
        debug!("POST {url} ({})", signed.id);
        trace!("Transaction payload: {payload}");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::SendFailure(format!("Transaction post failed: {e}")))?;

        // Rejections come back as 4xx with the same body shape.
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            Error::SendFailure(format!("Transaction post returned {status} without JSON: {e}"))
        })?;
        trace!("Send response: {body}");
        parse_send_response(&body)
    }
}

fn malformed(what: impl Into<String>) -> Error {
    Error::MalformedLedgerResponse(what.into())
}

fn data(body: &Value) -> Result<&Value> {
    body.get("data").ok_or_else(|| malformed("missing 'data'"))
}

fn str_field<'a>(obj: &'a Value, name: &str) -> Result<&'a str> {
    obj.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("missing or non-string '{name}'")))
}

/// Decimal string or JSON integer.
fn decimal(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn decimal_field(obj: &Value, name: &str) -> Result<u64> {
    obj.get(name)
        .and_then(decimal)
        .ok_or_else(|| malformed(format!("missing or non-decimal '{name}'")))
}

/// Decimal-degree string or JSON number.
fn degrees(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Decode `GET /node/status`.
///
/// # Errors
///
/// Returns [`Error::MalformedLedgerResponse`] if `data.synced` is missing.
pub fn parse_node_status(body: &Value) -> Result<bool> {
    data(body)?
        .get("synced")
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed("missing or non-boolean 'synced'"))
}

/// Decode `GET /wallets/{address}`.
///
/// # Errors
///
/// Returns [`Error::MalformedLedgerResponse`] if balance or nonce is missing.
pub fn parse_wallet(body: &Value) -> Result<WalletSummary> {
    let data = data(body)?;
    Ok(WalletSummary {
        balance: decimal_field(data, "balance")?,
        nonce: decimal_field(data, "nonce")?,
    })
}

/// Decode `GET /wallets/{address}/transactions/received`.
///
/// An empty `data` array means the page is past the end of the history.
///
/// # Errors
///
/// Returns [`Error::MalformedLedgerResponse`] if any transaction on the page
/// lacks a field the reconciler needs.
pub fn parse_received_page(body: &Value) -> Result<Vec<ReceivedTx>> {
    data(body)?
        .as_array()
        .ok_or_else(|| malformed("'data' is not an array"))?
        .iter()
        .map(parse_received_tx)
        .collect()
}

fn parse_received_tx(tx: &Value) -> Result<ReceivedTx> {
    let id = str_field(tx, "id")?.to_string();
    let type_id = tx
        .get("type")
        .and_then(Value::as_u64)
        .and_then(|t| u16::try_from(t).ok())
        .ok_or_else(|| malformed(format!("transaction {id}: bad 'type'")))?;
    let type_group = tx
        .get("typeGroup")
        .and_then(Value::as_u64)
        .and_then(|g| u32::try_from(g).ok())
        .ok_or_else(|| malformed(format!("transaction {id}: bad 'typeGroup'")))?;
    let kind = TxKind {
        type_id,
        type_group,
    };

    let asset = if kind.is_rental_start() {
        let asset = tx
            .get("asset")
            .ok_or_else(|| malformed(format!("rental start {id}: missing 'asset'")))?;
        Some(parse_rental_asset(asset).map_err(|e| malformed(format!("rental start {id}: {e}")))?)
    } else {
        None
    };

    Ok(ReceivedTx {
        kind,
        amount: decimal_field(tx, "amount")?,
        sender: str_field(tx, "sender")?.to_string(),
        sender_public_key: str_field(tx, "senderPublicKey")?.to_string(),
        vendor_field: tx
            .get("vendorField")
            .and_then(Value::as_str)
            .map(str::to_string),
        asset,
        id,
    })
}

fn parse_rental_asset(asset: &Value) -> Result<RentalStartAsset> {
    let session_id = str_field(asset, "sessionId")?.to_string();
    let rate = asset.get("rate").and_then(decimal);
    let gps = asset.get("gps").and_then(|gps| {
        Some(AssetGps {
            timestamp: gps.get("timestamp").and_then(decimal),
            latitude: gps.get("latitude").and_then(degrees)?,
            longitude: gps.get("longitude").and_then(degrees)?,
        })
    });

    Ok(RentalStartAsset {
        session_id,
        rate,
        gps,
    })
}

/// Decode `POST /transactions`.
///
/// # Errors
///
/// Returns [`Error::SendFailure`] if the body carries no `accept` list.
pub fn parse_send_response(body: &Value) -> Result<SendReceipt> {
    let ids = |name: &str| -> Option<Vec<String>> {
        body.get("data")?
            .get(name)?
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
    };

    let accepted = ids("accept").ok_or_else(|| {
        Error::SendFailure(format!("Send response has no accept list: {body}"))
    })?;

    Ok(SendReceipt {
        accepted,
        invalid: ids("invalid").unwrap_or_default(),
    })
}
