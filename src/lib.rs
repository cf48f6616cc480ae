//! # scooter-node
//!
//! Payment-gated rental session controller for an unattended scooter.
//!
//! The scooter displays a one-time offer, watches its wallet on a public
//! ledger for a payment carrying that offer's session identifier, unlocks
//! for the paid number of seconds, then locks again and posts a settlement
//! transaction back to the renter.
//!
//! ## Architecture
//!
//! - [`session`]: the rental state machine and the controller driving it
//! - [`ledger`]: ledger transport, payment reconciliation and the in-memory
//!   ledger
//! - [`storage`]: the persisted reconciliation cursor
//! - [`offer`]: session identifiers and offer payloads
//! - [`peripherals`]: traits for links, position, display, lock, clock
//! - [`telemetry`]: periodic status packets
//! - [`devnet`]: a complete scooter against a simulated ledger
//!
//! ## Example
//!
//! ```rust,no_run
//! use scooter_node::devnet::{Devnet, DevnetConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut devnet = Devnet::new(DevnetConfig::minimal()).await?;
//!     let report = devnet.run().await?;
//!     println!("{} rides settled", report.rides.len());
//!     devnet.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod devnet;
pub mod error;
pub mod ledger;
pub mod offer;
pub mod peripherals;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use ledger::{HttpLedgerClient, LedgerAddress, LedgerTransport, Reconciler, SimulatedLedger};
pub use offer::{Offer, OfferGenerator, SessionId};
pub use session::{ControllerBuilder, Peripherals, RentalRecord, RentalStatus, SessionController, State};
pub use storage::{CursorStore, FileByteStore, MemoryByteStore};
