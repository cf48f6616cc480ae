//! Rental session control.
//!
//! - [`state`]: the pure state machine (`plan`, `transition`)
//! - [`record`]: the rental record it drives
//! - [`settlement`]: the closing transaction
//! - [`controller`]: the tick loop wiring the machine to the ledger and
//!   the hardware

mod controller;
mod record;
pub mod settlement;
mod state;

pub use controller::{ControllerBuilder, ControllerStats, Peripherals, SessionController};
pub use record::{
    session_seconds, RentalRate, RentalRecord, RentalStatus, VendorField, Waypoint,
    VENDOR_FIELD_MAX_LEN,
};
pub use settlement::{
    micro_degrees, settlement_vendor_field, SettlementPoint, SettlementRequest, SettlementTerms,
    TransactionSigner,
};
pub use state::{
    plan, transition, Action, Events, OfferEvent, Plan, Preconditions, RideTimer, State,
    Transition,
};
