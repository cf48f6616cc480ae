//! E2E tests for scooter-node.
//!
//! Each test boots a full [`SessionController`] against the in-memory
//! ledger with a manual clock and recording peripherals, then drives it tick
//! by tick.
//!
//! ```text
//! TestHarness
//!     ├── SimulatedLedger (shared with the test)
//!     ├── DevnetHardware (links, fix, display, lock, clock)
//!     └── SessionController
//! ```
//!
//! [`SessionController`]: scooter_node::SessionController

mod harness;

#[cfg(test)]
mod crash_recovery;
#[cfg(test)]
mod rental_flow;
