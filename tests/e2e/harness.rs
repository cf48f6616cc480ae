//! Test harness around one controller.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use parking_lot::Mutex;
use scooter_node::devnet::{
    scan_offer, DevnetHardware, DevnetSigner, ScannedOffer, DEVNET_RENTER_ADDRESS,
    DEVNET_WALLET_ADDRESS,
};
use scooter_node::error::{Error, Result};
use scooter_node::storage::ByteStore;
use scooter_node::{
    ControllerBuilder, MemoryByteStore, NodeConfig, SessionController, SimulatedLedger, State,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Virtual time per tick.
pub const TICK_MS: u64 = 1_000;

/// Rate used by the tests.
pub const RATE: u64 = 61_667;

/// Renter paying the offers.
pub const RENTER: &str = DEVNET_RENTER_ADDRESS;

/// Unrelated sender.
pub const STRANGER: &str = "TCYU4Pk8DWxyo6qSkqM3ksc8nEbNxeWtgE";

/// Configuration with catch-up disabled and no time-sync wait.
pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.wallet.address = DEVNET_WALLET_ADDRESS.to_string();
    config.rental.rate = RATE;
    config.ledger.catch_up_on_start = false;
    config.startup.time_sync_timeout_secs = 0;
    config
}

/// Byte store whose writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryByteStore,
    failing: Arc<AtomicBool>,
    writes: Arc<Mutex<u64>>,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryByteStore {
        &self.inner
    }
}

impl ByteStore for FlakyStore {
    fn read_cursor(&self) -> Result<Option<Vec<u8>>> {
        self.inner.read_cursor()
    }

    fn write_cursor(&mut self, bytes: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("flash write failed".to_string()));
        }
        *self.writes.lock() += 1;
        self.inner.write_cursor(bytes)
    }
}

/// One scooter under test.
pub struct TestHarness {
    pub ledger: SimulatedLedger,
    pub hardware: DevnetHardware,
    pub controller: SessionController,
}

impl TestHarness {
    /// Boot a controller over `ledger`, persisting the cursor in `store`
    /// (or under `config.root_dir` when `None`).
    pub async fn setup(
        config: NodeConfig,
        ledger: SimulatedLedger,
        store: Option<Box<dyn ByteStore>>,
    ) -> Result<Self> {
        let hardware = DevnetHardware::new(&config);
        let mut builder =
            ControllerBuilder::new(config, hardware.peripherals(), Arc::new(DevnetSigner))
                .with_transport(Arc::new(ledger.clone()));
        if let Some(store) = store {
            builder = builder.with_byte_store(store);
        }
        let controller = builder.build().await?;
        Ok(Self {
            ledger,
            hardware,
            controller,
        })
    }

    /// Boot with the test configuration over `ledger` and `store`.
    pub async fn boot(ledger: &SimulatedLedger, store: &MemoryByteStore) -> Self {
        let store: Box<dyn ByteStore> = Box::new(store.clone());
        Self::setup(test_config(), ledger.clone(), Some(store))
            .await
            .expect("controller boots")
    }

    /// Advance the clock one tick and evaluate.
    pub async fn tick(&mut self) -> State {
        self.hardware.clock.advance_ms(TICK_MS);
        self.controller.tick().await.clone()
    }

    /// Tick until `done` holds, at most `max_ticks` times.
    pub async fn tick_until(
        &mut self,
        max_ticks: usize,
        done: impl Fn(&State) -> bool,
    ) -> Option<State> {
        for _ in 0..max_ticks {
            let state = self.tick().await;
            if done(&state) {
                return Some(state);
            }
        }
        None
    }

    /// Tick `n` times.
    pub async fn run_ticks(&mut self, n: usize) -> State {
        let mut state = self.controller.state().clone();
        for _ in 0..n {
            state = self.tick().await;
        }
        state
    }

    /// Tick until an offer is displayed and scan it.
    pub async fn await_offer(&mut self) -> ScannedOffer {
        self.tick_until(20, |s| matches!(s, State::AwaitingPayment { .. }))
            .await
            .expect("offer issued");
        let payload = self.hardware.display.current_offer().expect("offer shown");
        scan_offer(&payload).expect("offer scans")
    }

    /// Tick until a ride starts.
    pub async fn await_ride(&mut self) -> bool {
        self.tick_until(40, State::is_active).await.is_some()
    }

    /// Pay `offer` for `seconds` of riding; returns the history index.
    pub fn pay(&self, offer: &ScannedOffer, seconds: u64) -> u64 {
        self.ledger
            .push_rental_start(RENTER, offer.rate * seconds, &offer.session_hex)
    }
}
