//! Session controller: the control loop.
//!
//! [`ControllerBuilder::build`] runs the startup sequence (config check,
//! bounded wait for wall-clock sync, cursor load, wallet fetch, history
//! catch-up, first ledger probe). [`SessionController::tick`] then evaluates
//! the state machine once: it samples the gates, performs the remote work
//! the machine asks for, applies the transition and executes its actions.
//! [`SessionController::run`] ticks on a fixed period until shutdown.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::ledger::{HttpLedgerClient, LedgerTransport, PollOutcome, Reconciler, ReconcilerConfig};
use crate::offer::{OfferGenerator, OsSeedSource, SeedSource};
use crate::peripherals::{
    AssetLock, BatteryGauge, Clock, ConnectivityProbe, DisplaySink, PositionSource, StatusLine,
    TelemetrySink,
};
use crate::scheduler::Interval;
use crate::session::record::{RentalRecord, VendorField, Waypoint};
use crate::session::settlement::{
    settlement_vendor_field, SettlementRequest, SettlementTerms, TransactionSigner,
};
use crate::session::state::{plan, transition, Action, Events, OfferEvent, Preconditions, State};
use crate::storage::{ByteStore, CursorStore, FileByteStore};
use crate::telemetry::{TelemetryPublisher, TelemetrySnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Poll period while waiting for wall-clock sync.
const TIME_SYNC_POLL: Duration = Duration::from_millis(250);

/// The hardware the controller drives.
#[derive(Clone)]
pub struct Peripherals {
    /// Network link probes.
    pub links: Arc<dyn ConnectivityProbe>,
    /// Position fixes.
    pub position: Arc<dyn PositionSource>,
    /// Rider display.
    pub display: Arc<dyn DisplaySink>,
    /// Telemetry channel.
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Asset lock.
    pub lock: Arc<dyn AssetLock>,
    /// Monotonic and wall-clock time.
    pub clock: Arc<dyn Clock>,
    /// Battery gauge.
    pub battery: Arc<dyn BatteryGauge>,
}

/// Controller counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Ticks evaluated.
    pub ticks: u64,
    /// Offers displayed.
    pub offers_issued: u64,
    /// Offer generation failures.
    pub offer_failures: u64,
    /// Rides started.
    pub rides_started: u64,
    /// Settlements accepted by the ledger.
    pub settlements_sent: u64,
    /// Settlements that failed to build, sign or send.
    pub settlement_failures: u64,
}

/// Builder for a [`SessionController`].
pub struct ControllerBuilder {
    config: NodeConfig,
    peripherals: Peripherals,
    signer: Arc<dyn TransactionSigner>,
    transport: Option<Arc<dyn LedgerTransport>>,
    byte_store: Option<Box<dyn ByteStore>>,
    seeds: Option<Box<dyn SeedSource>>,
}

impl ControllerBuilder {
    /// Create a builder.
    ///
    /// Unless overridden the controller talks to the ledger over HTTP,
    /// persists its cursor under `config.root_dir` and draws seeds from the
    /// operating system.
    #[must_use]
    pub fn new(
        config: NodeConfig,
        peripherals: Peripherals,
        signer: Arc<dyn TransactionSigner>,
    ) -> Self {
        Self {
            config,
            peripherals,
            signer,
            transport: None,
            byte_store: None,
            seeds: None,
        }
    }

    /// Use `transport` instead of the HTTP client.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn LedgerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persist the cursor in `store` instead of the cursor file.
    #[must_use]
    pub fn with_byte_store(mut self, store: Box<dyn ByteStore>) -> Self {
        self.byte_store = Some(store);
        self
    }

    /// Draw offer seeds from `seeds`.
    #[must_use]
    pub fn with_seed_source(mut self, seeds: Box<dyn SeedSource>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    /// Run the startup sequence and build the controller.
    ///
    /// Ledger failures during startup are logged and tolerated: the control
    /// loop starts in its wait states and recovers on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the cursor file
    /// or HTTP client cannot be set up.
    pub async fn build(self) -> Result<SessionController> {
        info!("Building scooter session controller");

        self.config.validate()?;
        let address = self.config.wallet_address()?;
        let rate = self.config.rental_rate()?;
        let clock = Arc::clone(&self.peripherals.clock);

        let time_synced = wait_for_time_sync(
            clock.as_ref(),
            Duration::from_secs(self.config.startup.time_sync_timeout_secs),
        )
        .await;
        if !time_synced {
            warn!("Wall clock not synchronized, ride timestamps will be recorded as 0");
        }

        let transport: Arc<dyn LedgerTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpLedgerClient::new(
                &self.config.ledger.api_url,
                self.config.ledger.request_timeout(),
            )?),
        };
        let byte_store: Box<dyn ByteStore> = match self.byte_store {
            Some(store) => store,
            None => Box::new(FileByteStore::open(self.config.cursor_path())?),
        };
        let seeds = self.seeds.unwrap_or_else(|| Box::new(OsSeedSource));

        let now_ms = clock.now_ms();
        let mut reconciler = Reconciler::new(
            transport,
            CursorStore::new(byte_store),
            address.clone(),
            ReconcilerConfig {
                page_size: self.config.ledger.page_size,
                poll_interval_ms: self.config.ledger.poll_interval_ms,
            },
            now_ms,
        )?;

        match reconciler.fetch_wallet_summary().await {
            Ok(wallet) => info!(
                "Wallet {address}: balance {} nonce {}",
                wallet.balance, wallet.nonce
            ),
            Err(e) => warn!("Initial wallet fetch failed: {e}"),
        }

        if self.config.ledger.catch_up_on_start {
            match reconciler
                .catch_up(self.config.ledger.catch_up_page_limit)
                .await
            {
                Ok(skipped) => debug!("Catch-up consumed {skipped} transactions"),
                Err(e) => warn!("History catch-up stopped early: {e}"),
            }
        }

        let ledger_synced = match reconciler.node_synced().await {
            Ok(synced) => synced,
            Err(e) => {
                warn!("Ledger node unreachable at startup: {e}");
                false
            }
        };

        let offers = OfferGenerator::new(address, rate, self.config.rental.uri_scheme.clone(), seeds);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            "Session controller ready (cursor {}, ledger {})",
            reconciler.cursor(),
            if ledger_synced { "synced" } else { "not synced" }
        );

        Ok(SessionController {
            state: State::Init,
            record: RentalRecord::new(rate),
            reconciler,
            offers,
            signer: self.signer,
            terms: self.config.settlement_terms(),
            vendor_prefix: self.config.rental.vendor_field.clone(),
            ledger_synced,
            time_synced,
            sync_check: Interval::starting_at(now_ms, self.config.ledger.sync_check_interval_ms),
            ride_refresh: Interval::starting_at(now_ms, self.config.display.refresh_interval_ms),
            telemetry: TelemetryPublisher::new(
                now_ms,
                self.config.telemetry.publish_interval_ms,
                self.config.telemetry.fallback_latitude,
                self.config.telemetry.fallback_longitude,
            ),
            last_status: None,
            stats: ControllerStats::default(),
            peripherals: self.peripherals,
            shutdown_tx,
            shutdown_rx,
        })
    }
}

/// Wait up to `timeout` for the wall clock to report a synchronized time.
async fn wait_for_time_sync(clock: &dyn Clock, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if clock.unix_time().is_some() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(TIME_SYNC_POLL).await;
    }
}

/// The running rental session controller.
pub struct SessionController {
    state: State,
    record: RentalRecord,
    reconciler: Reconciler,
    offers: OfferGenerator,
    signer: Arc<dyn TransactionSigner>,
    terms: SettlementTerms,
    vendor_prefix: String,
    ledger_synced: bool,
    time_synced: bool,
    sync_check: Interval,
    ride_refresh: Interval,
    telemetry: TelemetryPublisher,
    last_status: Option<StatusLine>,
    stats: ControllerStats,
    peripherals: Peripherals,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionController {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Current rental record.
    #[must_use]
    pub fn record(&self) -> &RentalRecord {
        &self.record
    }

    /// The ledger reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Whether the ledger node was synced at the last probe.
    #[must_use]
    pub const fn ledger_synced(&self) -> bool {
        self.ledger_synced
    }

    /// Whether the wall clock was synchronized at startup.
    #[must_use]
    pub const fn time_synced(&self) -> bool {
        self.time_synced
    }

    /// Telemetry packets published so far.
    #[must_use]
    pub const fn telemetry_published(&self) -> u64 {
        self.telemetry.published()
    }

    /// Snapshot of controller counters.
    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        self.stats.clone()
    }

    /// Evaluate the state machine once.
    pub async fn tick(&mut self) -> &State {
        let now_ms = self.peripherals.clock.now_ms();
        self.stats.ticks += 1;

        if self.sync_check.fire(now_ms) {
            self.ledger_synced = match self.reconciler.node_synced().await {
                Ok(synced) => synced,
                Err(e) => {
                    debug!("Ledger sync probe failed: {e}");
                    false
                }
            };
        }

        let pre = Preconditions {
            wifi: self.peripherals.links.wifi_connected(),
            broker: self.peripherals.links.broker_connected(),
            ledger_synced: self.ledger_synced,
            position: self.peripherals.position.position_fix(),
        };

        let events = self.gather_events(&pre, now_ms).await;

        let current = std::mem::replace(&mut self.state, State::Init);
        let from = current.name();
        let step = transition(current, &pre, &events);
        if step.next.name() != from {
            info!("Session state {from} -> {}", step.next);
        }
        for action in step.actions {
            self.execute(action, &pre, now_ms).await;
        }
        self.state = step.next;

        if let State::Active { ride } = &self.state {
            if self.ride_refresh.fire(now_ms) {
                let speed = pre.position.map_or(0.0, |p| p.speed_kmh());
                self.peripherals
                    .display
                    .show_ride(ride.remaining_secs(now_ms), speed);
            }
        }

        self.refresh_status_line(&pre);

        let snapshot = TelemetrySnapshot {
            status: self.record.status,
            position: pre.position,
            balance: self.reconciler.wallet().balance,
            battery: self.peripherals.battery.percent(),
        };
        self.telemetry.maybe_publish(
            now_ms,
            pre.broker,
            &snapshot,
            self.peripherals.telemetry.as_ref(),
        );

        &self.state
    }

    /// Perform the remote work [`plan`] asks for this tick.
    async fn gather_events(&mut self, pre: &Preconditions, now_ms: u64) -> Events {
        let planned = plan(&self.state, pre, now_ms);
        let mut events = Events {
            now_ms,
            ..Events::default()
        };

        if planned.issue_offer {
            if let Some(position) = pre.position {
                events.offer = Some(match self.offers.generate_offer(&position) {
                    Ok(offer) => OfferEvent::Issued(offer),
                    Err(e) => {
                        warn!("Offer generation failed: {e}");
                        self.stats.offer_failures += 1;
                        OfferEvent::Failed
                    }
                });
            }
        }

        if planned.poll_ledger {
            if let State::AwaitingPayment { offer } = &self.state {
                match self
                    .reconciler
                    .poll_for_matching_payment(&offer.session_id, now_ms)
                    .await
                {
                    Ok(PollOutcome::Matched(payment)) => events.payment = Some(payment),
                    Ok(PollOutcome::NoMatch | PollOutcome::NotDue) => {}
                    Err(e) => warn!("Ledger poll failed: {e}"),
                }
            }
        }

        if planned.refresh_wallet {
            events.wallet_refreshed = Some(match self.reconciler.fetch_wallet_summary().await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Wallet refresh before settlement failed, retrying next tick: {e}");
                    false
                }
            });
        }

        events
    }

    async fn execute(&mut self, action: Action, pre: &Preconditions, now_ms: u64) {
        match action {
            Action::SetStatus(status) => {
                if self.record.status != status {
                    info!("Rental status {} -> {status}", self.record.status);
                    self.record.status = status;
                }
            }
            Action::PublishOffer(offer) => {
                self.record.reset_for_offer(offer.session_id);
                self.peripherals.display.show_offer(offer.payload.as_str());
                self.stats.offers_issued += 1;
                info!("Offer {} displayed", offer.session_id);
            }
            Action::ShowSplash => self.peripherals.display.show_splash(),
            Action::ResetPollTimer => self.reconciler.reset_poll_timer(now_ms),
            Action::StartRide {
                payment,
                session_seconds,
            } => {
                let start = self.waypoint(pre);
                let started = self
                    .record
                    .record_payment(&payment.sender, payment.amount)
                    .and_then(|()| self.record.begin_ride(start));
                if let Err(e) = started {
                    error!("Could not record ride start: {e}");
                }
                info!(
                    "Ride started: {} paid {} for {session_seconds}s (tx {})",
                    payment.sender, payment.amount, payment.tx_id
                );
                let speed = pre.position.map_or(0.0, |p| p.speed_kmh());
                self.peripherals.display.show_ride(session_seconds, speed);
                self.ride_refresh.reset(now_ms);
                self.stats.rides_started += 1;
            }
            Action::UnlockAsset => self.peripherals.lock.unlock(),
            Action::FinishRide => {
                let vendor_field = self.finish_annotation();
                let finish = self.waypoint(pre);
                if let Err(e) = self.record.finish_ride(finish, vendor_field) {
                    error!("Could not record ride finish: {e}");
                }
            }
            Action::LockAsset => self.peripherals.lock.lock(),
            Action::SendSettlement => match self.settle().await {
                Ok(id) => {
                    self.stats.settlements_sent += 1;
                    info!("Settlement {id} accepted");
                }
                Err(e) => {
                    self.stats.settlement_failures += 1;
                    error!("Settlement failed: {e}");
                    self.telemetry.report_error(e.to_string());
                }
            },
            Action::ResetRecord => self.record.clear(),
        }
    }

    /// Build, sign and post the settlement for the finished ride.
    async fn settle(&mut self) -> Result<String> {
        let nonce = self.reconciler.reserve_nonce();
        let request = SettlementRequest::from_record(&self.record, self.terms, nonce)?;
        let signed = self.signer.sign(&request)?;
        self.reconciler.send_transaction(&signed).await?;
        Ok(signed.id)
    }

    fn finish_annotation(&self) -> VendorField {
        let Some(session_id) = self.record.session_id() else {
            return VendorField::default();
        };
        match settlement_vendor_field(&self.vendor_prefix, session_id) {
            Ok(field) => field,
            Err(e) => {
                warn!("Settlement annotation dropped: {e}");
                VendorField::default()
            }
        }
    }

    fn waypoint(&self, pre: &Preconditions) -> Waypoint {
        Waypoint {
            unix_time: self.peripherals.clock.unix_time(),
            position: pre.position,
        }
    }

    fn refresh_status_line(&mut self, pre: &Preconditions) {
        let line = StatusLine {
            status: self.record.status,
            wifi: pre.wifi,
            broker: pre.broker,
            ledger: pre.ledger_synced,
            fix: pre.position.is_some(),
        };
        if self.last_status != Some(line) {
            self.peripherals.display.show_status(&line);
            self.last_status = Some(line);
        }
    }

    /// Tick every `period` until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn run(&mut self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::Config("tick period must be non-zero".to_string()));
        }
        info!("Session controller running, tick every {period:?}");
        self.run_event_loop(period).await?;
        if self.state.is_active() {
            warn!("Shutting down during an active ride");
        }
        info!("Session controller stopped in state {}", self.state);
        Ok(())
    }

    #[cfg(unix)]
    async fn run_event_loop(&mut self, period: Duration) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl-C), initiating shutdown");
                    self.shutdown();
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                    self.shutdown();
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn run_event_loop(&mut self, period: Duration) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, initiating shutdown");
                    self.shutdown();
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        Ok(())
    }

    /// Request the run loop to stop.
    pub fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(true) {
            warn!("Failed to send shutdown signal: {e}");
        }
    }

    /// Receiver that observes [`Self::shutdown`].
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
