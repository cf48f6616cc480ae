//! The rental session state machine.
//!
//! A Mealy machine evaluated once per control-loop tick. It is pure: given
//! the current [`State`], the [`Preconditions`] sampled this tick and the
//! [`Events`] the controller gathered, [`transition`] returns the next state
//! and the [`Action`]s the controller must execute. [`plan`] tells the
//! controller which remote work (offer generation, ledger poll, wallet
//! refresh) to perform before calling [`transition`].
//!
//! ```text
//! Init ─► WifiWait ─► MqttWait ─► LedgerWait ─► Offering ─► AwaitingPayment ─► Active ─► Settling
//!            ▲            ▲           ▲             ▲  ▲            │               │        ▲   │
//!            └────────────┴───────────┴─────────────┘  │  (regress) │               ▼        │   │
//!                                                      │            │        SettlementPending   │
//!                                                      └────────────┴────────────────────────────┘
//! ```
//!
//! `Active` ignores regressions: once the asset is unlocked the ride runs to
//! the end of its paid time. Expiry always locks the asset. If the wallet
//! cannot be refreshed at that point the settlement waits in
//! `SettlementPending` until the ledger answers.

use crate::ledger::MatchedPayment;
use crate::offer::Offer;
use crate::peripherals::PositionFix;
use crate::session::record::{session_seconds, RentalStatus};
use std::fmt;

/// Gating conditions sampled once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preconditions {
    /// Wireless link up.
    pub wifi: bool,
    /// Broker session up.
    pub broker: bool,
    /// Ledger node reachable and synced.
    pub ledger_synced: bool,
    /// Current position fix.
    pub position: Option<PositionFix>,
}

impl Preconditions {
    /// Whether all links are up.
    #[must_use]
    pub const fn links_up(&self) -> bool {
        self.wifi && self.broker && self.ledger_synced
    }

    /// Whether all links are up and a fix is available.
    #[must_use]
    pub const fn all_hold(&self) -> bool {
        self.links_up() && self.position.is_some()
    }

    /// The lowest wait state whose link is down, if any.
    const fn regression(&self) -> Option<State> {
        if !self.wifi {
            Some(State::WifiWait)
        } else if !self.broker {
            Some(State::MqttWait)
        } else if !self.ledger_synced {
            Some(State::LedgerWait)
        } else {
            None
        }
    }
}

/// Countdown of a paid ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RideTimer {
    /// Monotonic start time.
    pub started_ms: u64,
    /// Paid length.
    pub length_ms: u64,
}

impl RideTimer {
    /// Timer for `seconds` starting at `now_ms`.
    #[must_use]
    pub const fn start(now_ms: u64, seconds: u64) -> Self {
        Self {
            started_ms: now_ms,
            length_ms: seconds.saturating_mul(1000),
        }
    }

    /// Whether the paid time is used up.
    #[must_use]
    pub const fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.started_ms) >= self.length_ms
    }

    /// Whole seconds left, rounded up.
    #[must_use]
    pub const fn remaining_secs(&self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.started_ms);
        self.length_ms.saturating_sub(elapsed).div_ceil(1000)
    }
}

/// Session controller state.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Just booted.
    Init,
    /// Waiting for the wireless link.
    WifiWait,
    /// Waiting for the broker session.
    MqttWait,
    /// Waiting for the ledger node.
    LedgerWait,
    /// Ready to issue an offer.
    Offering,
    /// An offer is displayed; waiting for its payment.
    AwaitingPayment {
        /// The open offer.
        offer: Offer,
    },
    /// A paid ride is running.
    Active {
        /// Ride countdown.
        ride: RideTimer,
    },
    /// The ride ended and the asset is locked, but the settlement could not
    /// be sent yet.
    SettlementPending,
    /// The ride ended and was settled this tick.
    Settling,
}

impl State {
    /// Short state name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::WifiWait => "WifiWait",
            Self::MqttWait => "MqttWait",
            Self::LedgerWait => "LedgerWait",
            Self::Offering => "Offering",
            Self::AwaitingPayment { .. } => "AwaitingPayment",
            Self::Active { .. } => "Active",
            Self::SettlementPending => "SettlementPending",
            Self::Settling => "Settling",
        }
    }

    /// Whether a ride is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of offer generation this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferEvent {
    /// A fresh offer.
    Issued(Offer),
    /// Generation failed; stay in `Offering`.
    Failed,
}

/// What the controller observed this tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Events {
    /// Monotonic time of the tick.
    pub now_ms: u64,
    /// Offer generation result, if requested by [`plan`].
    pub offer: Option<OfferEvent>,
    /// Matched payment, if the poll found one.
    pub payment: Option<MatchedPayment>,
    /// Wallet refresh result, if requested by [`plan`].
    pub wallet_refreshed: Option<bool>,
}

/// Remote work the controller should perform before [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Plan {
    /// Generate an offer.
    pub issue_offer: bool,
    /// Poll the ledger for the open offer's payment.
    pub poll_ledger: bool,
    /// Refresh balance and nonce ahead of settlement.
    pub refresh_wallet: bool,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Update the status label.
    SetStatus(RentalStatus),
    /// Open a new session for the offer and display it.
    PublishOffer(Offer),
    /// Withdraw the displayed offer.
    ShowSplash,
    /// Restart the ledger poll interval.
    ResetPollTimer,
    /// Record the payment and the ride start.
    StartRide {
        /// The payment that bought the ride.
        payment: MatchedPayment,
        /// Ride length.
        session_seconds: u64,
    },
    /// Release the asset.
    UnlockAsset,
    /// Record the ride finish.
    FinishRide,
    /// Lock the asset.
    LockAsset,
    /// Build, sign and post the settlement transaction.
    SendSettlement,
    /// Clear the rental record.
    ResetRecord,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Next state.
    pub next: State,
    /// Actions to execute, in order.
    pub actions: Vec<Action>,
}

impl Transition {
    fn to(next: State, actions: Vec<Action>) -> Self {
        Self { next, actions }
    }

    fn stay(state: State) -> Self {
        Self::to(state, Vec::new())
    }

    fn broken(next: State) -> Self {
        Self::to(next, vec![Action::SetStatus(RentalStatus::Broken)])
    }
}

/// Remote work needed for `state` this tick.
#[must_use]
pub fn plan(state: &State, pre: &Preconditions, now_ms: u64) -> Plan {
    match state {
        State::Offering => Plan {
            issue_offer: pre.all_hold(),
            ..Plan::default()
        },
        State::AwaitingPayment { .. } => Plan {
            poll_ledger: pre.all_hold(),
            ..Plan::default()
        },
        State::Active { ride } => Plan {
            refresh_wallet: ride.expired(now_ms),
            ..Plan::default()
        },
        State::SettlementPending => Plan {
            refresh_wallet: true,
            ..Plan::default()
        },
        _ => Plan::default(),
    }
}

/// Evaluate one tick.
#[must_use]
pub fn transition(state: State, pre: &Preconditions, events: &Events) -> Transition {
    match state {
        State::Init => Transition::broken(State::WifiWait),

        State::WifiWait => {
            if pre.wifi {
                Transition::stay(State::MqttWait)
            } else {
                Transition::broken(State::WifiWait)
            }
        }

        State::MqttWait => {
            if !pre.wifi {
                Transition::broken(State::WifiWait)
            } else if pre.broker {
                Transition::stay(State::LedgerWait)
            } else {
                Transition::broken(State::MqttWait)
            }
        }

        State::LedgerWait => match pre.regression() {
            Some(lower) => Transition::broken(lower),
            None => Transition::stay(State::Offering),
        },

        State::Offering => {
            if let Some(lower) = pre.regression() {
                return Transition::broken(lower);
            }
            if pre.position.is_none() {
                return Transition::broken(State::Offering);
            }
            match &events.offer {
                Some(OfferEvent::Issued(offer)) => Transition::to(
                    State::AwaitingPayment {
                        offer: offer.clone(),
                    },
                    vec![
                        Action::PublishOffer(offer.clone()),
                        Action::ResetPollTimer,
                        Action::SetStatus(RentalStatus::Available),
                    ],
                ),
                Some(OfferEvent::Failed) | None => Transition::stay(State::Offering),
            }
        }

        State::AwaitingPayment { offer } => {
            let lower = pre
                .regression()
                .or_else(|| pre.position.is_none().then_some(State::Offering));
            if let Some(lower) = lower {
                return Transition::to(
                    lower,
                    vec![Action::ShowSplash, Action::SetStatus(RentalStatus::Broken)],
                );
            }
            match &events.payment {
                Some(payment) => {
                    let seconds = session_seconds(payment.amount, offer.rate);
                    Transition::to(
                        State::Active {
                            ride: RideTimer::start(events.now_ms, seconds),
                        },
                        vec![
                            Action::StartRide {
                                payment: payment.clone(),
                                session_seconds: seconds,
                            },
                            Action::UnlockAsset,
                            Action::SetStatus(RentalStatus::Rented),
                        ],
                    )
                }
                None => Transition::stay(State::AwaitingPayment { offer }),
            }
        }

        State::Active { ride } => {
            if !ride.expired(events.now_ms) {
                return Transition::stay(State::Active { ride });
            }
            if events.wallet_refreshed == Some(true) {
                let mut actions = vec![Action::FinishRide, Action::LockAsset];
                actions.extend(settle_actions());
                Transition::to(State::Settling, actions)
            } else {
                Transition::to(
                    State::SettlementPending,
                    vec![
                        Action::FinishRide,
                        Action::LockAsset,
                        Action::SetStatus(RentalStatus::Broken),
                    ],
                )
            }
        }

        State::SettlementPending => {
            if events.wallet_refreshed == Some(true) {
                Transition::to(State::Settling, settle_actions())
            } else {
                Transition::stay(State::SettlementPending)
            }
        }

        State::Settling => Transition::stay(State::Offering),
    }
}

fn settle_actions() -> Vec<Action> {
    vec![
        Action::SendSettlement,
        Action::ResetRecord,
        Action::SetStatus(RentalStatus::Available),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::offer::{OfferPayload, SessionId};
    use crate::session::RentalRate;
    use proptest::prelude::*;

    fn fix() -> PositionFix {
        PositionFix::at(52.0, 4.0)
    }

    fn all_up() -> Preconditions {
        Preconditions {
            wifi: true,
            broker: true,
            ledger_synced: true,
            position: Some(fix()),
        }
    }

    fn offer() -> Offer {
        Offer {
            session_id: SessionId::from_seed(1),
            payload: OfferPayload::new("rad:test".to_string()).expect("payload"),
            rate: RentalRate::new(61_667).expect("rate"),
            position: fix(),
        }
    }

    fn payment(amount: u64) -> MatchedPayment {
        MatchedPayment {
            sender: "TLdYHTKRSD3rG66zsytqpAgJDX75qbcvgT".to_string(),
            amount,
            page: 5,
            tx_id: "tx".to_string(),
        }
    }

    fn at(now_ms: u64) -> Events {
        Events {
            now_ms,
            ..Events::default()
        }
    }

    #[test]
    fn test_boot_walks_up_the_gates() {
        let pre = all_up();
        let mut state = State::Init;
        let mut names = Vec::new();
        for _ in 0..4 {
            state = transition(state, &pre, &at(0)).next;
            names.push(state.name());
        }
        assert_eq!(names, ["WifiWait", "MqttWait", "LedgerWait", "Offering"]);
    }

    #[test]
    fn test_wait_states_mark_broken() {
        let pre = Preconditions {
            wifi: false,
            ..all_up()
        };
        let t = transition(State::WifiWait, &pre, &at(0));
        assert_eq!(t.next, State::WifiWait);
        assert_eq!(t.actions, vec![Action::SetStatus(RentalStatus::Broken)]);
    }

    #[test]
    fn test_ledger_wait_regresses_to_lowest_failed_gate() {
        let pre = Preconditions {
            wifi: true,
            broker: false,
            ledger_synced: false,
            position: None,
        };
        assert_eq!(transition(State::LedgerWait, &pre, &at(0)).next, State::MqttWait);
    }

    #[test]
    fn test_offering_without_fix_stays_broken() {
        let pre = Preconditions {
            position: None,
            ..all_up()
        };
        assert!(!plan(&State::Offering, &pre, 0).issue_offer);

        let t = transition(State::Offering, &pre, &at(0));
        assert_eq!(t.next, State::Offering);
        assert_eq!(t.actions, vec![Action::SetStatus(RentalStatus::Broken)]);
    }

    #[test]
    fn test_offer_failure_stays_offering() {
        let events = Events {
            offer: Some(OfferEvent::Failed),
            ..at(0)
        };
        let t = transition(State::Offering, &all_up(), &events);
        assert_eq!(t.next, State::Offering);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_offer_issued_publishes_and_resets_poll() {
        assert!(plan(&State::Offering, &all_up(), 0).issue_offer);

        let events = Events {
            offer: Some(OfferEvent::Issued(offer())),
            ..at(0)
        };
        let t = transition(State::Offering, &all_up(), &events);
        assert_eq!(t.next, State::AwaitingPayment { offer: offer() });
        assert_eq!(
            t.actions,
            vec![
                Action::PublishOffer(offer()),
                Action::ResetPollTimer,
                Action::SetStatus(RentalStatus::Available),
            ]
        );
    }

    #[test]
    fn test_payment_starts_ride() {
        let state = State::AwaitingPayment { offer: offer() };
        assert!(plan(&state, &all_up(), 0).poll_ledger);

        let events = Events {
            payment: Some(payment(123_334)),
            ..at(10_000)
        };
        let t = transition(state, &all_up(), &events);
        assert_eq!(
            t.next,
            State::Active {
                ride: RideTimer {
                    started_ms: 10_000,
                    length_ms: 2_000
                }
            }
        );
        assert!(t.actions.contains(&Action::UnlockAsset));
        assert!(t.actions.contains(&Action::StartRide {
            payment: payment(123_334),
            session_seconds: 2,
        }));
    }

    #[test]
    fn test_lost_fix_withdraws_offer() {
        let state = State::AwaitingPayment { offer: offer() };
        let pre = Preconditions {
            position: None,
            ..all_up()
        };
        assert!(!plan(&state, &pre, 0).poll_ledger);

        let t = transition(state, &pre, &at(0));
        assert_eq!(t.next, State::Offering);
        assert_eq!(t.actions[0], Action::ShowSplash);
    }

    #[test]
    fn test_lost_wifi_while_awaiting_payment() {
        let pre = Preconditions {
            wifi: false,
            ..all_up()
        };
        let t = transition(State::AwaitingPayment { offer: offer() }, &pre, &at(0));
        assert_eq!(t.next, State::WifiWait);
        assert!(t.actions.contains(&Action::ShowSplash));
    }

    #[test]
    fn test_active_ignores_regressions() {
        let ride = RideTimer::start(0, 60);
        let pre = Preconditions {
            wifi: false,
            broker: false,
            ledger_synced: false,
            position: None,
        };
        let t = transition(State::Active { ride }, &pre, &at(30_000));
        assert_eq!(t.next, State::Active { ride });
        assert!(t.actions.is_empty());
    }

    #[test]
    fn test_expiry_locks_even_when_wallet_refresh_fails() {
        let ride = RideTimer::start(0, 1);
        let failed = Events {
            wallet_refreshed: Some(false),
            ..at(1_000)
        };
        let t = transition(State::Active { ride }, &all_up(), &failed);
        assert_eq!(t.next, State::SettlementPending);
        assert_eq!(
            t.actions,
            vec![
                Action::FinishRide,
                Action::LockAsset,
                Action::SetStatus(RentalStatus::Broken),
            ]
        );

        let offline = Preconditions {
            wifi: false,
            broker: false,
            ledger_synced: false,
            position: None,
        };
        assert!(plan(&State::SettlementPending, &offline, 2_000).refresh_wallet);
        let t = transition(State::SettlementPending, &offline, &failed);
        assert_eq!(t.next, State::SettlementPending);
        assert!(t.actions.is_empty());

        let ok = Events {
            wallet_refreshed: Some(true),
            ..at(9_000)
        };
        let t = transition(State::SettlementPending, &offline, &ok);
        assert_eq!(t.next, State::Settling);
        assert_eq!(
            t.actions,
            vec![
                Action::SendSettlement,
                Action::ResetRecord,
                Action::SetStatus(RentalStatus::Available),
            ]
        );
    }

    #[test]
    fn test_expiry_with_wallet_refresh_settles() {
        let ride = RideTimer::start(0, 1);
        assert!(!plan(&State::Active { ride }, &all_up(), 999).refresh_wallet);
        assert!(plan(&State::Active { ride }, &all_up(), 1_000).refresh_wallet);

        let ok = Events {
            wallet_refreshed: Some(true),
            ..at(1_000)
        };
        let t = transition(State::Active { ride }, &all_up(), &ok);
        assert_eq!(t.next, State::Settling);
        assert_eq!(
            t.actions,
            vec![
                Action::FinishRide,
                Action::LockAsset,
                Action::SendSettlement,
                Action::ResetRecord,
                Action::SetStatus(RentalStatus::Available),
            ]
        );
    }

    #[test]
    fn test_settling_returns_to_offering() {
        let pre = Preconditions {
            wifi: false,
            ..all_up()
        };
        assert_eq!(transition(State::Settling, &pre, &at(0)).next, State::Offering);
    }

    #[test]
    fn test_ride_timer() {
        let ride = RideTimer::start(1_000, 3);
        assert_eq!(ride.remaining_secs(1_000), 3);
        assert_eq!(ride.remaining_secs(1_001), 3);
        assert_eq!(ride.remaining_secs(3_000), 1);
        assert!(!ride.expired(3_999));
        assert!(ride.expired(4_000));
        assert_eq!(ride.remaining_secs(9_000), 0);
        assert!(RideTimer::start(0, 0).expired(0));
    }

    fn preconditions() -> impl Strategy<Value = Preconditions> {
        (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(wifi, broker, ledger_synced, has_fix)| Preconditions {
                wifi,
                broker,
                ledger_synced,
                position: has_fix.then(fix),
            },
        )
    }

    proptest! {
        #[test]
        fn rides_start_only_when_paid_and_lock_at_expiry(
            steps in prop::collection::vec((preconditions(), any::<bool>(), any::<bool>()), 1..200)
        ) {
            let mut state = State::Init;
            for (i, (pre, paid, wallet_ok)) in steps.into_iter().enumerate() {
                let now_ms = i as u64 * 1_000;
                let planned = plan(&state, &pre, now_ms);
                let events = Events {
                    now_ms,
                    offer: planned.issue_offer.then(|| OfferEvent::Issued(offer())),
                    payment: (planned.poll_ledger && paid).then(|| payment(61_667)),
                    wallet_refreshed: planned.refresh_wallet.then_some(wallet_ok),
                };
                let was_active = state.is_active();
                let expired = matches!(&state, State::Active { ride } if ride.expired(now_ms));
                let t = transition(state, &pre, &events);
                if t.next.is_active() && !was_active {
                    prop_assert!(pre.all_hold());
                    prop_assert!(events.payment.is_some());
                }
                if expired {
                    prop_assert!(!t.next.is_active());
                    prop_assert!(t.actions.contains(&Action::LockAsset));
                }
                state = t.next;
            }
        }
    }
}
