//! Cooperative, tick-driven interval scheduling.
//!
//! There are no timers or background tasks. Each periodic job (ledger
//! polling, telemetry publishing, display refresh, ledger sync checks) owns
//! an [`Interval`] and asks it on every control-loop tick whether it is due.
//!
//! Intervals advance by exactly one period when they fire rather than being
//! reset to the current time, so long-running cadences do not drift when tick
//! latency varies.

/// Returns true when a job last run at `last_run_ms` is due at `now_ms`.
///
/// A clock that went backwards is never due.
#[must_use]
pub const fn due_now(last_run_ms: u64, interval_ms: u64, now_ms: u64) -> bool {
    match now_ms.checked_sub(last_run_ms) {
        Some(elapsed) => elapsed >= interval_ms,
        None => false,
    }
}

/// Returns the next `last_run_ms` after a job fired.
#[must_use]
pub const fn advance(last_run_ms: u64, interval_ms: u64) -> u64 {
    last_run_ms.saturating_add(interval_ms)
}

/// A single periodic job gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    last_run_ms: u64,
    interval_ms: u64,
}

impl Interval {
    /// Create an interval whose first period starts at `now_ms`.
    #[must_use]
    pub const fn starting_at(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            last_run_ms: now_ms,
            interval_ms,
        }
    }

    /// Create an interval that is due on the first check.
    #[must_use]
    pub const fn immediate(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            last_run_ms: now_ms.saturating_sub(interval_ms),
            interval_ms,
        }
    }

    /// The configured period.
    #[must_use]
    pub const fn period_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Whether the job is due at `now_ms`.
    #[must_use]
    pub const fn is_due(&self, now_ms: u64) -> bool {
        due_now(self.last_run_ms, self.interval_ms, now_ms)
    }

    /// Fire the job if it is due, advancing by one period.
    ///
    /// Returns true when the caller should run the job now.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.last_run_ms = advance(self.last_run_ms, self.interval_ms);
            true
        } else {
            false
        }
    }

    /// Restart the period at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_run_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_now_boundaries() {
        assert!(!due_now(1_000, 8_000, 8_999));
        assert!(due_now(1_000, 8_000, 9_000));
        assert!(due_now(1_000, 8_000, 20_000));
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        assert!(!due_now(10_000, 8_000, 5_000));
    }

    #[test]
    fn test_advance_adds_exactly_one_period() {
        assert_eq!(advance(1_000, 8_000), 9_000);
        assert_eq!(advance(u64::MAX - 1, 8_000), u64::MAX);
    }

    #[test]
    fn test_fire_does_not_drift() {
        let mut interval = Interval::starting_at(0, 1_000);

        // Tick late: the next deadline is still anchored to the period grid.
        assert!(interval.fire(1_300));
        assert!(!interval.fire(1_900));
        assert!(interval.fire(2_000));
    }

    #[test]
    fn test_fire_catches_up_one_period_per_call() {
        let mut interval = Interval::starting_at(0, 1_000);

        assert!(interval.fire(3_500));
        assert!(interval.fire(3_500));
        assert!(interval.fire(3_500));
        assert!(!interval.fire(3_500));
    }

    #[test]
    fn test_immediate_interval_is_due() {
        let interval = Interval::immediate(50_000, 8_000);
        assert!(interval.is_due(50_000));
    }

    #[test]
    fn test_reset_restarts_period() {
        let mut interval = Interval::starting_at(0, 8_000);
        interval.reset(7_000);
        assert!(!interval.is_due(8_000));
        assert!(interval.is_due(15_000));
        assert_eq!(interval.period_ms(), 8_000);
    }
}
