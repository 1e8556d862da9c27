//! Time source and the bounded retry helper built on it.

/// Monotonic microsecond clock with a busy-wait delay.
pub trait Clock {
    fn now_us(&self) -> u64;

    /// Busy-wait for at least `us` microseconds.
    fn delay_us(&self, us: u64);
}

/// How long and how often [`poll_until`] probes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollBudget {
    pub timeout_us: u64,
    pub interval_us: u64,
}

impl PollBudget {
    #[must_use]
    pub const fn micros(timeout_us: u64, interval_us: u64) -> Self {
        Self {
            timeout_us,
            interval_us,
        }
    }

    #[must_use]
    pub const fn millis(timeout_ms: u64, interval_us: u64) -> Self {
        Self::micros(timeout_ms * 1000, interval_us)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("condition not met within {waited_us} us")]
pub struct PollTimeout {
    pub waited_us: u64,
}

/// Call `probe` until it yields a value or the budget runs out.
///
/// The probe always runs at least once, and once more after the final delay,
/// so a condition that becomes true exactly at the deadline is still seen.
///
/// # Errors
/// [`PollTimeout`] when `budget.timeout_us` elapsed without `probe` returning
/// `Some`.
pub fn poll_until<C, T>(
    clock: &C,
    budget: PollBudget,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, PollTimeout>
where
    C: Clock + ?Sized,
{
    let interval = budget.interval_us.max(1);
    let start = clock.now_us();
    loop {
        if let Some(v) = probe() {
            return Ok(v);
        }
        let waited_us = clock.now_us().saturating_sub(start);
        if waited_us >= budget.timeout_us {
            return Err(PollTimeout { waited_us });
        }
        clock.delay_us(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        fn now_us(&self) -> u64 {
            self.0.get()
        }
        fn delay_us(&self, us: u64) {
            self.0.set(self.0.get() + us);
        }
    }

    #[test]
    fn immediate_success_does_not_wait() {
        let clock = StepClock(Cell::new(0));
        assert_eq!(poll_until(&clock, PollBudget::micros(10, 1), || Some(3)), Ok(3));
        assert_eq!(clock.now_us(), 0);
    }

    #[test]
    fn probe_count_is_timeout_over_interval_plus_one() {
        let clock = StepClock(Cell::new(0));
        let mut probes = 0;
        let res: Result<(), _> = poll_until(&clock, PollBudget::micros(10, 2), || {
            probes += 1;
            None
        });
        assert_eq!(res, Err(PollTimeout { waited_us: 10 }));
        assert_eq!(probes, 6);
    }

    #[test]
    fn success_at_deadline_is_observed() {
        let clock = StepClock(Cell::new(0));
        let res = poll_until(&clock, PollBudget::micros(4, 1), || {
            (clock.now_us() == 4).then_some(())
        });
        assert_eq!(res, Ok(()));
    }

    #[test]
    fn zero_interval_still_advances() {
        let clock = StepClock(Cell::new(0));
        let res: Result<(), _> = poll_until(&clock, PollBudget::micros(3, 0), || None);
        assert!(res.is_err());
        assert_eq!(clock.now_us(), 3);
    }
}
