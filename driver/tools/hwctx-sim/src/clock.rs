use hwctx_platform::Clock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A clock that advances only through [`Clock::delay_us`] and
/// [`FakeClock::advance`].
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicU64,
    delays: AtomicU64,
}

impl FakeClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            delays: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// How many times somebody waited.
    #[must_use]
    pub fn delays(&self) -> u64 {
        self.delays.load(Ordering::SeqCst)
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u64) {
        self.delays.fetch_add(1, Ordering::SeqCst);
        self.advance(us);
    }
}
