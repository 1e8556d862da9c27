//! Reset gating for the command channel.
//!
//! A function-level reset can start, and even finish, while a command is in
//! flight. The monitor decides, before and after every device interaction,
//! whether the device can currently be talked to:
//!
//! ```text
//!   check()
//!     │
//!     ├─ reset latched earlier ──────────────────────────► Lost
//!     ├─ generation moved ─► latch, doorbells off ─┬─ (re)initialising ─► Busy
//!     │                                            └─ otherwise ────────► Lost
//!     ├─ hardware resetting ─► doorbells off ────────────► Busy
//!     ├─ software resetting while initialising ──────────► Busy
//!     └─ ────────────────────────────────────────────────► Available
//! ```
//!
//! `Busy` is transient: the caller should fail with a retryable error or skip
//! the device step. `Lost` means the device already went through a reset that
//! dropped whatever was in flight; the command must be treated as failed and
//! never resent.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use hwctx_platform::ResetSignal;
use log::{debug, warn};

/// Outcome of [`ResetMonitor::check`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Availability {
    Available,
    /// A reset is in progress.
    Busy,
    /// A reset completed behind the caller's back.
    Lost,
}

impl Availability {
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }

    #[inline]
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Coarse reset state for reporting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResetState {
    Normal,
    HardwareResetting,
    SoftwareResetting,
    /// The device was reset under us; this instance cannot use it again
    /// until it is re-initialised.
    Unrecoverable,
}

/// Lifecycle of the driver instance owning the channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum InstanceStage {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
}

/// Progress through the owning driver's reset notifications.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ResetStage {
    None = 0,
    Down = 1,
    Uninit = 2,
    Init = 3,
    Ready = 4,
}

impl InstanceStage {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

impl ResetStage {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Down,
            2 => Self::Uninit,
            3 => Self::Init,
            4 => Self::Ready,
            _ => Self::None,
        }
    }
}

/// The reset generation observed at some point, for capture-and-compare
/// around an operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ResetSnapshot {
    generation: u64,
}

impl ResetSnapshot {
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// No reset completed since the snapshot was taken.
    #[must_use]
    pub fn is_current<R: ResetSignal + ?Sized>(&self, monitor: &ResetMonitor<'_, R>) -> bool {
        !monitor.is_reset_latched() && monitor.signal.reset_generation() == self.generation
    }
}

pub struct ResetMonitor<'r, R: ResetSignal + ?Sized> {
    signal: &'r R,
    baseline: AtomicU64,
    instance: AtomicU8,
    stage: AtomicU8,
    reset_latched: AtomicBool,
    doorbells_disabled: AtomicBool,
}

impl<'r, R: ResetSignal + ?Sized> ResetMonitor<'r, R> {
    /// Start watching `signal`, taking its current generation as the
    /// baseline.
    pub fn new(signal: &'r R) -> Self {
        Self {
            signal,
            baseline: AtomicU64::new(signal.reset_generation()),
            instance: AtomicU8::new(InstanceStage::Uninitialized as u8),
            stage: AtomicU8::new(ResetStage::None as u8),
            reset_latched: AtomicBool::new(false),
            doorbells_disabled: AtomicBool::new(false),
        }
    }

    /// Decide whether the device can be used right now.
    pub fn check(&self) -> Availability {
        if self.is_reset_latched() {
            return Availability::Lost;
        }

        let generation = self.signal.reset_generation();
        let baseline = self.baseline.load(Ordering::Acquire);
        if generation != baseline {
            self.reset_latched.store(true, Ordering::Release);
            self.doorbells_disabled.store(true, Ordering::Release);
            warn!("reset generation moved from {baseline} to {generation}");
            return if self.reset_stage() == ResetStage::Init
                || self.instance_stage() == InstanceStage::Initializing
            {
                Availability::Busy
            } else {
                Availability::Lost
            };
        }

        if self.signal.is_hardware_resetting() {
            self.doorbells_disabled.store(true, Ordering::Release);
            return Availability::Busy;
        }

        if self.signal.is_software_resetting()
            && self.instance_stage() == InstanceStage::Initializing
        {
            return Availability::Busy;
        }

        Availability::Available
    }

    /// Capture the current generation.
    #[must_use]
    pub fn snapshot(&self) -> ResetSnapshot {
        ResetSnapshot {
            generation: self.signal.reset_generation(),
        }
    }

    /// Read-only summary; unlike [`check`](Self::check) this latches nothing.
    #[must_use]
    pub fn state(&self) -> ResetState {
        if self.is_reset_latched()
            || self.signal.reset_generation() != self.baseline.load(Ordering::Acquire)
        {
            return ResetState::Unrecoverable;
        }
        if self.signal.is_hardware_resetting() {
            return ResetState::HardwareResetting;
        }
        if self.signal.is_software_resetting()
            || matches!(
                self.reset_stage(),
                ResetStage::Down | ResetStage::Uninit | ResetStage::Init
            )
        {
            return ResetState::SoftwareResetting;
        }
        ResetState::Normal
    }

    /// Generation the monitor compares against.
    #[must_use]
    pub fn reset_generation(&self) -> u64 {
        self.baseline.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_reset_latched(&self) -> bool {
        self.reset_latched.load(Ordering::Acquire)
    }

    /// Data-path doorbells must not be rung.
    #[must_use]
    pub fn doorbells_disabled(&self) -> bool {
        self.doorbells_disabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn instance_stage(&self) -> InstanceStage {
        InstanceStage::from_u8(self.instance.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn reset_stage(&self) -> ResetStage {
        ResetStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub fn set_instance_stage(&self, stage: InstanceStage) {
        self.instance.store(stage as u8, Ordering::Release);
    }

    fn set_reset_stage(&self, stage: ResetStage) {
        self.stage.store(stage as u8, Ordering::Release);
    }

    /// The owning driver is about to reset the device. Only meaningful for
    /// an instance that finished initialising.
    pub fn notify_down(&self) {
        if self.instance_stage() != InstanceStage::Ready {
            debug!("reset down ignored: instance {:?}", self.instance_stage());
            return;
        }
        self.set_reset_stage(ResetStage::Down);
        self.reset_latched.store(true, Ordering::Release);
        self.doorbells_disabled.store(true, Ordering::Release);
        warn!("device going down for reset");
    }

    pub fn notify_uninit(&self) {
        self.set_reset_stage(ResetStage::Uninit);
    }

    /// Re-initialisation after a reset starts: the current generation becomes
    /// the new baseline and the latches clear.
    pub fn notify_init_begin(&self) {
        self.set_reset_stage(ResetStage::Init);
        self.set_instance_stage(InstanceStage::Initializing);
        self.baseline
            .store(self.signal.reset_generation(), Ordering::Release);
        self.reset_latched.store(false, Ordering::Release);
        self.doorbells_disabled.store(false, Ordering::Release);
    }

    pub fn notify_init_done(&self) {
        self.set_reset_stage(ResetStage::Ready);
        self.set_instance_stage(InstanceStage::Ready);
    }

    /// Re-initialisation gave up. Commands stay refused until the next
    /// [`notify_init_begin`](Self::notify_init_begin).
    pub fn notify_init_failed(&self) {
        self.set_instance_stage(InstanceStage::Uninitialized);
        self.reset_latched.store(true, Ordering::Release);
        self.doorbells_disabled.store(true, Ordering::Release);
    }
}
