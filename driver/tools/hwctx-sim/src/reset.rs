use hwctx_platform::ResetSignal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Flags {
    generation: AtomicU64,
    hardware: AtomicBool,
    software: AtomicBool,
}

/// Reset signal under test control. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimResetSignal {
    flags: Arc<Flags>,
}

impl SimResetSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hardware_resetting(&self, on: bool) {
        self.flags.hardware.store(on, Ordering::SeqCst);
    }

    pub fn set_software_resetting(&self, on: bool) {
        self.flags.software.store(on, Ordering::SeqCst);
    }

    /// A reset ran to completion: the generation moves and the hardware flag
    /// drops.
    pub fn complete_reset(&self) {
        self.flags.generation.fetch_add(1, Ordering::SeqCst);
        self.flags.hardware.store(false, Ordering::SeqCst);
    }
}

impl ResetSignal for SimResetSignal {
    fn reset_generation(&self) -> u64 {
        self.flags.generation.load(Ordering::SeqCst)
    }

    fn is_hardware_resetting(&self) -> bool {
        self.flags.hardware.load(Ordering::SeqCst)
    }

    fn is_software_resetting(&self) -> bool {
        self.flags.software.load(Ordering::SeqCst)
    }
}
