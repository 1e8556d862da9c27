//! # Simulated Device
//!
//! Deterministic stand-ins for every [`Platform`] collaborator, so the driver
//! core can be tested on the host:
//!
//! - [`HostDeviceMemory`]: heap pages with made-up device addresses, failure
//!   injection and leak accounting.
//! - [`SimRegisters`]: a register file with a small firmware model behind the
//!   command queue registers. It consumes the send ring when the head register
//!   is written, answers firmware queries, runs the mailbox state machine and
//!   keeps a log of everything it saw.
//! - [`SimResetSignal`]: reset generation and flags the test flips.
//! - [`FakeClock`]: time only moves when somebody waits.
//!
//! The firmware model knows the command queue register layout and opcodes
//! only as the numbers in [`regs`] and [`ops`]; it decodes descriptors from
//! raw ring bytes.

mod clock;
mod memory;
mod registers;
mod reset;

pub use clock::FakeClock;
pub use memory::HostDeviceMemory;
pub use registers::{MailboxPost, Observed, QueueMode, ResetAction, SimRegisters, ops, regs};
pub use reset::SimResetSignal;

use hwctx_platform::Platform;

/// All four collaborators, sharing one memory and one reset signal.
pub struct SimPlatform {
    pub memory: HostDeviceMemory,
    pub registers: SimRegisters,
    pub reset: SimResetSignal,
    pub clock: FakeClock,
}

impl SimPlatform {
    #[must_use]
    pub fn new() -> Self {
        let memory = HostDeviceMemory::new();
        let reset = SimResetSignal::new();
        Self {
            registers: SimRegisters::new(memory.clone(), reset.clone()),
            memory,
            reset,
            clock: FakeClock::new(),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    type Memory = HostDeviceMemory;
    type Registers = SimRegisters;
    type Reset = SimResetSignal;
    type Clock = FakeClock;

    fn memory(&self) -> &HostDeviceMemory {
        &self.memory
    }

    fn registers(&self) -> &SimRegisters {
        &self.registers
    }

    fn reset_signal(&self) -> &SimResetSignal {
        &self.reset
    }

    fn clock(&self) -> &FakeClock {
        &self.clock
    }
}
