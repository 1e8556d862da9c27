//! # Platform Interfaces
//!
//! The driver core never touches hardware directly. Everything it needs from
//! the outside world comes through four narrow traits, bundled by
//! [`Platform`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Platform                             │
//! │                                                          │
//! │  DeviceMemory     alloc_pages / free_pages  (tables,     │
//! │                   rings, mailbox buffers)                │
//! │  RegisterAccess   write_reg / read_reg / ring_doorbell   │
//! │  ResetSignal      reset_generation / is_*_resetting      │
//! │  Clock            now_us / delay_us                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All methods take `&self`; implementations carry whatever interior
//! mutability they need, since one platform instance is shared by every table
//! and by the command channel.
//!
//! Bounded busy-waiting is expressed once, in [`poll_until`], against the
//! [`Clock`] trait, so tests drive time with a fake clock instead of sleeping.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod clock;
mod memory;
mod registers;
mod reset;

pub use clock::{Clock, PollBudget, PollTimeout, poll_until};
pub use memory::{DeviceMemory, DmaBuffer, DmaRegion};
pub use registers::RegisterAccess;
pub use reset::ResetSignal;

/// Everything the driver core consumes from its environment.
pub trait Platform {
    type Memory: DeviceMemory;
    type Registers: RegisterAccess;
    type Reset: ResetSignal;
    type Clock: Clock;

    fn memory(&self) -> &Self::Memory;
    fn registers(&self) -> &Self::Registers;
    fn reset_signal(&self) -> &Self::Reset;
    fn clock(&self) -> &Self::Clock;
}
