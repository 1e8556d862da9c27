//! # Command Channel
//!
//! The control path to the device: a pair of descriptor rings in device
//! memory, the mailbox handshake built on top of them, and the reset monitor
//! that gates both.
//!
//! ```text
//!                 software                       device
//!            ┌───────────────────┐
//!  send() ──►│ send ring (CSQ)   │ head ─────────► consumes, writes retval
//!            │ [d][d][d][ ][ ]   │ ◄───────── tail
//!            └───────────────────┘
//!            ┌───────────────────┐
//!  poll_ ◄── │ receive ring (CRQ)│ ◄───────── tail  device-initiated
//!  receive() │ [d][d][ ][ ][ ]   │ head ─────────►  messages
//!            └───────────────────┘
//! ```
//!
//! ## Sending
//!
//! [`CommandChannel::send`] copies descriptors into the send ring in order,
//! publishes the new head, and, if the first descriptor asks for polled
//! completion, waits for the device tail to catch up. Each slot is then read
//! back so the caller sees the device's return values; a non-zero one becomes
//! [`ChannelError::DeviceRejected`]. A wait that runs out re-reads the tail
//! once more, and if the device really is stuck the software head is moved to
//! the device tail so nothing already consumed is sent twice.
//!
//! ## Reset gating
//!
//! Every send consults the [`ResetMonitor`] before touching the ring and again
//! after any failure. A failure that a reset explains is reported as
//! [`ChannelError::DeviceResetting`] (retry later) or
//! [`ChannelError::ResetCompleted`] (the command was dropped with the reset and
//! must not be resent) instead of the raw transport error.
//!
//! ## Mailbox
//!
//! Commands whose payload does not fit in a descriptor pass a
//! [`MailboxBuffer`] by device address through
//! [`CommandChannel::post_mailbox`], which waits for the previous mailbox
//! command to finish, posts, and optionally polls for the completion code.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod channel;
mod config;
mod descriptor;
mod mailbox;
mod monitor;

pub use channel::CommandChannel;
pub use config::{ChannelConfig, RegisterMap};
pub use descriptor::{
    BaseTableAttr, CommandDescriptor, DESCRIPTOR_DATA_WORDS, DESCRIPTOR_SIZE, DescriptorFlags,
    Opcode,
};
pub use mailbox::{
    MAILBOX_BUFFER_SIZE, MAILBOX_HW_RUN, MAILBOX_STATUS_SUCCESS, MailboxBuffer, MailboxRequest,
    MailboxWait, POLL_TOKEN,
};
pub use monitor::{
    Availability, InstanceStage, ResetMonitor, ResetSnapshot, ResetStage, ResetState,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("device did not consume the command in time")]
    TimedOut,
    #[error("device rejected opcode {opcode:#06x} with status {code:#x}")]
    DeviceRejected { opcode: u16, code: u16 },
    #[error("device is resetting")]
    DeviceResetting,
    #[error("device was reset; the command was dropped")]
    ResetCompleted,
    #[error("{needed} descriptors do not fit, {free} slots free")]
    RingFull { needed: usize, free: usize },
    #[error("out of device memory")]
    OutOfMemory,
    #[error("ring depths {send}/{receive} must both be at least 2")]
    InvalidDepth { send: u32, receive: u32 },
}

impl ChannelError {
    /// The failure is explained by a device reset rather than by the command.
    #[inline]
    #[must_use]
    pub const fn is_reset(self) -> bool {
        matches!(self, Self::DeviceResetting | Self::ResetCompleted)
    }
}
