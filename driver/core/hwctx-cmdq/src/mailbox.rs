//! Mailbox commands: payloads passed by device address.
//!
//! ```text
//!   post_mailbox
//!     1. wait until QUERY_MAILBOX_STATUS reports "not running"
//!     2. send POST_MAILBOX { in_param, out_param, tag << 8 | op, event << 16 | token }
//!     3. (Poll only) wait until "not running" again, check completion code
//! ```
//!
//! Status word returned by the status query:
//!
//! | Bits  | Meaning                     |
//! |-------|-----------------------------|
//! | 31    | hardware still running      |
//! | 0..8  | completion code, 1 = success|

use crate::channel::CommandChannel;
use crate::descriptor::{CommandDescriptor, Opcode};
use crate::ChannelError;
use core::ops::{Deref, DerefMut};
use hwctx_addresses::{DEVICE_PAGE_SIZE, DeviceAddress};
use hwctx_platform::{DeviceMemory, DmaBuffer, DmaRegion, Platform, PollBudget, poll_until};
use log::{debug, error, trace};

pub const MAILBOX_HW_RUN: u32 = 1 << 31;
pub const MAILBOX_STATUS_SUCCESS: u8 = 1;

/// Token used when completion is polled rather than signalled by event.
pub const POLL_TOKEN: u16 = 0xFFFF;

/// Size of one [`MailboxBuffer`].
pub const MAILBOX_BUFFER_SIZE: usize = DEVICE_PAGE_SIZE;

/// Scratch page a mailbox command reads its input from or writes its output
/// to. Freed when dropped.
pub struct MailboxBuffer<'m, M: DeviceMemory> {
    page: DmaBuffer<'m, M>,
}

impl<M: DeviceMemory> MailboxBuffer<'_, M> {
    #[must_use]
    pub fn device_address(&self) -> DeviceAddress {
        self.page.device_address()
    }
}

impl<M: DeviceMemory> Deref for MailboxBuffer<'_, M> {
    type Target = DmaRegion;

    fn deref(&self) -> &DmaRegion {
        &self.page
    }
}

impl<M: DeviceMemory> DerefMut for MailboxBuffer<'_, M> {
    fn deref_mut(&mut self) -> &mut DmaRegion {
        &mut self.page
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MailboxRequest {
    /// Device address the command reads from.
    pub in_param: u64,
    /// Device address the command writes to.
    pub out_param: u64,
    /// Object the command applies to.
    pub tag: u32,
    pub opcode: u8,
    pub token: u16,
    /// Completion is signalled through the event queue.
    pub event: bool,
}

impl MailboxRequest {
    /// A polled request without buffers.
    #[must_use]
    pub const fn new(opcode: u8, tag: u32) -> Self {
        Self {
            in_param: 0,
            out_param: 0,
            tag,
            opcode,
            token: POLL_TOKEN,
            event: false,
        }
    }

    #[must_use]
    pub const fn with_input(mut self, address: DeviceAddress) -> Self {
        self.in_param = address.as_u64();
        self
    }

    #[must_use]
    pub const fn with_output(mut self, address: DeviceAddress) -> Self {
        self.out_param = address.as_u64();
        self
    }

    #[must_use]
    pub fn to_descriptor(&self) -> CommandDescriptor {
        let mut post = CommandDescriptor::new(Opcode::POST_MAILBOX, false);
        let input = DeviceAddress::new(self.in_param);
        let output = DeviceAddress::new(self.out_param);
        post.data = [
            input.low(),
            input.high(),
            output.low(),
            output.high(),
            (self.tag << 8) | u32::from(self.opcode),
            (u32::from(self.event) << 16) | u32::from(self.token),
        ];
        post
    }
}

/// Whether [`CommandChannel::post_mailbox`] waits for completion.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MailboxWait {
    Poll,
    /// Return once posted; completion arrives by event.
    Posted,
}

impl<'p, P: Platform> CommandChannel<'p, P> {
    /// # Errors
    /// [`ChannelError::OutOfMemory`] if no page is available.
    pub fn alloc_mailbox(&self) -> Result<MailboxBuffer<'p, P::Memory>, ChannelError> {
        DmaBuffer::alloc(self.platform().memory(), 1)
            .map(|page| MailboxBuffer { page })
            .ok_or(ChannelError::OutOfMemory)
    }

    /// Post `request` once the previous mailbox command has finished.
    ///
    /// Mailbox commands from different callers are serialized for the whole
    /// wait-post-wait sequence.
    ///
    /// # Errors
    /// - Any [`send`](Self::send) error, including the reset-attributed ones.
    /// - [`ChannelError::TimedOut`] if the mailbox never went idle.
    /// - [`ChannelError::DeviceRejected`] with the mailbox opcode and
    ///   completion code if the command completed unsuccessfully.
    pub fn post_mailbox(
        &self,
        request: &MailboxRequest,
        wait: MailboxWait,
    ) -> Result<(), ChannelError> {
        let _serial = self.mailbox.lock();
        self.gate()?;

        let previous = self.wait_mailbox_idle(self.config().mailbox_idle_budget())?;
        trace!("mailbox idle, previous status {previous:#x}");

        let mut post = [request.to_descriptor()];
        self.send(&mut post)?;
        debug!(
            "mailbox op {:#x} tag {:#x} posted",
            request.opcode, request.tag
        );
        if wait == MailboxWait::Posted {
            return Ok(());
        }

        let status = self.wait_mailbox_idle(self.config().mailbox_budget())?;
        if status != MAILBOX_STATUS_SUCCESS {
            error!(
                "mailbox op {:#x} tag {:#x} failed with status {status:#x}",
                request.opcode, request.tag
            );
            return Err(ChannelError::DeviceRejected {
                opcode: u16::from(request.opcode),
                code: u16::from(status),
            });
        }
        Ok(())
    }

    /// Poll the mailbox status until the hardware is no longer running and
    /// return the completion code.
    fn wait_mailbox_idle(&self, budget: PollBudget) -> Result<u8, ChannelError> {
        poll_until(self.platform().clock(), budget, || {
            let mut query = [CommandDescriptor::new(Opcode::QUERY_MAILBOX_STATUS, true)];
            match self.send(&mut query) {
                Ok(()) => {
                    let word = query[0].data[0];
                    (word & MAILBOX_HW_RUN == 0).then(|| Ok(word.to_le_bytes()[0]))
                }
                Err(e) if e.is_reset() => Some(Err(e)),
                Err(e) => {
                    debug!("mailbox status query failed: {e}");
                    None
                }
            }
        })
        .map_err(|timeout| {
            error!("mailbox still running after {} us", timeout.waited_us);
            ChannelError::TimedOut
        })?
    }
}
