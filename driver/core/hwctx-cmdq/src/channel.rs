//! Send and receive rings.

use crate::config::ChannelConfig;
use crate::descriptor::{BaseTableAttr, CommandDescriptor, DESCRIPTOR_SIZE, Opcode};
use crate::monitor::{Availability, ResetMonitor};
use crate::ChannelError;
use hwctx_addresses::{ObjectClass, pages_for};
use hwctx_platform::{DeviceMemory, DmaBuffer, Platform, RegisterAccess, poll_until};
use hwctx_sync::{SpinMutex, TicketMutex};
use log::{debug, error, info, trace, warn};

/// Ring bookkeeping. `head` is where software writes next, `tail` the last
/// position the device was seen to have reached.
struct Ring<'m, M: DeviceMemory> {
    slots: DmaBuffer<'m, M>,
    depth: u32,
    head: u32,
    tail: u32,
}

impl<'m, M: DeviceMemory> Ring<'m, M> {
    fn alloc(memory: &'m M, depth: u32) -> Result<Self, ChannelError> {
        let bytes = depth as usize * DESCRIPTOR_SIZE;
        let slots = DmaBuffer::alloc(memory, pages_for(bytes)).ok_or(ChannelError::OutOfMemory)?;
        Ok(Self {
            slots,
            depth,
            head: 0,
            tail: 0,
        })
    }

    const fn next(&self, slot: u32) -> u32 {
        (slot + 1) % self.depth
    }

    /// Slots that can be written without overtaking the device. One slot is
    /// always left empty so a full ring is distinguishable from an empty one.
    const fn free(&self) -> usize {
        let used = (self.head + self.depth - self.tail) % self.depth;
        (self.depth - 1 - used) as usize
    }

    fn write(&mut self, slot: u32, descriptor: &CommandDescriptor) {
        self.slots
            .write_bytes(slot as usize * DESCRIPTOR_SIZE, &descriptor.to_bytes());
    }

    fn read(&self, slot: u32) -> CommandDescriptor {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        self.slots.read_bytes(slot as usize * DESCRIPTOR_SIZE, &mut bytes);
        CommandDescriptor::from_bytes(&bytes)
    }
}

/// A failed submission and how many of its descriptors the device had
/// already consumed.
struct SendFailure {
    error: ChannelError,
    consumed: usize,
}

impl SendFailure {
    const fn untouched(error: ChannelError) -> Self {
        Self { error, consumed: 0 }
    }
}

/// The device's command channel.
///
/// One instance per device function. Ring memory is owned by the channel and
/// returned to the platform when it is dropped.
pub struct CommandChannel<'p, P: Platform> {
    platform: &'p P,
    config: ChannelConfig,
    monitor: ResetMonitor<'p, P::Reset>,
    send: TicketMutex<Ring<'p, P::Memory>>,
    receive: SpinMutex<Ring<'p, P::Memory>>,
    /// Held across a whole mailbox post-and-poll sequence.
    pub(crate) mailbox: TicketMutex<()>,
}

impl<'p, P: Platform> CommandChannel<'p, P> {
    /// Allocate both rings and program their registers.
    ///
    /// # Errors
    /// - [`ChannelError::InvalidDepth`] if a ring would have no usable slot.
    /// - [`ChannelError::OutOfMemory`] if ring memory cannot be allocated.
    pub fn new(platform: &'p P, config: ChannelConfig) -> Result<Self, ChannelError> {
        if !config.is_valid() {
            return Err(ChannelError::InvalidDepth {
                send: config.send_depth,
                receive: config.receive_depth,
            });
        }
        let send = Ring::alloc(platform.memory(), config.send_depth)?;
        let receive = Ring::alloc(platform.memory(), config.receive_depth)?;

        let regs = platform.registers();
        let map = &config.registers;
        let base = send.slots.device_address();
        regs.write_reg(map.send_base_low, base.low());
        regs.write_reg(map.send_base_high, base.high());
        regs.write_reg(map.send_depth, send.depth);
        regs.write_reg(map.send_tail, 0);
        regs.write_reg(map.send_head, 0);

        let base = receive.slots.device_address();
        regs.write_reg(map.receive_base_low, base.low());
        regs.write_reg(map.receive_base_high, base.high());
        regs.write_reg(map.receive_depth, receive.depth);
        regs.write_reg(map.receive_head, 0);
        regs.write_reg(map.receive_tail, 0);

        info!(
            "command queue ready: send {} slots at {}, receive {} slots at {}",
            send.depth,
            send.slots.device_address(),
            receive.depth,
            receive.slots.device_address()
        );

        Ok(Self {
            platform,
            config,
            monitor: ResetMonitor::new(platform.reset_signal()),
            send: TicketMutex::new(send),
            receive: SpinMutex::new(receive),
            mailbox: TicketMutex::new(()),
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn monitor(&self) -> &ResetMonitor<'p, P::Reset> {
        &self.monitor
    }

    #[inline]
    #[must_use]
    pub const fn platform(&self) -> &'p P {
        self.platform
    }

    /// Map the monitor's verdict to a send result.
    pub(crate) fn gate(&self) -> Result<(), ChannelError> {
        match self.monitor.check() {
            Availability::Available => Ok(()),
            Availability::Busy => Err(ChannelError::DeviceResetting),
            Availability::Lost => Err(ChannelError::ResetCompleted),
        }
    }

    /// Submit `descriptors` as one command and, for polled commands, wait for
    /// the device and copy its answers back into `descriptors`.
    ///
    /// A timeout that no reset explains is retried up to
    /// [`ChannelConfig::send_retries`] times, but only while the device has
    /// not consumed any part of the command.
    ///
    /// # Errors
    /// - [`ChannelError::DeviceResetting`] / [`ChannelError::ResetCompleted`]
    ///   when the device is, or was, resetting.
    /// - [`ChannelError::DeviceRejected`] with the first non-zero return value.
    /// - [`ChannelError::TimedOut`] when the device stopped consuming.
    /// - [`ChannelError::RingFull`] when the descriptors do not fit.
    pub fn send(&self, descriptors: &mut [CommandDescriptor]) -> Result<(), ChannelError> {
        let Some(first) = descriptors.first() else {
            return Ok(());
        };
        let opcode = first.opcode;
        let snapshot = self.monitor.snapshot();
        self.gate()?;

        let mut attempt = 0;
        loop {
            let Err(SendFailure { error, consumed }) = self.send_once(descriptors) else {
                return Ok(());
            };
            if let Err(reset) = self.gate() {
                warn!("opcode {opcode}: {error}, attributed to reset ({reset})");
                return Err(reset);
            }
            if !snapshot.is_current(&self.monitor) {
                warn!("opcode {opcode}: {error}, reset completed meanwhile");
                return Err(ChannelError::ResetCompleted);
            }
            if error == ChannelError::TimedOut && consumed != 0 {
                warn!(
                    "opcode {opcode}: device consumed {consumed} of {} descriptors before \
                     stalling, not resending",
                    descriptors.len()
                );
                return Err(error);
            }
            if error == ChannelError::TimedOut && attempt < self.config.send_retries {
                attempt += 1;
                warn!("opcode {opcode} timed out, retry {attempt}");
                continue;
            }
            return Err(error);
        }
    }

    fn send_once(&self, descriptors: &mut [CommandDescriptor]) -> Result<(), SendFailure> {
        let regs = self.platform.registers();
        let map = &self.config.registers;
        let needed = descriptors.len();

        let mut ring = self.send.lock();
        if ring.free() < needed {
            ring.tail = regs.read_reg(map.send_tail) % ring.depth;
            if ring.free() < needed {
                return Err(SendFailure::untouched(ChannelError::RingFull {
                    needed,
                    free: ring.free(),
                }));
            }
        }

        let start = ring.head;
        for descriptor in descriptors.iter() {
            trace!("send {:?} at slot {}", descriptor.opcode, ring.head);
            let slot = ring.head;
            ring.write(slot, descriptor);
            ring.head = ring.next(slot);
        }
        let head = ring.head;
        regs.write_reg(map.send_head, head);

        if !descriptors[0].is_synchronous() {
            return Ok(());
        }

        let consumed = || regs.read_reg(map.send_tail) == head;
        let done = poll_until(self.platform.clock(), self.config.tx_budget(), || {
            consumed().then_some(())
        })
        .is_ok()
            || consumed();

        if !done {
            let tail = regs.read_reg(map.send_tail) % ring.depth;
            warn!("send ring stalled: moving head {head} back to device tail {tail}");
            ring.head = tail;
            ring.tail = tail;
            return Err(SendFailure {
                error: ChannelError::TimedOut,
                consumed: ((tail + ring.depth - start) % ring.depth) as usize,
            });
        }
        ring.tail = head;

        let mut result = Ok(());
        let mut slot = start;
        for descriptor in descriptors.iter_mut() {
            *descriptor = ring.read(slot);
            slot = ring.next(slot);
            if descriptor.retval != 0 {
                error!(
                    "opcode {} rejected with status {:#x}",
                    descriptor.opcode, descriptor.retval
                );
                if result.is_ok() {
                    result = Err(SendFailure {
                        error: ChannelError::DeviceRejected {
                            opcode: descriptor.opcode.as_u16(),
                            code: descriptor.retval,
                        },
                        consumed: needed,
                    });
                }
            }
        }
        result
    }

    /// Hand every descriptor the device has placed in the receive ring to
    /// `handler`, oldest first, then acknowledge them. Returns how many were
    /// consumed.
    pub fn poll_receive(&self, mut handler: impl FnMut(&CommandDescriptor)) -> usize {
        let regs = self.platform.registers();
        let map = &self.config.registers;
        let mut ring = self.receive.lock();

        let tail = regs.read_reg(map.receive_tail) % ring.depth;
        let mut consumed = 0;
        while ring.head != tail {
            let slot = ring.head;
            let descriptor = ring.read(slot);
            trace!("receive {:?} at slot {slot}", descriptor.opcode);
            handler(&descriptor);
            ring.head = ring.next(slot);
            consumed += 1;
        }
        ring.tail = tail;
        if consumed > 0 {
            regs.write_reg(map.receive_head, ring.head);
        }
        consumed
    }

    /// # Errors
    /// Any [`send`](Self::send) error.
    pub fn query_firmware_version(&self) -> Result<u32, ChannelError> {
        let mut query = [CommandDescriptor::new(Opcode::QUERY_FIRMWARE_VERSION, true)];
        self.send(&mut query)?;
        let version = query[0].data[0];
        info!(
            "firmware version {}.{}.{}",
            version >> 24,
            (version >> 16) & 0xFF,
            version & 0xFFFF
        );
        Ok(version)
    }

    /// Tell the device how each class's table is shaped.
    ///
    /// # Errors
    /// Any [`send`](Self::send) error.
    pub fn configure_base_table_attrs(
        &self,
        attrs: &[BaseTableAttr; ObjectClass::COUNT],
    ) -> Result<(), ChannelError> {
        let mut command = [CommandDescriptor::new(Opcode::CONFIGURE_BASE_TABLE_ATTRS, false)];
        for class in ObjectClass::ALL {
            let attr = attrs[class.index()];
            debug!(
                "{class} base table: hop {} ba shift {} buf shift {}",
                attr.hop_num(),
                attr.ba_page_shift(),
                attr.buf_page_shift()
            );
            command[0].data[class.index()] = attr.into_bits();
        }
        self.send(&mut command)
    }

    /// Ask the device to drop every context this function created.
    ///
    /// # Errors
    /// Any [`send`](Self::send) error.
    pub fn function_clear(&self) -> Result<(), ChannelError> {
        let mut command = [CommandDescriptor::new(Opcode::FUNCTION_CLEAR, false)];
        self.send(&mut command)
    }

    /// Ring a data-path doorbell unless a reset has disabled them. Returns
    /// whether the write happened.
    pub fn ring_doorbell(&self, value: u64) -> bool {
        if self.monitor.doorbells_disabled() {
            debug!("doorbell {value:#x} suppressed during reset");
            return false;
        }
        self.platform.registers().ring_doorbell(value);
        true
    }
}
