//! Register file with a firmware model behind the command queue.

use crate::memory::HostDeviceMemory;
use crate::reset::SimResetSignal;
use hwctx_platform::{RegisterAccess, ResetSignal};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Command queue register offsets.
pub mod regs {
    pub const SEND_BASE_LOW: u32 = 0x07000;
    pub const SEND_BASE_HIGH: u32 = 0x07004;
    pub const SEND_DEPTH: u32 = 0x07008;
    pub const SEND_HEAD: u32 = 0x07010;
    pub const SEND_TAIL: u32 = 0x07014;
    pub const RECEIVE_BASE_LOW: u32 = 0x07018;
    pub const RECEIVE_BASE_HIGH: u32 = 0x0701C;
    pub const RECEIVE_DEPTH: u32 = 0x07020;
    pub const RECEIVE_TAIL: u32 = 0x07024;
    pub const RECEIVE_HEAD: u32 = 0x07028;
}

/// Opcodes the firmware model understands.
pub mod ops {
    pub const QUERY_FIRMWARE_VERSION: u16 = 0x0001;
    pub const QUERY_HARDWARE_VERSION: u16 = 0x8000;
    pub const CONFIGURE_BASE_TABLE_ATTRS: u16 = 0x8506;
    pub const FUNCTION_CLEAR: u16 = 0x8508;
    pub const POST_MAILBOX: u16 = 0x7000;
    pub const QUERY_MAILBOX_STATUS: u16 = 0x7001;

    pub const MAILBOX_HW_RUN: u32 = 1 << 31;
    pub const MAILBOX_SUCCESS: u8 = 1;
}

const DESCRIPTOR_SIZE: usize = 32;

/// How the simulated device consumes the send ring.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum QueueMode {
    /// Consume everything as soon as the head register is written.
    Responsive,
    /// Never consume.
    Stalled,
    /// Consume immediately but publish the new tail only on the `n`th read
    /// of the tail register after the head write.
    LateAck(u32),
    /// Consume at most one descriptor per head write.
    OnePerHeadWrite,
}

/// What happens when the device meets a trigger opcode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResetAction {
    /// A hardware reset starts; the command is not consumed.
    BeginHardwareReset,
    /// A reset runs to completion; the command is dropped.
    CompleteReset,
}

/// One descriptor as the device read it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Observed {
    pub opcode: u16,
    pub flags: u16,
    pub data: [u32; 6],
}

/// One mailbox command the device accepted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MailboxPost {
    pub opcode: u8,
    pub tag: u32,
    pub in_param: u64,
    pub out_param: u64,
    pub token: u16,
    pub event: bool,
}

/// Mailbox opcodes that move object contexts in and out of the device.
#[derive(Debug, Copy, Clone)]
struct ContextOps {
    create: u8,
    query: u8,
    destroy: u8,
    size: usize,
}

struct Firmware {
    values: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    mode: QueueMode,
    pending_tail: Option<(u32, u32)>,
    head_writes: usize,
    observed: Vec<Observed>,
    rejections: HashMap<u16, u16>,
    reset_triggers: HashMap<u16, ResetAction>,
    mailbox_reset_triggers: HashMap<u8, ResetAction>,
    firmware_version: u32,
    base_table_attrs: Option<[u32; 6]>,
    function_clears: usize,
    doorbells: Vec<u64>,
    mailbox_busy_polls: u32,
    mailbox_running: u32,
    mailbox_stuck: bool,
    mailbox_status: u8,
    mailbox_results: HashMap<u8, u8>,
    posts: Vec<MailboxPost>,
    context_ops: Vec<ContextOps>,
    contexts: HashMap<(u8, u32), Vec<u8>>,
}

/// Simulated register window. See the crate docs for what the firmware model
/// does.
pub struct SimRegisters {
    firmware: Mutex<Firmware>,
    memory: HostDeviceMemory,
    reset: SimResetSignal,
}

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn half(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn pair(low: u32, high: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

impl SimRegisters {
    #[must_use]
    pub fn new(memory: HostDeviceMemory, reset: SimResetSignal) -> Self {
        Self {
            firmware: Mutex::new(Firmware {
                values: BTreeMap::new(),
                writes: Vec::new(),
                mode: QueueMode::Responsive,
                pending_tail: None,
                head_writes: 0,
                observed: Vec::new(),
                rejections: HashMap::new(),
                reset_triggers: HashMap::new(),
                mailbox_reset_triggers: HashMap::new(),
                firmware_version: 0x0103_0042,
                base_table_attrs: None,
                function_clears: 0,
                doorbells: Vec::new(),
                mailbox_busy_polls: 0,
                mailbox_running: 0,
                mailbox_stuck: false,
                mailbox_status: ops::MAILBOX_SUCCESS,
                mailbox_results: HashMap::new(),
                posts: Vec::new(),
                context_ops: Vec::new(),
                contexts: HashMap::new(),
            }),
            memory,
            reset,
        }
    }

    fn firmware(&self) -> MutexGuard<'_, Firmware> {
        self.firmware
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: QueueMode) {
        self.firmware().mode = mode;
    }

    /// Answer every `opcode` descriptor with `code` until cleared.
    pub fn reject(&self, opcode: u16, code: u16) {
        self.firmware().rejections.insert(opcode, code);
    }

    pub fn clear_rejections(&self) {
        self.firmware().rejections.clear();
    }

    pub fn reset_on(&self, opcode: u16, action: ResetAction) {
        self.firmware().reset_triggers.insert(opcode, action);
    }

    pub fn reset_on_mailbox(&self, opcode: u8, action: ResetAction) {
        self.firmware().mailbox_reset_triggers.insert(opcode, action);
    }

    pub fn clear_reset_triggers(&self) {
        let mut fw = self.firmware();
        fw.reset_triggers.clear();
        fw.mailbox_reset_triggers.clear();
    }

    pub fn set_firmware_version(&self, version: u32) {
        self.firmware().firmware_version = version;
    }

    /// Status queries after a post report "running" this many times.
    pub fn set_mailbox_busy_polls(&self, polls: u32) {
        self.firmware().mailbox_busy_polls = polls;
    }

    /// The mailbox never finishes.
    pub fn set_mailbox_stuck(&self, stuck: bool) {
        self.firmware().mailbox_stuck = stuck;
    }

    /// Mailbox `opcode` completes with `status` instead of success.
    pub fn set_mailbox_result(&self, opcode: u8, status: u8) {
        self.firmware().mailbox_results.insert(opcode, status);
    }

    /// Teach the firmware which mailbox opcodes store, read back and drop an
    /// object context of `size` bytes.
    pub fn context_ops(&self, create: u8, query: u8, destroy: u8, size: usize) {
        self.firmware().context_ops.push(ContextOps {
            create,
            query,
            destroy,
            size,
        });
    }

    /// Every descriptor consumed so far, in ring order.
    #[must_use]
    pub fn observed(&self) -> Vec<Observed> {
        self.firmware().observed.clone()
    }

    #[must_use]
    pub fn observed_opcodes(&self) -> Vec<u16> {
        self.firmware().observed.iter().map(|o| o.opcode).collect()
    }

    pub fn clear_observed(&self) {
        self.firmware().observed.clear();
    }

    #[must_use]
    pub fn posts(&self) -> Vec<MailboxPost> {
        self.firmware().posts.clone()
    }

    #[must_use]
    pub fn head_writes(&self) -> usize {
        self.firmware().head_writes
    }

    /// Every register write, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.firmware().writes.clone()
    }

    #[must_use]
    pub fn base_table_attrs(&self) -> Option<[u32; 6]> {
        self.firmware().base_table_attrs
    }

    #[must_use]
    pub fn function_clears(&self) -> usize {
        self.firmware().function_clears
    }

    #[must_use]
    pub fn doorbells(&self) -> Vec<u64> {
        self.firmware().doorbells.clone()
    }

    /// Context stored for `tag` by the class whose create opcode is `create`.
    #[must_use]
    pub fn context(&self, create: u8, tag: u32) -> Option<Vec<u8>> {
        self.firmware().contexts.get(&(create, tag)).cloned()
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.firmware().contexts.len()
    }

    /// Place a device-initiated message in the receive ring.
    ///
    /// # Panics
    /// If the receive ring has not been programmed.
    pub fn inject_receive(&self, opcode: u16, data: [u32; 6]) {
        let mut fw = self.firmware();
        let base = pair(fw.value(regs::RECEIVE_BASE_LOW), fw.value(regs::RECEIVE_BASE_HIGH));
        let depth = fw.value(regs::RECEIVE_DEPTH);
        assert!(depth > 0, "receive ring not programmed");
        let tail = fw.value(regs::RECEIVE_TAIL);

        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bytes[0..2].copy_from_slice(&opcode.to_le_bytes());
        for (chunk, w) in bytes[8..].chunks_exact_mut(4).zip(data) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        let slot = base + u64::from(tail) * DESCRIPTOR_SIZE as u64;
        assert!(self.memory.write(slot, &bytes), "receive ring unbacked");
        fw.values.insert(regs::RECEIVE_TAIL, (tail + 1) % depth);
    }

    /// Consume the send ring from the device tail up to `head`.
    fn consume(&self, fw: &mut Firmware, head: u32) {
        fw.head_writes += 1;
        if fw.mode == QueueMode::Stalled || self.reset.is_hardware_resetting() {
            return;
        }

        let base = pair(fw.value(regs::SEND_BASE_LOW), fw.value(regs::SEND_BASE_HIGH));
        let depth = fw.value(regs::SEND_DEPTH).max(1);
        let mut tail = fw.value(regs::SEND_TAIL);
        while tail != head {
            let slot = base + u64::from(tail) * DESCRIPTOR_SIZE as u64;
            let mut bytes = [0u8; DESCRIPTOR_SIZE];
            if !self.memory.read(slot, &mut bytes) {
                log::warn!("send ring slot {tail} unbacked");
                break;
            }
            if !self.execute(fw, &mut bytes) {
                break;
            }
            self.memory.write(slot, &bytes);
            tail = (tail + 1) % depth;
            if fw.mode == QueueMode::OnePerHeadWrite {
                break;
            }
        }

        match fw.mode {
            QueueMode::LateAck(reads) if reads > 0 => fw.pending_tail = Some((tail, reads)),
            _ => {
                fw.values.insert(regs::SEND_TAIL, tail);
            }
        }
    }

    /// Run one descriptor in place. Returns `false` if the device stopped
    /// before consuming it.
    fn execute(&self, fw: &mut Firmware, bytes: &mut [u8; DESCRIPTOR_SIZE]) -> bool {
        let opcode = half(bytes, 0);
        let flags = half(bytes, 2);
        let mut data = [0u32; 6];
        for (i, w) in data.iter_mut().enumerate() {
            *w = word(bytes, 8 + i * 4);
        }

        if let Some(action) = fw.reset_triggers.get(&opcode).copied() {
            self.apply(action);
            return false;
        }
        if opcode == ops::POST_MAILBOX {
            let op = bytes[24];
            if let Some(action) = fw.mailbox_reset_triggers.get(&op).copied() {
                self.apply(action);
                return false;
            }
        }

        fw.observed.push(Observed {
            opcode,
            flags,
            data,
        });

        let retval = if let Some(code) = fw.rejections.get(&opcode) {
            *code
        } else {
            match opcode {
                ops::QUERY_FIRMWARE_VERSION => data[0] = fw.firmware_version,
                ops::QUERY_HARDWARE_VERSION => data[0] = 0x0020,
                ops::CONFIGURE_BASE_TABLE_ATTRS => fw.base_table_attrs = Some(data),
                ops::FUNCTION_CLEAR => {
                    fw.function_clears += 1;
                    fw.contexts.clear();
                }
                ops::POST_MAILBOX => self.post_mailbox(fw, &data),
                ops::QUERY_MAILBOX_STATUS => {
                    let running = if fw.mailbox_stuck {
                        true
                    } else if fw.mailbox_running > 0 {
                        fw.mailbox_running -= 1;
                        true
                    } else {
                        false
                    };
                    data[0] = u32::from(fw.mailbox_status)
                        | if running { ops::MAILBOX_HW_RUN } else { 0 };
                }
                _ => {}
            }
            0
        };

        bytes[4..6].copy_from_slice(&retval.to_le_bytes());
        for (chunk, w) in bytes[8..].chunks_exact_mut(4).zip(data) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        true
    }

    fn post_mailbox(&self, fw: &mut Firmware, data: &[u32; 6]) {
        let post = MailboxPost {
            opcode: data[4].to_le_bytes()[0],
            tag: data[4] >> 8,
            in_param: pair(data[0], data[1]),
            out_param: pair(data[2], data[3]),
            token: u16::try_from(data[5] & 0xFFFF).unwrap_or(u16::MAX),
            event: data[5] & (1 << 16) != 0,
        };
        fw.mailbox_running = fw.mailbox_busy_polls;
        fw.mailbox_status = fw
            .mailbox_results
            .get(&post.opcode)
            .copied()
            .unwrap_or(ops::MAILBOX_SUCCESS);

        if fw.mailbox_status == ops::MAILBOX_SUCCESS {
            let class = fw.context_ops.iter().copied().find(|c| {
                post.opcode == c.create || post.opcode == c.query || post.opcode == c.destroy
            });
            if let Some(class) = class {
                let key = (class.create, post.tag);
                if post.opcode == class.create {
                    let mut context = vec![0u8; class.size];
                    self.memory.read(post.in_param, &mut context);
                    fw.contexts.insert(key, context);
                } else if post.opcode == class.query {
                    match fw.contexts.get(&key) {
                        Some(context) => {
                            self.memory.write(post.out_param, context);
                        }
                        None => fw.mailbox_status = 0x02,
                    }
                } else if fw.contexts.remove(&key).is_none() {
                    fw.mailbox_status = 0x02;
                }
            }
        }
        fw.posts.push(post);
    }

    fn apply(&self, action: ResetAction) {
        match action {
            ResetAction::BeginHardwareReset => self.reset.set_hardware_resetting(true),
            ResetAction::CompleteReset => self.reset.complete_reset(),
        }
    }
}

impl Firmware {
    fn value(&self, offset: u32) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }
}

impl RegisterAccess for SimRegisters {
    fn write_reg(&self, offset: u32, value: u32) {
        let mut fw = self.firmware();
        fw.writes.push((offset, value));
        fw.values.insert(offset, value);
        if offset == regs::SEND_HEAD {
            fw.pending_tail = None;
            self.consume(&mut fw, value);
        }
    }

    fn read_reg(&self, offset: u32) -> u32 {
        let mut fw = self.firmware();
        if offset == regs::SEND_TAIL
            && let Some((tail, reads)) = fw.pending_tail
        {
            if reads <= 1 {
                fw.values.insert(regs::SEND_TAIL, tail);
                fw.pending_tail = None;
            } else {
                fw.pending_tail = Some((tail, reads - 1));
            }
        }
        fw.value(offset)
    }

    fn ring_doorbell(&self, value: u64) {
        self.firmware().doorbells.push(value);
    }
}
