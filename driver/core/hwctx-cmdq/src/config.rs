//! Channel configuration.

use hwctx_platform::PollBudget;
use utils_setters_derive::Setters;

/// Byte offsets of the command queue registers in the function's window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Setters)]
pub struct RegisterMap {
    pub send_base_low: u32,
    pub send_base_high: u32,
    pub send_depth: u32,
    /// Software producer index of the send ring.
    pub send_head: u32,
    /// Device consumer index of the send ring.
    pub send_tail: u32,
    pub receive_base_low: u32,
    pub receive_base_high: u32,
    pub receive_depth: u32,
    /// Device producer index of the receive ring.
    pub receive_tail: u32,
    /// Software consumer index of the receive ring.
    pub receive_head: u32,
}

impl RegisterMap {
    /// The layout used by both supported device generations.
    pub const DEFAULT: Self = Self {
        send_base_low: 0x07000,
        send_base_high: 0x07004,
        send_depth: 0x07008,
        send_head: 0x07010,
        send_tail: 0x07014,
        receive_base_low: 0x07018,
        receive_base_high: 0x0701C,
        receive_depth: 0x07020,
        receive_tail: 0x07024,
        receive_head: 0x07028,
    };
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Setters)]
pub struct ChannelConfig {
    /// Descriptor slots in the send ring. One slot always stays empty.
    pub send_depth: u32,
    /// Descriptor slots in the receive ring.
    pub receive_depth: u32,
    pub registers: RegisterMap,
    /// How long a synchronous send waits for the device to consume it.
    pub tx_timeout_us: u64,
    pub poll_interval_us: u64,
    /// How long to wait for a previous mailbox command to finish.
    pub mailbox_idle_timeout_ms: u64,
    /// How long to wait for a posted mailbox command to complete.
    pub mailbox_timeout_ms: u64,
    /// Delay between mailbox status queries.
    pub mailbox_poll_interval_us: u64,
    /// Extra attempts for a timed-out send that no reset explains.
    pub send_retries: u32,
}

impl ChannelConfig {
    pub const DEFAULT: Self = Self {
        send_depth: 1024,
        receive_depth: 1024,
        registers: RegisterMap::DEFAULT,
        tx_timeout_us: 30_000,
        poll_interval_us: 1,
        mailbox_idle_timeout_ms: 10_000,
        mailbox_timeout_ms: 10_000,
        mailbox_poll_interval_us: 10,
        send_retries: 1,
    };

    #[must_use]
    pub const fn tx_budget(&self) -> PollBudget {
        PollBudget::micros(self.tx_timeout_us, self.poll_interval_us)
    }

    #[must_use]
    pub const fn mailbox_idle_budget(&self) -> PollBudget {
        PollBudget::millis(self.mailbox_idle_timeout_ms, self.mailbox_poll_interval_us)
    }

    #[must_use]
    pub const fn mailbox_budget(&self) -> PollBudget {
        PollBudget::millis(self.mailbox_timeout_ms, self.mailbox_poll_interval_us)
    }

    /// Both rings need at least one usable slot.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.send_depth >= 2 && self.receive_depth >= 2
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
