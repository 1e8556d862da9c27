use hwctx_cmdq::{
    ChannelConfig, ChannelError, CommandChannel, MailboxRequest, MailboxWait, POLL_TOKEN,
};
use hwctx_sim::{ResetAction, SimPlatform, ops};

fn config() -> ChannelConfig {
    ChannelConfig::DEFAULT
        .with_send_depth(16)
        .with_tx_timeout_us(10)
        .with_mailbox_idle_timeout_ms(1)
        .with_mailbox_timeout_ms(1)
        .with_mailbox_poll_interval_us(100)
}

#[test]
fn request_encoding() {
    let mut request = MailboxRequest::new(0x3, 0x12);
    request.event = true;
    request.in_param = 0x1_2345_6000;
    let d = request.to_descriptor();
    assert_eq!(d.data[0..2], [0x2345_6000, 0x1]);
    assert_eq!(d.data[4], 0x1203);
    assert_eq!(d.data[5], 0x1_FFFF);
    assert_eq!(request.token, POLL_TOKEN);
}

#[test]
fn post_waits_for_idle_then_for_completion() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_mailbox_busy_polls(3);
    let buffer = channel.alloc_mailbox().unwrap();

    let request = MailboxRequest::new(0x10, 7).with_input(buffer.device_address());
    channel.post_mailbox(&request, MailboxWait::Poll).unwrap();

    let posts = sim.registers.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!((posts[0].opcode, posts[0].tag), (0x10, 7));
    assert_eq!(posts[0].in_param, buffer.device_address().as_u64());
    assert_eq!(
        sim.registers.observed_opcodes(),
        [
            ops::QUERY_MAILBOX_STATUS,
            ops::POST_MAILBOX,
            ops::QUERY_MAILBOX_STATUS,
            ops::QUERY_MAILBOX_STATUS,
            ops::QUERY_MAILBOX_STATUS,
            ops::QUERY_MAILBOX_STATUS,
        ]
    );
}

#[test]
fn posted_mode_returns_after_posting() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_mailbox_busy_polls(5);
    channel
        .post_mailbox(&MailboxRequest::new(0x11, 1), MailboxWait::Posted)
        .unwrap();
    assert_eq!(
        sim.registers.observed_opcodes(),
        [ops::QUERY_MAILBOX_STATUS, ops::POST_MAILBOX]
    );
}

#[test]
fn completion_code_is_surfaced_verbatim() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_mailbox_result(0x10, 0x7);
    assert_eq!(
        channel.post_mailbox(&MailboxRequest::new(0x10, 1), MailboxWait::Poll),
        Err(ChannelError::DeviceRejected { opcode: 0x10, code: 0x7 })
    );
}

#[test]
fn busy_mailbox_times_out_without_posting() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_mailbox_stuck(true);
    assert_eq!(
        channel.post_mailbox(&MailboxRequest::new(0x10, 1), MailboxWait::Poll),
        Err(ChannelError::TimedOut)
    );
    assert!(sim.registers.posts().is_empty());
}

#[test]
fn reset_during_post_is_attributed_to_reset() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers
        .reset_on_mailbox(0x10, ResetAction::BeginHardwareReset);
    assert_eq!(
        channel.post_mailbox(&MailboxRequest::new(0x10, 1), MailboxWait::Poll),
        Err(ChannelError::DeviceResetting)
    );
}

#[test]
fn mailbox_buffers_are_freed_on_drop() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    let before = sim.memory.live_regions();
    let mut buffer = channel.alloc_mailbox().unwrap();
    buffer.write_bytes(0, &[1, 2, 3]);
    assert_eq!(sim.memory.live_regions(), before + 1);
    drop(buffer);
    assert_eq!(sim.memory.live_regions(), before);
}
