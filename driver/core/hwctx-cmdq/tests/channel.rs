use hwctx_cmdq::{
    BaseTableAttr, ChannelConfig, ChannelError, CommandChannel, CommandDescriptor, Opcode,
};
use hwctx_platform::RegisterAccess;
use hwctx_sim::{QueueMode, ResetAction, SimPlatform, regs};

fn config() -> ChannelConfig {
    ChannelConfig::DEFAULT
        .with_send_depth(8)
        .with_receive_depth(4)
        .with_tx_timeout_us(10)
        .with_poll_interval_us(1)
}

fn op(raw: u16) -> CommandDescriptor {
    CommandDescriptor::new(Opcode::new(raw), true)
}

#[test]
fn construction_programs_both_rings() {
    let sim = SimPlatform::new();
    let _channel = CommandChannel::new(&sim, config()).unwrap();

    let offsets: Vec<u32> = sim.registers.writes().iter().map(|(o, _)| *o).collect();
    assert_eq!(
        offsets,
        [
            regs::SEND_BASE_LOW,
            regs::SEND_BASE_HIGH,
            regs::SEND_DEPTH,
            regs::SEND_TAIL,
            regs::SEND_HEAD,
            regs::RECEIVE_BASE_LOW,
            regs::RECEIVE_BASE_HIGH,
            regs::RECEIVE_DEPTH,
            regs::RECEIVE_HEAD,
            regs::RECEIVE_TAIL,
        ]
    );
    assert_eq!(sim.registers.read_reg(regs::SEND_DEPTH), 8);
    assert_eq!(sim.memory.live_regions(), 2);
}

#[test]
fn ring_memory_is_returned_on_drop() {
    let sim = SimPlatform::new();
    drop(CommandChannel::new(&sim, config()).unwrap());
    assert_eq!(sim.memory.live_regions(), 0);
}

#[test]
fn degenerate_depth_is_refused() {
    let sim = SimPlatform::new();
    let err = CommandChannel::new(&sim, config().with_send_depth(1)).err();
    assert_eq!(err, Some(ChannelError::InvalidDepth { send: 1, receive: 4 }));
}

#[test]
fn descriptors_arrive_in_order_and_retvals_are_copied_back() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.reject(0x101, 0x5);

    let mut cmd = [op(0x100).chained(), op(0x101).chained(), op(0x102)];
    let err = channel.send(&mut cmd).unwrap_err();

    assert_eq!(err, ChannelError::DeviceRejected { opcode: 0x101, code: 5 });
    assert_eq!(sim.registers.observed_opcodes(), [0x100, 0x101, 0x102]);
    assert_eq!(
        cmd.iter().map(|d| d.retval).collect::<Vec<_>>(),
        [0, 5, 0]
    );
    assert!(sim.registers.observed()[0].flags & 0b100 != 0, "chained");
}

#[test]
fn answers_are_read_back() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_firmware_version(0x0204_0001);
    assert_eq!(channel.query_firmware_version(), Ok(0x0204_0001));
}

#[test]
fn ring_wraps_without_overtaking_the_device() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config().with_send_depth(4)).unwrap();

    let mut expected = Vec::new();
    for round in 0..5u16 {
        let mut cmd = [op(0x200 + 2 * round).chained(), op(0x201 + 2 * round)];
        channel.send(&mut cmd).unwrap();
        expected.extend([0x200 + 2 * round, 0x201 + 2 * round]);
    }
    assert_eq!(sim.registers.observed_opcodes(), expected);
    assert_eq!(sim.registers.read_reg(regs::SEND_TAIL), 10 % 4);
}

#[test]
fn overlapping_senders_keep_commands_contiguous() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();

    std::thread::scope(|s| {
        for t in 0..4u16 {
            let channel = &channel;
            s.spawn(move || {
                for i in 0..25u16 {
                    let first = 0x1000 + t * 0x100 + 2 * i;
                    let mut cmd = [op(first).chained(), op(first + 1)];
                    channel.send(&mut cmd).unwrap();
                }
            });
        }
    });

    let opcodes = sim.registers.observed_opcodes();
    assert_eq!(opcodes.len(), 4 * 25 * 2);
    assert!(opcodes.chunks_exact(2).all(|pair| pair[1] == pair[0] + 1), "{opcodes:x?}");
}

#[test]
fn oversized_command_is_refused_untouched() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    let mut cmd = [op(0x1); 8];
    assert_eq!(
        channel.send(&mut cmd),
        Err(ChannelError::RingFull { needed: 8, free: 7 })
    );
    assert!(sim.registers.observed().is_empty());
    assert_eq!(sim.registers.head_writes(), 1);
}

#[test]
fn acknowledgement_at_the_final_reread_is_accepted() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    // 10 us at 1 us: eleven polls, then one last look.
    sim.registers.set_mode(QueueMode::LateAck(12));

    let mut cmd = [op(0x300)];
    assert_eq!(channel.send(&mut cmd), Ok(()));
    assert_eq!(sim.registers.head_writes(), 2, "no retry");
}

#[test]
fn stalled_device_times_out_within_the_retry_bound_and_resyncs() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config().with_send_retries(2)).unwrap();
    sim.registers.set_mode(QueueMode::Stalled);

    let mut cmd = [op(0x400)];
    assert_eq!(channel.send(&mut cmd), Err(ChannelError::TimedOut));
    assert_eq!(sim.registers.head_writes(), 1 + 3);

    // The head went back to the device tail, so the stuck command is not
    // replayed once the device recovers.
    sim.registers.set_mode(QueueMode::Responsive);
    let mut cmd = [op(0x401)];
    channel.send(&mut cmd).unwrap();
    assert_eq!(sim.registers.observed_opcodes(), [0x401]);
}

#[test]
fn partly_consumed_command_is_not_resent() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config().with_send_retries(1)).unwrap();
    sim.registers.set_mode(QueueMode::OnePerHeadWrite);

    let mut cmd = [op(0x800).chained(), op(0x801)];
    assert_eq!(channel.send(&mut cmd), Err(ChannelError::TimedOut));
    assert_eq!(sim.registers.observed_opcodes(), [0x800]);
    assert_eq!(sim.registers.head_writes(), 2, "no retry");

    // The next command starts behind the consumed descriptor.
    sim.registers.set_mode(QueueMode::Responsive);
    channel.send(&mut [op(0x802)]).unwrap();
    assert_eq!(sim.registers.observed_opcodes(), [0x800, 0x802]);
}

#[test]
fn zero_retries_sends_once() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config().with_send_retries(0)).unwrap();
    sim.registers.set_mode(QueueMode::Stalled);
    assert_eq!(channel.send(&mut [op(0x1)]), Err(ChannelError::TimedOut));
    assert_eq!(sim.registers.head_writes(), 2);
}

#[test]
fn posted_commands_do_not_wait() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.set_mode(QueueMode::Stalled);
    assert_eq!(channel.send(&mut [op(0x500).posted()]), Ok(()));
    assert_eq!(sim.clock.delays(), 0);
}

#[test]
fn resetting_device_is_not_touched() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.reset.set_hardware_resetting(true);

    assert_eq!(channel.send(&mut [op(0x1)]), Err(ChannelError::DeviceResetting));
    assert_eq!(sim.registers.head_writes(), 1);
    assert!(!channel.ring_doorbell(0x55));
    assert!(sim.registers.doorbells().is_empty());
}

#[test]
fn reset_starting_mid_command_is_reported_as_resetting() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.reset_on(0x600, ResetAction::BeginHardwareReset);

    assert_eq!(channel.send(&mut [op(0x600)]), Err(ChannelError::DeviceResetting));
    assert_eq!(sim.registers.head_writes(), 2, "reset failures are not retried");
}

#[test]
fn reset_completing_mid_command_is_final() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.reset_on(0x700, ResetAction::CompleteReset);

    assert_eq!(channel.send(&mut [op(0x700)]), Err(ChannelError::ResetCompleted));
    sim.registers.clear_reset_triggers();
    assert_eq!(channel.send(&mut [op(0x701)]), Err(ChannelError::ResetCompleted));
    assert!(sim.registers.observed().is_empty());
}

#[test]
fn receive_ring_is_drained_and_acknowledged() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    sim.registers.inject_receive(0x900, [1, 0, 0, 0, 0, 0]);
    sim.registers.inject_receive(0x901, [2, 0, 0, 0, 0, 0]);

    let mut seen = Vec::new();
    let n = channel.poll_receive(|d| seen.push((d.opcode.as_u16(), d.data[0])));
    assert_eq!(n, 2);
    assert_eq!(seen, [(0x900, 1), (0x901, 2)]);
    assert_eq!(sim.registers.writes().last(), Some(&(regs::RECEIVE_HEAD, 2)));
    assert_eq!(channel.poll_receive(|_| panic!("nothing new")), 0);
}

#[test]
fn doorbells_pass_through_when_quiet() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    assert!(channel.ring_doorbell(0x1234));
    assert_eq!(sim.registers.doorbells(), [0x1234]);
}

#[test]
fn base_table_attributes_fill_one_word_per_class() {
    let sim = SimPlatform::new();
    let channel = CommandChannel::new(&sim, config()).unwrap();
    let attrs = [
        BaseTableAttr::new().with_hop_num(1),
        BaseTableAttr::new().with_hop_num(2).with_ba_page_shift(1),
        BaseTableAttr::new().with_hop_num(0),
        BaseTableAttr::new().with_hop_num(3).with_buf_page_shift(2),
    ];
    channel.configure_base_table_attrs(&attrs).unwrap();
    let words = sim.registers.base_table_attrs().unwrap();
    assert_eq!(&words[..4], &[0x100, 0x201, 0x000, 0x320]);
}
