use hwctx::{ClassConfig, Device, DeviceConfig, DeviceGeneration, Error, ObjectParams};
use hwctx_addresses::{ObjectClass, ObjectId};
use hwctx_cmdq::ChannelConfig;
use hwctx_platform::ResetSignal;
use hwctx_sim::{ResetAction, SimPlatform, ops};
use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;

const CQ: ObjectClass = ObjectClass::CompletionQueue;
const QP: ObjectClass = ObjectClass::QueuePair;
const MR: ObjectClass = ObjectClass::MemoryRegion;

fn channel() -> ChannelConfig {
    ChannelConfig::DEFAULT
        .with_send_depth(64)
        .with_receive_depth(16)
        .with_tx_timeout_us(20)
        .with_mailbox_idle_timeout_ms(1)
        .with_mailbox_timeout_ms(1)
}

fn config() -> DeviceConfig {
    DeviceConfig::new(DeviceGeneration::V2).with_channel(channel())
}

/// Teach the simulated firmware the context opcodes of every enabled class.
fn sim_for(config: &DeviceConfig) -> SimPlatform {
    let sim = SimPlatform::new();
    for class in config.classes.iter().flatten() {
        let ops = class.opcodes;
        sim.registers
            .context_ops(ops.create, ops.query, ops.destroy, class.entry_size);
    }
    sim
}

fn opcodes_of(sim: &SimPlatform) -> Vec<(u8, u32)> {
    sim.registers
        .posts()
        .iter()
        .map(|p| (p.opcode, p.tag))
        .collect()
}

fn id(raw: u32) -> ObjectId {
    ObjectId::new(raw)
}

#[test]
fn attach_announces_tables_and_programs_roots() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    assert_eq!(device.firmware_version(), 0x0103_0042);
    let attrs = sim.registers.base_table_attrs().unwrap();
    assert_eq!(attrs[CQ.index()], config.class(CQ).unwrap().base_table_attr().into_bits());

    let posts = sim.registers.posts();
    let roots: Vec<u8> = posts.iter().map(|p| p.opcode).collect();
    assert_eq!(roots, [0x10, 0x00, 0x30, 0x08]);
    assert!(posts.iter().all(|p| p.tag == 0 && sim.memory.read_u64(p.in_param).is_some()));

    // Two rings and one root block per class.
    assert_eq!(sim.memory.live_regions(), 6);
}

#[test]
fn create_programs_new_levels_before_the_context() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    sim.registers.clear_observed();
    let before = sim.registers.posts().len();

    let context = [0xAB; 64];
    let cq = device.create_object(CQ, &ObjectParams::new(&context)).unwrap();

    let posts = &opcodes_of(&sim)[before..];
    // Leaf (step 2) and middle block (step 1), deepest first, then the context.
    assert_eq!(posts, [(0x12, cq.as_u32()), (0x11, cq.as_u32()), (0x16, cq.as_u32())]);
    assert_eq!(sim.registers.context(0x16, cq.as_u32()).unwrap(), context);
    assert_eq!(device.live_objects(CQ), 1);
    assert_eq!(device.live_chunks(CQ), 1);

    let (entry, size) = device.find_table_entry(CQ, cq).unwrap();
    assert_eq!(size, 64);
    assert!(sim.memory.read_u64(entry.as_u64()).is_some());
}

#[test]
fn a_second_object_in_the_same_chunk_publishes_nothing() {
    let config = config().with_class(
        ClassConfig::new(CQ, DeviceGeneration::V2).with_bank_count(1),
    );
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    let first = device.create_object(CQ, &ObjectParams::new(&[1; 8])).unwrap();
    let before = sim.registers.posts().len();
    let second = device.create_object(CQ, &ObjectParams::new(&[2; 8])).unwrap();

    assert_eq!(opcodes_of(&sim)[before..], [(0x16, second.as_u32())]);
    assert_eq!(device.chunk_ref_count(CQ, first), 2);
    assert_eq!(device.chunk_ref_count(CQ, second), 2);
}

#[test]
fn query_reads_the_device_copy_back() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    let context: Vec<u8> = (0..64).collect();
    let cq = device.create_object(CQ, &ObjectParams::new(&context)).unwrap();

    let mut out = [0u8; 128];
    let len = device.query_object(CQ, cq, &mut out).unwrap();
    assert_eq!(len, 64);
    assert_eq!(out[..len], context[..]);

    assert_eq!(
        device.query_object(CQ, id(999), &mut out),
        Err(Error::NotLive { class: CQ, id: id(999) })
    );
}

#[test]
fn destroy_releases_everything_and_is_idempotent() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let baseline = sim.memory.live_regions();

    let cq = device.create_object(CQ, &ObjectParams::new(&[7; 64])).unwrap();
    assert!(sim.memory.live_regions() > baseline);

    let before = sim.registers.posts().len();
    device.destroy_object(CQ, cq).unwrap();
    let posts = opcodes_of(&sim)[before..].to_vec();
    assert_eq!(posts[0], (0x19, cq.as_u32()));
    assert!(posts.contains(&(0x26, cq.as_u32())), "leaf cleared: {posts:x?}");
    assert!(posts.contains(&(0x25, cq.as_u32())), "block cleared: {posts:x?}");

    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert!(device.find_table_entry(CQ, cq).is_none());
    assert_eq!(sim.memory.live_regions(), baseline);
    assert_eq!(sim.registers.context_count(), 0);

    let posted = sim.registers.posts().len();
    device.destroy_object(CQ, cq).unwrap();
    assert_eq!(sim.registers.posts().len(), posted);
}

#[test]
fn single_hop_table_spreads_ids_over_chunks() {
    // 64 entries per 4 KiB leaf.
    let cq = ClassConfig::new(CQ, DeviceGeneration::V2)
        .with_hop_num(1)
        .with_bank_count(1)
        .with_entry_size(64)
        .with_chunk_size(4096);
    let config = config().with_class(cq);
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    let ids: Vec<ObjectId> = (0..=70)
        .map(|_| device.create_object(CQ, &ObjectParams::new(&[])).unwrap())
        .collect();
    assert_eq!(ids, (0..=70).map(id).collect::<Vec<_>>());

    let leaf_writes: Vec<u32> = sim
        .registers
        .posts()
        .iter()
        .filter(|p| p.opcode == 0x11)
        .map(|p| p.tag)
        .collect();
    assert_eq!(leaf_writes, [0, 64]);

    let (first, _) = device.find_table_entry(CQ, id(0)).unwrap();
    let (last, _) = device.find_table_entry(CQ, id(63)).unwrap();
    let (next, _) = device.find_table_entry(CQ, id(64)).unwrap();
    assert_eq!(last, first + 63 * 64);
    assert_ne!(next, first + 64 * 64);
    assert_eq!(device.live_chunks(CQ), 2);
    assert_eq!(device.chunk_ref_count(CQ, id(0)), 64);
    assert_eq!(device.chunk_ref_count(CQ, id(70)), 7);

    for raw in 0..64 {
        device.destroy_object(CQ, id(raw)).unwrap();
    }
    assert_eq!(device.chunk_ref_count(CQ, id(0)), 0);
    assert_eq!(device.chunk_ref_count(CQ, id(70)), 7);
    assert_eq!(device.live_chunks(CQ), 1);
    assert!(device.find_table_entry(CQ, id(0)).is_none());
    assert!(device.find_table_entry(CQ, id(70)).is_some());

    let leaf_clears: Vec<u32> = sim
        .registers
        .posts()
        .iter()
        .filter(|p| p.opcode == 0x25)
        .map(|p| p.tag)
        .collect();
    assert_eq!(leaf_clears, [63]);
}

#[test]
fn direct_table_programs_each_leaf() {
    // 8 entries per 256 byte chunk, no root.
    let mr = ClassConfig::new(MR, DeviceGeneration::V2)
        .with_hop_num(0)
        .with_bank_count(1)
        .with_entry_size(32)
        .with_chunk_size(256);
    let config = config().with_class(mr);
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    assert!(sim.registers.posts().iter().all(|p| p.opcode != 0x08));

    for _ in 0..=8 {
        device.create_object(MR, &ObjectParams::new(&[0x5A; 32])).unwrap();
    }
    let leaves: Vec<(u32, u64)> = sim
        .registers
        .posts()
        .iter()
        .filter(|p| p.opcode == 0x08)
        .map(|p| (p.tag, p.in_param))
        .collect();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].0, 0);
    assert_eq!(leaves[1].0, 8);

    let (five, size) = device.find_table_entry(MR, id(5)).unwrap();
    assert_eq!(size, 32);
    assert_eq!(five.as_u64(), leaves[0].1 + 5 * 32);
    assert_eq!(device.chunk_ref_count(MR, id(5)), 8);
    assert_eq!(device.chunk_ref_count(MR, id(8)), 1);

    assert_eq!(
        device.create_object(MR, &ObjectParams::new(&[0; 33])),
        Err(Error::ContextTooLarge { len: 33, max: 32 })
    );
}

#[test]
fn create_fails_fast_while_the_device_resets() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let posts = sim.registers.posts().len();
    let regions = sim.memory.live_regions();

    sim.reset.set_hardware_resetting(true);
    let err = device.create_object(QP, &ObjectParams::new(&[0; 16]));
    assert_eq!(err, Err(Error::DeviceResetting));
    assert!(err.unwrap_err().is_transient());

    assert_eq!(device.live_objects(QP), 0);
    assert_eq!(device.bank_load(QP), vec![0; 8]);
    assert_eq!(sim.registers.posts().len(), posts);
    assert_eq!(sim.memory.live_regions(), regions);
    assert!(!device.ring_doorbell(0x1234));
}

#[test]
fn rejected_create_is_rolled_back() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let regions = sim.memory.live_regions();

    sim.registers.set_mailbox_result(0x16, 0x03);
    let before = sim.registers.posts().len();
    let err = device.create_object(CQ, &ObjectParams::new(&[0; 64]));
    assert_eq!(err, Err(Error::DeviceRejected { opcode: 0x16, code: 0x03 }));

    let posts: Vec<u8> = sim.registers.posts()[before..].iter().map(|p| p.opcode).collect();
    assert_eq!(posts[..3], [0x12, 0x11, 0x16]);
    assert!(posts.contains(&0x26) && posts.contains(&0x25));
    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert_eq!(sim.memory.live_regions(), regions);

    sim.registers.set_mailbox_result(0x16, 0x01);
    assert!(device.create_object(CQ, &ObjectParams::new(&[0; 64])).is_ok());
}

#[test]
fn failed_level_programming_releases_the_identifier() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    sim.registers.set_mailbox_result(0x11, 0x07);
    let err = device.create_object(CQ, &ObjectParams::new(&[]));
    assert_eq!(err, Err(Error::DeviceRejected { opcode: 0x11, code: 0x07 }));
    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert_eq!(sim.registers.context_count(), 0);
}

#[test]
fn out_of_memory_leaves_no_identifier_behind() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    sim.memory.fail_after(0);
    let err = device.create_object(CQ, &ObjectParams::new(&[]));
    assert_eq!(err, Err(Error::OutOfMemory));
    assert!(err.unwrap_err().is_transient());
    assert_eq!(device.live_objects(CQ), 0);

    sim.memory.clear_failures();
    assert!(device.create_object(CQ, &ObjectParams::new(&[])).is_ok());
}

#[test]
fn destroy_during_reset_still_releases_locally() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let baseline = sim.memory.live_regions();
    let cq = device.create_object(CQ, &ObjectParams::new(&[0; 64])).unwrap();

    sim.registers.reset_on_mailbox(0x19, ResetAction::BeginHardwareReset);
    assert_eq!(device.destroy_object(CQ, cq), Ok(()));
    assert!(sim.reset.is_hardware_resetting());

    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert_eq!(sim.memory.live_regions(), baseline);
}

#[test]
fn destroy_rejected_by_the_device_is_reported_after_cleanup() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let cq = device.create_object(CQ, &ObjectParams::new(&[0; 64])).unwrap();

    sim.registers.set_mailbox_result(0x19, 0x05);
    assert_eq!(
        device.destroy_object(CQ, cq),
        Err(Error::DeviceRejected { opcode: 0x19, code: 0x05 })
    );
    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert_eq!(device.destroy_object(CQ, cq), Ok(()));
}

#[test]
fn disabled_classes_are_refused() {
    let config = config().without_class(MR);
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    assert_eq!(
        device.create_object(MR, &ObjectParams::new(&[])),
        Err(Error::UnknownClass(MR))
    );
    assert_eq!(device.destroy_object(MR, id(1)), Err(Error::UnknownClass(MR)));
    assert!(device.find_table_entry(MR, id(1)).is_none());
    assert_eq!(device.live_objects(MR), 0);
}

#[test]
fn queue_pairs_honour_the_bank_mask() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    let qp = device
        .create_object(QP, &ObjectParams::new(&[0; 256]).with_bank_mask(0b0100))
        .unwrap();
    assert_eq!(qp.bank(3), 2);
    // Identifiers below 8 are reserved.
    assert!(qp.as_u32() >= 8);
    assert_eq!(device.bank_load(QP), [0, 0, 1, 0, 0, 0, 0, 0]);
}

#[test]
fn reset_cycle_reprograms_roots() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    let cq = device.create_object(CQ, &ObjectParams::new(&[0; 64])).unwrap();
    assert!(device.ring_doorbell(1));

    sim.reset.complete_reset();
    assert_eq!(
        device.create_object(CQ, &ObjectParams::new(&[])),
        Err(Error::DeviceLost)
    );
    assert!(!device.ring_doorbell(2));

    device.notify_reset_down();
    device.notify_reset_uninit();
    let before = sim.registers.posts().len();
    device.notify_reset_init().unwrap();
    let roots: Vec<u8> = sim.registers.posts()[before..].iter().map(|p| p.opcode).collect();
    assert_eq!(roots, [0x10, 0x00, 0x30, 0x08]);

    assert!(device.ring_doorbell(3));
    assert_eq!(sim.registers.doorbells(), [1, 3]);
    let fresh = device.create_object(CQ, &ObjectParams::new(&[])).unwrap();
    assert_ne!(fresh, cq);
    device.destroy_object(CQ, cq).unwrap();
}

#[test]
fn failed_reinitialisation_leaves_the_device_lost() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    sim.reset.complete_reset();
    device.notify_reset_down();
    device.notify_reset_uninit();
    sim.registers.reject(ops::CONFIGURE_BASE_TABLE_ATTRS, 0x02);
    assert!(device.notify_reset_init().is_err());
    assert_eq!(
        device.create_object(CQ, &ObjectParams::new(&[])),
        Err(Error::DeviceLost)
    );
}

#[test]
fn attach_failures_unwind() {
    let config = config();

    let sim = sim_for(&config);
    // Both rings and the first root, then nothing.
    sim.memory.fail_after(3);
    assert_eq!(Device::attach(&sim, config).err(), Some(Error::OutOfMemory));
    assert_eq!(sim.memory.live_regions(), 0);

    let sim = sim_for(&config);
    sim.registers.reject(ops::QUERY_FIRMWARE_VERSION, 0x01);
    assert_eq!(
        Device::attach(&sim, config).err(),
        Some(Error::DeviceRejected { opcode: 0x0001, code: 0x01 })
    );
    assert_eq!(sim.memory.live_regions(), 0);

    let sim = sim_for(&config);
    sim.registers.set_mailbox_result(0x00, 0x04);
    assert!(matches!(
        Device::attach(&sim, config).err(),
        Some(Error::DeviceRejected { opcode: 0x00, .. })
    ));
    assert_eq!(sim.memory.live_regions(), 0);

    let bad = config.with_class(ClassConfig::new(CQ, DeviceGeneration::V2).with_bank_count(3));
    let sim = sim_for(&bad);
    assert!(matches!(
        Device::attach(&sim, bad).err(),
        Some(Error::InvalidConfig(_))
    ));
    assert_eq!(sim.memory.allocations(), 0);
}

#[test]
fn detach_clears_the_function_and_frees_memory() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    device.create_object(CQ, &ObjectParams::new(&[0; 64])).unwrap();
    device.create_object(QP, &ObjectParams::new(&[0; 256])).unwrap();

    device.detach();
    assert_eq!(sim.registers.function_clears(), 1);
    assert_eq!(sim.registers.context_count(), 0);
    assert_eq!(sim.memory.live_regions(), 0);
}

#[test]
fn dropping_without_detach_frees_memory() {
    let config = config();
    let sim = sim_for(&config);
    {
        let device = Device::attach(&sim, config).unwrap();
        device.create_object(CQ, &ObjectParams::new(&[0; 64])).unwrap();
    }
    assert_eq!(sim.registers.function_clears(), 0);
    assert_eq!(sim.memory.live_regions(), 0);
}

#[test]
fn device_messages_reach_the_handler() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();

    sim.registers.inject_receive(0x9001, [5, 0, 0, 0, 0, 0]);
    let mut seen = Vec::new();
    let count = device.poll_device_messages(|d| seen.push((d.opcode.as_u16(), d.data[0])));
    assert_eq!(count, 1);
    assert_eq!(seen, [(0x9001, 5)]);
}

#[test]
fn concurrent_lifecycles_share_the_device() {
    let config = config();
    let sim = sim_for(&config);
    let device = Device::attach(&sim, config).unwrap();
    sim.registers.clear_observed();
    let before = sim.registers.posts().len();
    let live = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for t in 0..4u8 {
            let (device, live) = (&device, &live);
            s.spawn(move || {
                for round in 0..50u8 {
                    let context = [t, round];
                    let ids: Vec<ObjectId> = (0..3)
                        .map(|_| device.create_object(CQ, &ObjectParams::new(&context)).unwrap())
                        .collect();
                    for &id in &ids {
                        assert!(live.lock().unwrap().insert(id), "{id} handed out twice");
                    }
                    for id in ids {
                        live.lock().unwrap().remove(&id);
                        device.destroy_object(CQ, id).unwrap();
                    }
                }
            });
        }
    });

    assert_eq!(device.live_objects(CQ), 0);
    assert_eq!(device.live_chunks(CQ), 0);
    assert_eq!(sim.registers.context_count(), 0);

    // Every mailbox post is followed by its own completion poll before the
    // next caller gets to post.
    let opcodes = sim.registers.observed_opcodes();
    assert!(
        opcodes
            .windows(2)
            .all(|w| w != [ops::POST_MAILBOX, ops::POST_MAILBOX])
    );
    let posted = opcodes.iter().filter(|&&o| o == ops::POST_MAILBOX).count();
    assert_eq!(posted, sim.registers.posts().len() - before);
}
