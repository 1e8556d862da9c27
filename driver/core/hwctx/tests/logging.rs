use hwctx::{Device, DeviceConfig, DeviceGeneration, Error, ObjectParams};
use hwctx_addresses::ObjectClass;
use hwctx_cmdq::ChannelConfig;
use hwctx_logger::RingLogger;
use hwctx_sim::SimPlatform;
use log::LevelFilter;

#[test]
fn lifecycle_is_visible_in_the_message_buffer() {
    let logger = RingLogger::new(LevelFilter::Info, 256).init().unwrap();

    let channel = ChannelConfig::DEFAULT
        .with_send_depth(16)
        .with_receive_depth(4)
        .with_mailbox_idle_timeout_ms(1)
        .with_mailbox_timeout_ms(1);
    let config = DeviceConfig::new(DeviceGeneration::V3).with_channel(channel);
    let sim = SimPlatform::new();
    let device = Device::attach(&sim, config).unwrap();

    sim.registers.set_mailbox_result(0x16, 0x09);
    let err = device.create_object(ObjectClass::CompletionQueue, &ObjectParams::new(&[]));
    assert_eq!(err, Err(Error::DeviceRejected { opcode: 0x16, code: 0x09 }));
    device.detach();

    let lines = logger.drain();
    let has = |prefix: &str| lines.iter().any(|l| l.starts_with(prefix));
    assert!(has("[INFO] hwctx_cmdq::channel: command queue ready"), "{lines:#?}");
    assert!(has("[INFO] hwctx_cmdq::channel: firmware version 1.3.66"), "{lines:#?}");
    assert!(has("[INFO] hwctx::device: device attached: 4 classes"), "{lines:#?}");
    assert!(has("[ERROR] hwctx_cmdq::mailbox: mailbox op 0x16"), "{lines:#?}");
    assert!(has("[WARN] hwctx::device: cq 0: create failed"), "{lines:#?}");
    assert!(has("[INFO] hwctx::device: device detached"), "{lines:#?}");
    assert!(lines.iter().all(|l| !l.starts_with("[DEBUG]")));
}
