#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use packet_channel::core::field::FieldSpec;
use packet_channel::fields;
use packet_channel::prelude::*;
use std::sync::OnceLock;

#[derive(Debug, Default)]
struct Sample {
    id: i32,
    flag: bool,
    name: String,
    blob: Vec<u8>,
    stamp: u64,
}

impl Message for Sample {
    const NAME: &'static str = "Sample";
    const DIRECTION: Direction = Direction::Bidirectional;
}

impl AutoMessage for Sample {
    fn fields() -> Vec<FieldSpec<Self>> {
        fields!(Sample { id: i32, flag: bool, name: String, blob: Vec<u8>, stamp: u64 })
    }
}

fn channel() -> &'static Channel {
    static CHANNEL: OnceLock<Channel> = OnceLock::new();
    CHANNEL.get_or_init(|| {
        let mut registry = MessageTypeRegistry::new(Side::Server);
        registry.register_auto::<Sample, _>("fuzz", |_, _| {}).unwrap();
        let channel = registry.freeze("fuzz").unwrap();
        channel.accept_hello(PeerId(1), &channel.hello()).unwrap();
        channel
    })
}

fuzz_target!(|data: &[u8]| {
    let (queue, mut runner) = WorkQueue::new();
    let accepted = channel()
        .receive_with(PeerId(1), Bytes::copy_from_slice(data), &queue)
        .is_ok();
    // Rejected frames must never reach a handler
    assert_eq!(runner.run_pending(), usize::from(accepted));
});
