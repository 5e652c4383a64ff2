use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use packet_channel::core::field::FieldSpec;
use packet_channel::fields;
use packet_channel::prelude::*;

#[derive(Debug, Default, Clone)]
struct Move {
    entity: i32,
    x: f64,
    y: f64,
    z: f64,
    on_ground: bool,
}

impl Message for Move {
    const NAME: &'static str = "Move";
    const DIRECTION: Direction = Direction::ClientToServer;
}

impl AutoMessage for Move {
    fn fields() -> Vec<FieldSpec<Self>> {
        fields!(Move { entity: i32, x: f64, y: f64, z: f64, on_ground: bool })
    }
}

#[derive(Debug, Default, Clone)]
struct Chat {
    text: String,
}

impl Message for Chat {
    const NAME: &'static str = "Chat";
    const DIRECTION: Direction = Direction::ClientToServer;
}

impl WireMessage for Chat {
    fn encode(&self, writer: &mut FrameWriter<'_>) -> Result<()> {
        writer.write_str(&self.text)
    }

    fn decode(reader: &mut FrameReader<'_>) -> Result<Self> {
        Ok(Self {
            text: reader.read_string()?,
        })
    }
}

fn channels() -> (Channel, Channel) {
    let mut client = MessageTypeRegistry::new(Side::Client);
    client.register_auto::<Move, _>("bench", |_, _| {}).unwrap();
    client.register::<Chat, _>("bench", |_, _| {}).unwrap();

    let mut server = MessageTypeRegistry::new(Side::Server);
    server.register_auto::<Move, _>("bench", |_, _| {}).unwrap();
    server.register::<Chat, _>("bench", |_, _| {}).unwrap();

    let client = client.freeze("bench").unwrap();
    let server = server.freeze("bench").unwrap();
    server.accept_hello(PeerId(1), &server.hello()).unwrap();
    (client, server)
}

fn bench_encode(c: &mut Criterion) {
    let (client, _) = channels();
    let movement = Move {
        entity: 42,
        x: 1.5,
        y: 64.0,
        z: -3.25,
        on_ground: true,
    };
    let chat = Chat {
        text: "a".repeat(256),
    };

    let mut group = c.benchmark_group("encode");
    group.bench_function("auto_fields", |b| {
        b.iter(|| client.encode_frame(&PeerSelector::Server, &movement).unwrap())
    });
    group.bench_function("explicit_string", |b| {
        b.iter(|| client.encode_frame(&PeerSelector::Server, &chat).unwrap())
    });
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let (client, server) = channels();
    let frame = client
        .encode_frame(
            &PeerSelector::Server,
            &Move {
                entity: 7,
                ..Move::default()
            },
        )
        .unwrap();
    let (queue, mut runner) = WorkQueue::new();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("decode_enqueue_run", |b| {
        b.iter_batched(
            || frame.clone(),
            |frame: Bytes| {
                server.receive_with(PeerId(1), frame, &queue).unwrap();
                runner.run_pending()
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_dispatch);
criterion_main!(benches);
