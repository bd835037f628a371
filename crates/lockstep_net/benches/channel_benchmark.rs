//! Benchmark for the reliable channel and frame buffer hot paths.
//!
//! Run with: cargo bench --package lockstep_net --bench channel_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lockstep_net::{FrameBuffer, LockstepConfig, LossyLink, NetworkConditions, ReliableChannel};

fn channel_pair() -> (ReliableChannel<LossyLink>, ReliableChannel<LossyLink>) {
    let config = LockstepConfig::default();
    let (a, b) = LossyLink::pair(NetworkConditions::perfect(), 7);
    (ReliableChannel::new(a, &config), ReliableChannel::new(b, &config))
}

fn benchmark_reliable_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("reliable_round_trip");
    for size in [16usize, 128, 512] {
        let payload = vec![0xA5u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let (mut sender, mut receiver) = channel_pair();
            let mut now = 0u64;
            b.iter(|| {
                now += 1;
                sender.send_packet(now, Some(payload.as_slice())).unwrap();
                let delivered = receiver.receive().unwrap();
                // Heartbeat carries the ack back and empties the window.
                receiver.send_packet(now, None).unwrap();
                sender.receive().unwrap();
                black_box(delivered)
            });
        });
    }
    group.finish();
}

fn benchmark_window_backlog(c: &mut Criterion) {
    c.bench_function("send_with_32_unacked", |b| {
        let (mut sender, mut receiver) = channel_pair();
        let payload = [7u8; 24];
        for i in 0..32 {
            sender.send_packet(i, Some(&payload[..])).unwrap();
        }
        b.iter(|| {
            // The peer never acks, so every send resends the whole window.
            sender.send_packet(100, None).unwrap();
            black_box(receiver.receive().unwrap())
        });
    });
}

fn benchmark_frame_buffer(c: &mut Criterion) {
    c.bench_function("frame_buffer_add_drain_64", |b| {
        let payload = vec![1u8; 32];
        b.iter(|| {
            let mut buffer = FrameBuffer::new(64, 1024);
            // Reverse order is the worst case for the heap.
            for frame in (1..=64).rev() {
                buffer.add_frame_data(frame, payload.clone());
            }
            let mut applied = 0;
            while buffer.is_ready() {
                applied += buffer.begin_frame().len();
                buffer.end_frame();
            }
            black_box(applied)
        });
    });
}

criterion_group!(
    benches,
    benchmark_reliable_round_trip,
    benchmark_window_backlog,
    benchmark_frame_buffer,
);
criterion_main!(benches);
