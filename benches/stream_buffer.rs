//! Benchmarks for stream buffer throughput
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frameflow::pipeline::{DataObject, ImageFrame};
use frameflow::{ExecutionContext, StreamingMode};
use std::thread;

const FRAMES: u64 = 1_000;

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_buffer_single_thread");
    group.throughput(Throughput::Elements(FRAMES));

    for mode in [
        StreamingMode::NewestFrameOnly,
        StreamingMode::ProcessAllFrames,
        StreamingMode::StoreAllFrames,
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", mode)), &mode, |b, &mode| {
            b.iter(|| {
                let ctx = ExecutionContext::default();
                let buffer = ctx.create_stream(mode, 0);
                let consumer = ctx.next_consumer_id();
                buffer.register_consumer(consumer);
                for i in 0..FRAMES {
                    buffer.add_frame(DataObject::scalar(i as f64)).unwrap();
                    black_box(buffer.try_next_frame(consumer).unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_producer_consumers(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_buffer_threaded");
    group.throughput(Throughput::Elements(FRAMES));

    for consumers in [1usize, 2, 4] {
        group.bench_with_input(
            BenchmarkId::new("process_all_cap8", consumers),
            &consumers,
            |b, &consumers| {
                b.iter(|| {
                    let ctx = ExecutionContext::default();
                    let buffer = ctx.create_stream(StreamingMode::ProcessAllFrames, 8);
                    let ids: Vec<_> = (0..consumers).map(|_| ctx.next_consumer_id()).collect();
                    for id in &ids {
                        buffer.register_consumer(*id);
                    }

                    let readers: Vec<_> = ids
                        .into_iter()
                        .map(|id| {
                            let buffer = buffer.clone();
                            thread::spawn(move || {
                                let mut count = 0u64;
                                while let Some(frame) = buffer.next_frame(id).unwrap() {
                                    black_box(&frame);
                                    count += 1;
                                }
                                count
                            })
                        })
                        .collect();

                    for i in 0..FRAMES {
                        let frame = DataObject::scalar(i as f64).with_last_frame(i + 1 == FRAMES);
                        buffer.add_frame(frame).unwrap();
                    }
                    for reader in readers {
                        assert_eq!(reader.join().unwrap(), FRAMES);
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_image_frames(c: &mut Criterion) {
    let image = ImageFrame::filled(640, 480, 3, 128);
    c.bench_function("newest_frame_only_vga_images", |b| {
        let ctx = ExecutionContext::default();
        let buffer = ctx.create_stream(StreamingMode::NewestFrameOnly, 1);
        let consumer = ctx.next_consumer_id();
        buffer.register_consumer(consumer);
        b.iter(|| {
            buffer.add_frame(DataObject::image(image.clone())).unwrap();
            black_box(buffer.next_frame(consumer).unwrap());
        });
    });
}

criterion_group!(benches, bench_single_thread, bench_producer_consumers, bench_image_frames);
criterion_main!(benches);
