//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serline_core::{DecodeMode, Delimiter, LineFramer, WriteQueue};

fn framer_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n"
        .iter()
        .copied()
        .cycle()
        .take(64 * 1024)
        .collect();

    let mut group = c.benchmark_group("framer");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for (name, mode) in [("segment", DecodeMode::Segment), ("chunk", DecodeMode::Chunk)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut framer = LineFramer::new(mode);
                let mut count = 0usize;
                for chunk in black_box(&data).chunks(256) {
                    framer.push(chunk);
                    framer.drain_lines(&Delimiter::CrLf, |line| count += line.len());
                }
                black_box(count)
            })
        });
    }

    group.finish();
}

fn write_queue_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_queue");

    group.bench_function("push_drain_1k", |b| {
        let queue = WriteQueue::new();
        b.iter(|| {
            for _ in 0..1000 {
                queue.push(bytes::Bytes::from_static(b"AT+CSQ\r\n"));
            }
            black_box(queue.drain().len())
        })
    });

    group.finish();
}

criterion_group!(benches, framer_benchmark, write_queue_benchmark);
criterion_main!(benches);
