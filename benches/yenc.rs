//! Benchmarks for yEnc encoding
//!
//! Every posted byte goes through the encoder, so its throughput bounds the
//! posting rate of a single-threaded run.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nntp_poster::yenc;

/// Pseudo-random bytes so that escapes occur at a realistic rate
fn sample_data(size: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..size)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

fn bench_yenc_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("yenc_encode");

    // 1KB up to a typical 750KB article and beyond
    for size in [1_024, 102_400, 768_000, 4_096_000] {
        group.throughput(Throughput::Bytes(size as u64));
        let data = sample_data(size);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}KB", size / 1024)),
            &data,
            |b, data| {
                b.iter(|| yenc::encode(black_box(data), yenc::DEFAULT_LINE_LENGTH));
            },
        );
    }

    group.finish();
}

fn bench_line_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("yenc_line_length");
    let data = sample_data(768_000);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for line_length in [64, 128, 256, 997] {
        group.bench_with_input(
            BenchmarkId::from_parameter(line_length),
            &line_length,
            |b, &line_length| {
                let mut output = Vec::with_capacity(data.len() * 2);
                b.iter(|| {
                    output.clear();
                    yenc::encode_into(&mut output, black_box(&data), line_length)
                });
            },
        );
    }

    group.finish();
}

fn bench_decode_prepared(c: &mut Criterion) {
    let data = sample_data(768_000);
    let Ok(encoded) = yenc::encode(&data, yenc::DEFAULT_LINE_LENGTH) else {
        return;
    };

    let mut group = c.benchmark_group("yenc_decode");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("750KB", |b| b.iter(|| yenc::decode(black_box(&encoded.data))));
    group.finish();
}

criterion_group!(benches, bench_yenc_encode, bench_line_length, bench_decode_prepared);
criterion_main!(benches);
