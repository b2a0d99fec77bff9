//! Checksum throughput benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use unarc_core::checksum::{Adler32, Crc32, Crc64};

/// Text-like data, repeated to the requested size.
fn text_like(size: usize) -> Vec<u8> {
    let text = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        let take = (size - data.len()).min(text.len());
        data.extend_from_slice(&text[..take]);
    }
    data
}

fn bench_crc32(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32");
    for (name, size) in [("256B", 256), ("4KB", 4 << 10), ("64KB", 64 << 10)] {
        let data = text_like(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| black_box(Crc32::compute(black_box(data))));
        });
    }
    group.finish();
}

fn bench_crc64(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc64");
    for (name, size) in [("256B", 256), ("4KB", 4 << 10), ("64KB", 64 << 10)] {
        let data = text_like(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| black_box(Crc64::compute(black_box(data))));
        });
    }
    group.finish();
}

fn bench_adler32(c: &mut Criterion) {
    let mut group = c.benchmark_group("adler32");
    for (name, size) in [("256B", 256), ("4KB", 4 << 10), ("64KB", 64 << 10)] {
        let data = text_like(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| black_box(Adler32::compute(black_box(data))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_crc32, bench_crc64, bench_adler32);
criterion_main!(benches);
