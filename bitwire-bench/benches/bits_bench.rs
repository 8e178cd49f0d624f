//! Bit buffer and bit pool benchmarks.

use bitwire_bits::{BitBuffer, FieldBits};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("bits_append");

    for fields in [8, 64, 512] {
        group.throughput(Throughput::Elements(fields as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &fields, |b, &fields| {
            b.iter(|| {
                let mut bits = BitBuffer::new();
                for i in 0..fields {
                    bits.append(&BitBuffer::from_u64(i as u64 & 0x3ff, 10).unwrap());
                }
                black_box(bits.to_bytes())
            });
        });
    }

    group.finish();
}

fn bench_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("bits_take");

    for size in [16, 128, 1024] {
        let bytes = vec![0xa5u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut pool = BitBuffer::from_bytes(bytes);
                let mut field = FieldBits::new(&mut pool);
                let mut sum = 0u64;
                for _ in 0..(size * 8 / 10) {
                    sum += field.take(10).unwrap().to_u64().unwrap();
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append, bench_take);

criterion_main!(benches);
