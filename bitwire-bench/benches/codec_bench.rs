//! Message encoding/decoding benchmarks.

use bitwire_codec::{Codec, FixedClock, Part};
use bitwire_schema::{Message, SchemaSet, Value};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tracing_subscriber::EnvFilter;

// 2024-03-10T12:00:00Z
const NOW: i64 = 1_710_072_000;

fn create_codec() -> Codec {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let schema = SchemaSet::from_json(&serde_json::json!({
        "enums": [
            {"name": "Mode", "values": [
                {"name": "IDLE", "number": 0},
                {"name": "SURVEY", "number": 1},
                {"name": "RETURN", "number": 2}
            ]}
        ],
        "messages": [
            {
                "name": "NavReport",
                "options": {"id": 12, "max_bytes": 256},
                "fields": [
                    {"name": "time", "type": "int64", "label": "required",
                     "options": {"codec": "time", "in_head": true}},
                    {"name": "vehicle", "type": "uint32", "label": "required",
                     "options": {"min": 0, "max": 255, "in_head": true}},
                    {"name": "x", "type": "double", "label": "required",
                     "options": {"min": -10000, "max": 10000, "precision": 1}},
                    {"name": "y", "type": "double", "label": "required",
                     "options": {"min": -10000, "max": 10000, "precision": 1}},
                    {"name": "depth", "type": "double",
                     "options": {"min": 0, "max": 6000, "precision": 1}},
                    {"name": "mode", "type": "enum", "type_name": "Mode"},
                    {"name": "samples", "type": "int32", "label": "repeated",
                     "options": {"min": -100, "max": 100, "max_repeat": 16}},
                    {"name": "note", "type": "string", "options": {"max_length": 32}}
                ]
            }
        ]
    }))
    .unwrap();

    let codec = Codec::new(schema).with_clock(FixedClock::at_unix(NOW));
    codec.load("NavReport").unwrap();
    codec
}

fn create_report(samples: usize) -> Message {
    let mut msg = Message::new("NavReport");
    msg.set("time", (NOW - 30) * 1_000_000);
    msg.set("vehicle", 7u32);
    msg.set("x", 1234.5);
    msg.set("y", -842.1);
    msg.set("depth", 310.2);
    msg.set("mode", Value::Enum(1));
    msg.set_repeated(
        "samples",
        (0..samples).map(|i| Value::Int(i as i64 % 100)).collect(),
    );
    msg.set("note", "survey leg 4");
    msg
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_encode");
    let codec = create_codec();

    for samples in [0, 4, 16] {
        let report = create_report(samples);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &report, |b, report| {
            b.iter(|| black_box(codec.encode(report).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_decode");
    let codec = create_codec();

    for samples in [0, 4, 16] {
        let encoded = codec.encode(&create_report(samples)).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &encoded, |b, encoded| {
            b.iter(|| black_box(codec.decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_size(c: &mut Criterion) {
    let codec = create_codec();
    let report = create_report(16);

    c.bench_function("message_size", |b| {
        b.iter(|| black_box(codec.size_bits(&report, Part::Unknown).unwrap()));
    });
}

fn bench_load(c: &mut Criterion) {
    let codec = create_codec();

    c.bench_function("message_load", |b| {
        b.iter(|| black_box(codec.load("NavReport").unwrap()));
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_size, bench_load);

criterion_main!(benches);
