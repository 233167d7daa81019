//! Warm-up log codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ember_core::{
    CallSiteShapes, HolderFingerprint, MethodKey, ReceiverTypeHint, TypeFingerprint, WarmUpRecord,
};
use ember_warmup::codec;

fn sample_records(count: usize) -> Vec<WarmUpRecord> {
    (0..count)
        .map(|i| {
            let holder = format!("app/pkg{}/Class{}", i % 32, i);
            let key = MethodKey::new(
                HolderFingerprint::of(holder.as_bytes()),
                format!("method{i}"),
                "(Ljava/lang/String;I)V",
            );
            let shapes: CallSiteShapes = [
                ReceiverTypeHint::Concrete(TypeFingerprint::of(holder.as_bytes())),
                ReceiverTypeHint::NullSeen,
            ]
            .into_iter()
            .collect();
            WarmUpRecord::new(key, shapes, (i as u64 % 97) * 1000)
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let records = sample_records(1024);
    let encoded = codec::encode(600_000, &records);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("encode_1024", |b| {
        b.iter(|| codec::encode(600_000, black_box(&records)))
    });
    group.bench_function("decode_1024", |b| {
        b.iter(|| codec::decode(black_box(&encoded)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
