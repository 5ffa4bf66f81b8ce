//! Performance benchmarks for docsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docsync_engine::{
    CandidateRecord, CanonicalHasher, DiffEngine, ProfileRegistry, RemoteIndex, StructureEncoder,
};
use serde_json::json;

fn contract(i: usize) -> CandidateRecord {
    CandidateRecord::from_value(json!({
        "contract_reference": format!("CT-{:06}", i),
        "process_reference": format!("PR-{}", i / 10),
        "supplier_id": format!("S{}", i % 97),
        "amount": 1000.0 + i as f64 * 0.5,
        "signed_on": "2024-03-01",
        "items": ["design", "build", "audit"],
        "terms": {"currency": "COP", "installments": 3, "notes": null},
        "updated_at": "2024-03-02T10:00:00Z",
    }))
    .unwrap()
}

fn unit(i: usize) -> CandidateRecord {
    let ring: Vec<_> = (0..64)
        .map(|p| json!([-74.0 + p as f64 * 0.001, 4.6 + (i % 7) as f64 * 0.001]))
        .collect();
    CandidateRecord::from_value(json!({
        "unit_id": format!("U-{}", i),
        "geometry": {"type": "Polygon", "coordinates": [ring]},
    }))
    .unwrap()
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");
    let hasher = CanonicalHasher::new();

    group.bench_function("fingerprint_contract", |b| {
        let record = contract(1);
        b.iter(|| hasher.fingerprint(black_box(record.fields())))
    });

    group.bench_function("fingerprint_geometry", |b| {
        let record = unit(1);
        b.iter(|| hasher.fingerprint(black_box(record.fields())))
    });

    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    let encoder = StructureEncoder::default();
    let record = unit(1);

    group.bench_function("encode_polygon", |b| {
        b.iter(|| encoder.encode(black_box(record.fields())))
    });

    let encoded = encoder.encode(record.fields()).unwrap();
    group.bench_function("decode_polygon", |b| {
        b.iter(|| encoder.decode(black_box(&encoded)))
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let registry = ProfileRegistry::builtin();
    let hasher = CanonicalHasher::new();

    for size in [100, 1000, 5000].iter() {
        // Half already stored unchanged, a quarter modified, a quarter new.
        let index: RemoteIndex = (0..size * 3 / 4)
            .map(|i| {
                let mut fields = contract(i).into_fields();
                if i >= size / 2 {
                    fields.insert("amount".into(), json!(0));
                }
                (format!("contract_CT-{:06}", i), hasher.fingerprint(&fields))
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("contracts", size), size, |b, &size| {
            let engine = DiffEngine::with_run_stamp(&registry, 1);
            b.iter_batched(
                || (0..size).map(contract).collect::<Vec<_>>(),
                |candidates| engine.classify(black_box(candidates), "contract", &index),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hashing, bench_encoding, bench_classify);
criterion_main!(benches);
