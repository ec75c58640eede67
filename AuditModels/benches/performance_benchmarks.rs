use audit_models::{ContentHash, Tier};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn contract_source(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("    uint256 public value{} = {};", i, i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn benchmark_model_router(c: &mut Criterion) {
    let source = contract_source(900);
    c.bench_function("route 900-line contract", |b| {
        b.iter(|| black_box(Tier::route(black_box(&source))))
    });
}

fn benchmark_content_hash(c: &mut Criterion) {
    let source = contract_source(900);
    c.bench_function("keccak 900-line contract", |b| {
        b.iter(|| black_box(ContentHash::of(black_box(&source))))
    });
}

criterion_group!(benches, benchmark_model_router, benchmark_content_hash);
criterion_main!(benches);
