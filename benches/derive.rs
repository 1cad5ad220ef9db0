use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crashpoint::fairness::FairnessChain;

fn bench_derive(c: &mut Criterion) {
    let chain = FairnessChain::new(500.0);

    c.bench_function("derive_single", |b| {
        b.iter(|| black_box(chain.derive(black_box("bench-genesis"))))
    });

    c.bench_function("derive_chain_64", |b| {
        b.iter(|| {
            let mut seed = "bench-genesis".to_string();
            for _ in 0..64 {
                seed = chain.derive(&seed).commitment_hash;
            }
            black_box(seed)
        })
    });
}

criterion_group!(benches, bench_derive);
criterion_main!(benches);
