use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;

use fedavg_dp::{Aggregator, ClientUpdate, PrivacyConfig, PrivacyMechanism};

fn delta(seed: usize, n_params: usize) -> Vec<ArrayD<f32>> {
    vec![Array1::from_shape_fn(n_params, |j| ((seed * n_params + j) as f32).sin()).into_dyn()]
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let aggregator = Aggregator::new();

    for &n_clients in &[10, 50, 100] {
        for &n_params in &[1_000usize, 100_000] {
            let updates: Vec<ClientUpdate> = (0..n_clients)
                .map(|i| ClientUpdate {
                    client_id: format!("client_{}", i),
                    delta: delta(i, n_params),
                    num_examples: 10 + i,
                    local_metrics: BTreeMap::new(),
                })
                .collect();

            let id = format!("{}c_{}p", n_clients, n_params);
            group.bench_with_input(BenchmarkId::new("combine", &id), &updates, |b, updates| {
                b.iter(|| aggregator.combine(updates).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_privacy(c: &mut Criterion) {
    let mut group = c.benchmark_group("privacy");
    let dp = PrivacyMechanism::local_dp_gaussian(PrivacyConfig {
        clip_norm: 1.0,
        noise_multiplier: 1.1,
        num_microbatches: 4,
    })
    .unwrap();

    for &n_params in &[1_000usize, 100_000, 1_000_000] {
        let gradient = delta(1, n_params);
        let mut rng = StdRng::seed_from_u64(0);

        group.bench_with_input(
            BenchmarkId::new("no_privacy", n_params),
            &gradient,
            |b, gradient| {
                b.iter(|| {
                    PrivacyMechanism::NoPrivacy
                        .process_step(gradient.clone(), &mut rng)
                        .unwrap()
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("local_dp_gaussian", n_params),
            &gradient,
            |b, gradient| b.iter(|| dp.process_step(gradient.clone(), &mut rng).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation, bench_privacy);
criterion_main!(benches);
