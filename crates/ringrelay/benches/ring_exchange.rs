use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringrelay::{
    exchange_round, fill_buffer, run_hybrid, BufferFill, FabricConfig, RelayConfig, World,
    DEEP_LANE_CONFIG, SYNCHRONOUS_CONFIG,
};

const ROUNDS: usize = 1_000; // Exchange rounds per world
const PARTICIPANTS: usize = 4;

fn bench_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange");

    for &len in &[1usize, 64, 4096] {
        group.throughput(Throughput::Elements((ROUNDS * PARTICIPANTS * len) as u64));
        for (name, config) in [
            ("buffered", FabricConfig::default()),
            ("synchronous", SYNCHRONOUS_CONFIG),
        ] {
            group.bench_with_input(BenchmarkId::new(name, len), &len, |b, &len| {
                b.iter(|| {
                    World::with_config(PARTICIPANTS, config)
                        .unwrap()
                        .run(|p| {
                            let group = p.group();
                            let send = fill_buffer(BufferFill::Scaled, group.rank(), len);
                            let mut recv = vec![0.0; len];
                            for _ in 0..ROUNDS {
                                exchange_round(group, &send, &mut recv, 0)?;
                            }
                            Ok(black_box(recv[0]))
                        })
                        .unwrap()
                });
            });
        }
    }

    group.finish();
}

fn bench_hybrid_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_relay");
    let config = RelayConfig::default();

    for threads in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(
            (threads * PARTICIPANTS * config.iterations) as u64,
        ));
        group.bench_with_input(BenchmarkId::new("contexts", threads), &threads, |b, &threads| {
            b.iter(|| {
                World::with_config(PARTICIPANTS, DEEP_LANE_CONFIG)
                    .unwrap()
                    .run(|p| run_hybrid(p, Some(threads), &config))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_exchange, bench_hybrid_relay);
criterion_main!(benches);
