use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::time::Duration;

use fairsignal::config::EngineConfig;
use fairsignal::control_system::baselines::FixedCycle;
use fairsignal::engine::coordinator::Coordinator;
use fairsignal::simulation_engine::synthetic::{SyntheticConfig, SyntheticSimulator};

fn create_coordinator(side: usize) -> Coordinator<SyntheticSimulator> {
    let sim = SyntheticSimulator::grid(SyntheticConfig {
        rows: side,
        cols: side,
        ..SyntheticConfig::default()
    });
    let mut config = EngineConfig::default();
    config.coordinator.max_agents = side * side;
    Coordinator::new(sim, config).expect("default config is valid")
}

// Ten decision ticks of a fixed-cycle run on grids of growing size.
fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator_step");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(8));

    for &side in [2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("grid", side * side), &side, |b, &side| {
            b.iter_batched(
                || (create_coordinator(side), FixedCycle::new(60)),
                |(mut coordinator, mut source)| {
                    for _ in 0..10 {
                        let actions = coordinator.actions_from(&mut source);
                        let output = coordinator
                            .step(actions.as_deref())
                            .expect("episode is still running");
                        criterion::black_box(output.total_reward());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
