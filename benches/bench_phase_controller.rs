use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};
use std::time::Duration;

use fairsignal::config::ControllerConfig;
use fairsignal::control_system::intersection::Intersection;
use fairsignal::control_system::phase_controller::PhaseController;
use fairsignal::data_structures::{Action, IntersectionId, LaneId, LaneSnapshot, Phase, SignalColor, SignalString};
use fairsignal::simulation_engine::telemetry::IntersectionTelemetry;

/// An intersection with `num_lanes` links and one green phase per pair of
/// links, each followed by a yellow.
fn create_controller(num_lanes: usize) -> (PhaseController, IntersectionTelemetry) {
    let config = ControllerConfig {
        max_lanes: num_lanes,
        max_phases: num_lanes,
        ..ControllerConfig::default()
    };
    let lanes: Vec<LaneId> = (0..num_lanes).map(|i| LaneId(format!("lane{}", i))).collect();

    let mut phases = Vec::new();
    for pair in 0..num_lanes / 2 {
        let color_at = |link: usize, on: SignalColor| {
            if link / 2 == pair {
                on
            } else {
                SignalColor::Red
            }
        };
        let green = (0..num_lanes).map(|l| color_at(l, SignalColor::Green)).collect();
        let yellow = (0..num_lanes).map(|l| color_at(l, SignalColor::Yellow)).collect();
        phases.push(Phase::new(SignalString::new(green), 30.0));
        phases.push(Phase::new(SignalString::new(yellow), 4.0));
    }

    let intersection = Intersection::new(IntersectionId::from("bench"), phases, lanes.clone(), 0, &config)
        .expect("benchmark program is valid");
    let telemetry = IntersectionTelemetry::from_snapshots(
        None,
        lanes.into_iter().enumerate().map(|(i, lane)| {
            let snapshot = LaneSnapshot {
                vehicle_count: (i % 9) as u32 + 1,
                halted_count: (i % 5) as u32,
                waiting_time: (i % 7) as f64 * 12.0,
                mean_speed: 6.0,
                lane_length: 200.0,
            };
            (lane, snapshot)
        }),
    );
    (PhaseController::new(intersection, config), telemetry)
}

fn bench_decide_and_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("phase_controller_tick");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &size in [4, 8, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (mut controller, telemetry) = create_controller(size);
            let mut now = 0;
            b.iter(|| {
                let action = if now % 30 == 0 { Action::Switch } else { Action::Keep };
                let decision = controller.decide(now, action, &telemetry);
                black_box(controller.apply(decision, now));
                now += 5;
            });
        });
    }
    group.finish();
}

fn bench_score_phase(c: &mut Criterion) {
    let (controller, telemetry) = create_controller(16);
    c.bench_function("score_all_phases_16_lanes", |b| {
        b.iter(|| {
            let total: f64 = (0..controller.intersection().num_phases())
                .map(|phase| controller.score_phase(phase, black_box(600), &telemetry))
                .sum();
            black_box(total)
        });
    });
}

criterion_group!(benches, bench_decide_and_apply, bench_score_phase);
criterion_main!(benches);
