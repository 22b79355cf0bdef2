use serde::Serialize;

use crate::config::RewardConfig;
use crate::control_system::intersection::Intersection;
use crate::simulation_engine::telemetry::IntersectionTelemetry;

/// The normalized reward terms for one intersection on one tick, and their
/// weighted sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub queue_efficiency: f64,
    pub wait_efficiency: f64,
    pub throughput: f64,
    pub fairness: f64,
    pub stagnation: f64,
    /// -1 while any link shows yellow, else 0.
    pub yellow_penalty: f64,
    /// -1 when the last switch request came before min-green, else 0.
    pub switch_penalty: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct RewardComposer {
    config: RewardConfig,
}

impl RewardComposer {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn compose(&self, intersection: &Intersection, telemetry: &IntersectionTelemetry) -> RewardBreakdown {
        let c = &self.config;
        let w = &c.weights;
        let lanes = intersection.controlled_lanes().len().max(1) as f64;

        let queue_efficiency = 1.0 - clamp_unit(telemetry.total_queue() / (lanes * c.queue_cap_per_lane));
        let wait_efficiency = 1.0 / (1.0 + telemetry.total_waiting().max(0.0) / (lanes * c.wait_cap_per_lane));
        let throughput = clamp_unit(telemetry.total_flow() / (lanes * c.throughput_cap_per_lane));
        let fairness = self.fairness_score(intersection);
        let stagnation =
            1.0 - clamp_unit(intersection.consecutive_same_phase_count() as f64 / c.stagnation_cap);
        let yellow_penalty = if telemetry.effective_signal(intersection).has_yellow() {
            -1.0
        } else {
            0.0
        };
        let switch_penalty = if intersection.premature_switch() { -1.0 } else { 0.0 };

        let total = w.queue * queue_efficiency
            + w.wait * wait_efficiency
            + w.throughput * throughput
            + w.fairness * fairness
            + w.stagnation * stagnation
            + w.yellow * yellow_penalty
            + w.switch * switch_penalty;

        RewardBreakdown {
            queue_efficiency,
            wait_efficiency,
            throughput,
            fairness,
            stagnation,
            yellow_penalty,
            switch_penalty,
            total,
        }
    }

    pub fn fairness_score(&self, intersection: &Intersection) -> f64 {
        if intersection.ticks_observed() <= self.config.fairness_warmup_ticks {
            return 1.0;
        }
        let histogram = intersection.phase_usage_histogram();
        let green: Vec<u64> = intersection
            .green_phase_indices()
            .map(|p| histogram[p])
            .collect();
        green_usage_fairness(&green, self.config.fairness_scale)
    }
}

/// `max(0, 1 - k * variance)` of the usage shares of the green phases
/// around the uniform share. 1.0 when there is nothing to compare.
pub fn green_usage_fairness(green_counts: &[u64], scale: f64) -> f64 {
    let n = green_counts.len();
    let total: u64 = green_counts.iter().sum();
    if n <= 1 || total == 0 {
        return 1.0;
    }
    let expected = 1.0 / n as f64;
    let variance = green_counts
        .iter()
        .map(|&count| {
            let share = count as f64 / total as f64;
            (share - expected).powi(2)
        })
        .sum::<f64>()
        / n as f64;
    (1.0 - variance * scale).max(0.0)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::control_system::phase_controller::PhaseController;
    use crate::data_structures::{Decision, LaneId, LaneSnapshot, Phase, SignalString};

    fn controller() -> PhaseController {
        let config = ControllerConfig {
            max_red_time: 100_000,
            ..ControllerConfig::default()
        };
        let phases = vec![
            Phase::parse("GGrr", 30.0).unwrap(),
            Phase::parse("yyrr", 4.0).unwrap(),
            Phase::parse("rrGG", 30.0).unwrap(),
            Phase::parse("rryy", 4.0).unwrap(),
        ];
        let links = ["n", "s", "e", "w"].iter().map(|l| LaneId::from(*l)).collect();
        let intersection = Intersection::new("J".into(), phases, links, 0, &config).unwrap();
        PhaseController::new(intersection, config)
    }

    fn quiet(ctl: &PhaseController, signal: Option<&str>) -> IntersectionTelemetry {
        IntersectionTelemetry::from_snapshots(
            signal.map(|s| s.parse::<SignalString>().unwrap()),
            ctl.intersection()
                .controlled_lanes()
                .iter()
                .map(|l| (l.clone(), LaneSnapshot::default())),
        )
    }

    #[test]
    fn uniform_usage_is_perfectly_fair() {
        assert_eq!(green_usage_fairness(&[50, 50], 10.0), 1.0);
        assert_eq!(green_usage_fairness(&[30, 30, 30, 30], 10.0), 1.0);
    }

    #[test]
    fn concentrated_usage_scores_low() {
        assert!(green_usage_fairness(&[200, 0], 10.0) < 0.2);
        assert!(green_usage_fairness(&[200, 0, 0, 0], 10.0) < 0.2);
    }

    #[test]
    fn degenerate_histograms_score_one() {
        assert_eq!(green_usage_fairness(&[], 10.0), 1.0);
        assert_eq!(green_usage_fairness(&[42], 10.0), 1.0);
        assert_eq!(green_usage_fairness(&[0, 0], 10.0), 1.0);
    }

    #[test]
    fn fairness_waits_for_warm_up() {
        let composer = RewardComposer::new(RewardConfig::default());
        let mut ctl = controller();
        for tick in 0..100 {
            ctl.apply(Decision::Keep, tick * 5);
        }
        assert_eq!(composer.fairness_score(ctl.intersection()), 1.0);
        ctl.apply(Decision::Keep, 500);
        assert_eq!(composer.fairness_score(ctl.intersection()), 0.0);
    }

    #[test]
    fn fairness_ignores_yellow_phases() {
        let composer = RewardComposer::new(RewardConfig::default());
        let mut ctl = controller();
        let mut now = 0;
        for _ in 0..30 {
            for phase in [0, 1, 2, 3] {
                now += 15;
                ctl.apply(Decision::EmergencyOverride(phase), now);
            }
        }
        // Equal time on both green phases; yellow ticks are not counted.
        assert_eq!(composer.fairness_score(ctl.intersection()), 1.0);
    }

    #[test]
    fn empty_intersection_earns_efficiency_terms() {
        let composer = RewardComposer::new(RewardConfig::default());
        let ctl = controller();
        let reward = composer.compose(ctl.intersection(), &quiet(&ctl, None));
        assert_eq!(reward.queue_efficiency, 1.0);
        assert_eq!(reward.wait_efficiency, 1.0);
        assert_eq!(reward.throughput, 0.0);
        assert_eq!(reward.fairness, 1.0);
        assert_eq!(reward.stagnation, 1.0);
        assert_eq!(reward.yellow_penalty, 0.0);
        assert!((reward.total - (0.30 + 0.25 + 0.15 + 0.05)).abs() < 1e-9);
    }

    #[test]
    fn yellow_and_premature_switch_are_penalized() {
        let composer = RewardComposer::new(RewardConfig::default());
        let mut ctl = controller();
        ctl.apply(Decision::Switch(2), 3);
        let reward = composer.compose(ctl.intersection(), &quiet(&ctl, Some("yyrr")));
        assert_eq!(reward.yellow_penalty, -1.0);
        assert_eq!(reward.switch_penalty, -1.0);
        let clean = composer.compose(ctl.intersection(), &quiet(&ctl, Some("GGrr")));
        assert_eq!(clean.yellow_penalty, 0.0);
        assert!((reward.total - (clean.total - 0.05)).abs() < 1e-9);
    }

    #[test]
    fn congestion_lowers_the_reward() {
        let composer = RewardComposer::new(RewardConfig::default());
        let ctl = controller();
        let jammed = IntersectionTelemetry::from_snapshots(
            None,
            ctl.intersection().controlled_lanes().iter().map(|l| {
                (
                    l.clone(),
                    LaneSnapshot {
                        vehicle_count: 20,
                        halted_count: 20,
                        waiting_time: 400.0,
                        mean_speed: 0.0,
                        lane_length: 200.0,
                    },
                )
            }),
        );
        let reward = composer.compose(ctl.intersection(), &jammed);
        assert_eq!(reward.queue_efficiency, 0.0);
        assert!((reward.wait_efficiency - 0.2).abs() < 1e-9);
        assert!(reward.total < composer.compose(ctl.intersection(), &quiet(&ctl, None)).total);
    }
}
