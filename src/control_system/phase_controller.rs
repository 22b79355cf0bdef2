use log::debug;

use crate::config::ControllerConfig;
use crate::control_system::intersection::Intersection;
use crate::data_structures::{Action, Decision, LaneId, Time};
use crate::simulation_engine::telemetry::IntersectionTelemetry;

/// Owns one intersection and arbitrates, once per tick, between the caller's
/// action and the anti-starvation override.
#[derive(Debug, Clone)]
pub struct PhaseController {
    intersection: Intersection,
    config: ControllerConfig,
}

impl PhaseController {
    pub fn new(intersection: Intersection, config: ControllerConfig) -> Self {
        Self {
            intersection,
            config,
        }
    }

    pub fn intersection(&self) -> &Intersection {
        &self.intersection
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Picks this tick's decision. Emitting an override starts the
    /// emergency cooldown.
    pub fn decide(&mut self, now: Time, action: Action, telemetry: &IntersectionTelemetry) -> Decision {
        let green_lanes = self
            .intersection
            .lanes_green_under(telemetry.effective_signal(&self.intersection));

        if let Some(target) = self.starvation_override(now, &green_lanes) {
            self.intersection.last_emergency_switch_time = now;
            return Decision::EmergencyOverride(target);
        }

        let elapsed = self.intersection.time_since_last_switch(now);
        if action == Action::Switch && elapsed >= self.intersection.min_green_time {
            if let Some(target) = self.best_next_phase(now, telemetry) {
                return Decision::Switch(target);
            }
        }
        Decision::Keep
    }

    /// Serves the most starved red lane that some phase can serve. Lanes
    /// no phase serves are counted as infeasible and skipped.
    fn starvation_override(&mut self, now: Time, green_lanes: &[LaneId]) -> Option<usize> {
        let intersection = &self.intersection;
        if now - intersection.last_emergency_switch_time < intersection.emergency_cooldown {
            return None;
        }
        let threshold = intersection.max_red_time as f64 * self.config.starvation_fraction;

        // Longest red first; the stable sort keeps link order among ties.
        let mut starved: Vec<(&LaneId, Time)> = intersection
            .controlled_lanes()
            .iter()
            .filter(|lane| !green_lanes.contains(lane))
            .map(|lane| (lane, intersection.red_duration(lane, now).unwrap_or(0)))
            .filter(|(_, red)| *red as f64 > threshold)
            .collect();
        starved.sort_by(|a, b| b.1.cmp(&a.1));

        let mut target = None;
        let mut infeasible = 0;
        for (lane, red) in starved {
            match intersection.first_phase_serving(lane) {
                Some(phase) if phase != intersection.current_phase_index => {
                    target = Some(phase);
                    break;
                }
                Some(_) => {}
                None => {
                    debug!(
                        "Intersection {}: lane {} red for {}s but no phase serves it",
                        intersection.id, lane, red
                    );
                    infeasible += 1;
                }
            }
        }
        self.intersection.infeasible_overrides += infeasible;
        target
    }

    fn best_next_phase(&self, now: Time, telemetry: &IntersectionTelemetry) -> Option<usize> {
        let current = self.intersection.current_phase_index;
        let mut best: Option<(usize, f64)> = None;
        for phase in self.intersection.green_phase_indices() {
            if phase == current {
                continue;
            }
            let score = self.score_phase(phase, now, telemetry);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((phase, score));
            }
        }
        best.map(|(phase, _)| phase)
    }

    /// Demand served by `phase`, plus a capped bonus for lanes that have
    /// waited longest since their last green.
    pub fn score_phase(&self, phase: usize, now: Time, telemetry: &IntersectionTelemetry) -> f64 {
        let scoring = &self.config.scoring;
        self.intersection
            .served_lanes(phase)
            .iter()
            .map(|lane| {
                let snapshot = telemetry.snapshot(lane).copied().unwrap_or_default();
                let red = self.intersection.red_duration(lane, now).unwrap_or(0).max(0) as f64;
                let fairness_bonus = (red / scoring.fairness_normalizer).min(scoring.fairness_cap);
                snapshot.halted_count as f64 * scoring.queue_weight
                    + snapshot.waiting_time * scoring.waiting_weight
                    + snapshot.vehicle_count as f64 * scoring.vehicle_weight
                    + fairness_bonus
            })
            .sum()
    }

    /// Applies a decision and updates the fairness counters for this tick.
    /// Returns the new phase index when a transition happened.
    ///
    /// A `Switch` arriving before `min_green_time` has elapsed is refused and
    /// flagged; overrides always go through.
    pub fn apply(&mut self, decision: Decision, now: Time) -> Option<usize> {
        let elapsed = self.intersection.time_since_last_switch(now);
        let transition = match decision {
            Decision::Keep => None,
            Decision::Switch(target) => {
                let premature = elapsed < self.intersection.min_green_time;
                self.intersection.premature_switch = premature;
                if premature {
                    debug!(
                        "Intersection {}: switch to {} refused after {}s",
                        self.intersection.id, target, elapsed
                    );
                    None
                } else {
                    Some(target)
                }
            }
            Decision::EmergencyOverride(target) => {
                self.intersection.premature_switch = false;
                debug!(
                    "Intersection {}: emergency override to phase {}",
                    self.intersection.id, target
                );
                Some(target)
            }
        };

        let switched = match transition {
            Some(target)
                if target < self.intersection.num_phases()
                    && target != self.intersection.current_phase_index =>
            {
                self.enter_phase(target, now);
                if decision.is_emergency() {
                    self.intersection.emergency_switches += 1;
                }
                Some(target)
            }
            _ => {
                self.intersection.consecutive_same_phase_count += 1;
                None
            }
        };
        if matches!(decision, Decision::Keep) {
            self.intersection.premature_switch = false;
        }
        self.record_tick(now);
        switched
    }

    /// Follows the phase the simulator's own program is showing. Used for
    /// intersections the engine observes but does not actuate.
    pub fn observe(&mut self, simulator_phase: Option<usize>, now: Time) -> Option<usize> {
        let switched = match simulator_phase {
            Some(phase)
                if phase < self.intersection.num_phases()
                    && phase != self.intersection.current_phase_index =>
            {
                self.enter_phase(phase, now);
                Some(phase)
            }
            _ => {
                self.intersection.consecutive_same_phase_count += 1;
                None
            }
        };
        self.record_tick(now);
        switched
    }

    /// Operator override: jumps straight to `phase`, bypassing min-green.
    /// Does not count as an observed tick.
    pub fn force_phase(&mut self, phase: usize, now: Time) -> bool {
        if phase >= self.intersection.num_phases() {
            return false;
        }
        if phase != self.intersection.current_phase_index {
            self.enter_phase(phase, now);
        } else {
            self.intersection.phase_start_time = now;
        }
        true
    }

    fn enter_phase(&mut self, phase: usize, now: Time) {
        let intersection = &mut self.intersection;
        intersection.current_phase_index = phase;
        intersection.phase_start_time = now;
        intersection.consecutive_same_phase_count = 0;
        intersection.total_switches += 1;
    }

    fn record_tick(&mut self, now: Time) {
        let intersection = &mut self.intersection;
        let current = intersection.current_phase_index;
        intersection.phase_usage_histogram[current] += 1;
        for lane in &intersection.served_lanes[current] {
            intersection.lane_last_green_time.insert(lane.clone(), now);
        }
    }
}
