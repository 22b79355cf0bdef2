use log::warn;
use std::collections::HashSet;

use crate::config::EncoderConfig;
use crate::control_system::intersection::Intersection;
use crate::data_structures::{LaneSnapshot, Time};
use crate::simulation_engine::telemetry::IntersectionTelemetry;

/// Features per lane slot.
pub const LANE_FEATURES: usize = 7;
/// Per-intersection header: phase position and time in phase.
pub const HEADER_FEATURES: usize = 2;
/// Network-wide features appended after the intersection blocks.
pub const GLOBAL_FEATURES: usize = 8;

/// Network-wide context for the global tail of an observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalContext {
    /// `None` when the simulator could not report it.
    pub vehicles_in_system: Option<usize>,
    pub time: Time,
    pub time_budget: Time,
    pub emergency_switches: u64,
    pub active_agents: usize,
    pub requested_agents: usize,
    pub network_waiting_time: f64,
    pub network_mean_speed: f64,
}

/// Turns lane telemetry and fairness counters into fixed-length vectors with
/// every element in [0, 1].
#[derive(Debug, Clone)]
pub struct ObservationEncoder {
    config: EncoderConfig,
}

impl ObservationEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Length of one intersection block: header plus lane slots.
    pub fn block_len(&self) -> usize {
        HEADER_FEATURES + self.config.lane_slots * LANE_FEATURES
    }

    /// Length of a single agent's observation: its block plus the global tail.
    pub fn agent_dim(&self) -> usize {
        self.block_len() + GLOBAL_FEATURES
    }

    pub fn joint_dim(&self, max_agents: usize) -> usize {
        max_agents * self.block_len() + GLOBAL_FEATURES
    }

    /// Encodes one intersection. Missing lane slots are zero; lanes beyond
    /// `lane_slots` are dropped in controlled-lane order.
    pub fn encode_intersection(
        &self,
        intersection: &Intersection,
        telemetry: &IntersectionTelemetry,
        now: Time,
    ) -> Vec<f64> {
        let c = &self.config;
        let mut block = Vec::with_capacity(self.block_len());
        block.push(intersection.current_phase_index() as f64 / intersection.num_phases() as f64);
        block.push(clamp_ratio(
            intersection.time_since_last_switch(now) as f64,
            c.switch_time_normalizer,
        ));

        for lane in intersection.controlled_lanes().iter().take(c.lane_slots) {
            let snapshot = telemetry.snapshot(lane).copied().unwrap_or_default();
            block.extend_from_slice(&self.lane_features(&snapshot));
        }
        block.resize(self.block_len(), 0.0);
        block
    }

    fn lane_features(&self, s: &LaneSnapshot) -> [f64; LANE_FEATURES] {
        let c = &self.config;
        let vehicles = s.vehicle_count as f64;
        let speed = s.mean_speed.max(0.0);
        let (occupancy, density) = if s.lane_length > 0.0 {
            (
                vehicles * c.avg_vehicle_length / s.lane_length,
                vehicles / (s.lane_length / 1000.0),
            )
        } else {
            (0.0, 0.0)
        };
        [
            clamp_ratio(vehicles, c.vehicle_cap),
            clamp_ratio(s.halted_count as f64, c.halted_cap),
            clamp_ratio(s.waiting_time, c.waiting_cap),
            clamp_ratio(speed, c.speed_cap),
            clamp_ratio(occupancy, 1.0),
            clamp_ratio(density, c.density_cap),
            clamp_ratio(vehicles * speed, c.flow_cap),
        ]
    }

    pub fn encode_global(&self, ctx: &GlobalContext) -> [f64; GLOBAL_FEATURES] {
        let c = &self.config;
        let coverage = if ctx.requested_agents == 0 {
            0.0
        } else {
            clamp_ratio(ctx.active_agents as f64, ctx.requested_agents as f64)
        };
        [
            clamp_ratio(ctx.vehicles_in_system.unwrap_or(0) as f64, c.vehicles_in_system_cap),
            clamp_ratio(ctx.time as f64, ctx.time_budget as f64),
            clamp_ratio(ctx.emergency_switches as f64, c.emergency_cap),
            coverage,
            clamp_ratio(ctx.network_waiting_time, c.network_wait_cap),
            clamp_ratio(ctx.network_mean_speed, c.speed_cap),
            0.0,
            0.0,
        ]
    }

    /// One agent's block followed by the global tail.
    pub fn encode_agent(&self, block: &[f64], global: &[f64]) -> Vec<f64> {
        let mut observation = Vec::with_capacity(block.len() + global.len());
        observation.extend_from_slice(block);
        observation.extend_from_slice(global);
        observation
    }

    /// Concatenates up to `max_agents` blocks, zero blocks for empty slots,
    /// then the global tail.
    pub fn encode_joint<'a>(
        &self,
        blocks: impl IntoIterator<Item = &'a [f64]>,
        global: &[f64],
        max_agents: usize,
    ) -> Vec<f64> {
        let block_len = self.block_len();
        let mut joint = Vec::with_capacity(self.joint_dim(max_agents));
        for block in blocks.into_iter().take(max_agents) {
            let start = joint.len();
            joint.extend(block.iter().take(block_len));
            joint.resize(start + block_len, 0.0);
        }
        joint.resize(max_agents * block_len, 0.0);
        joint.extend_from_slice(global);
        joint
    }
}

fn clamp_ratio(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}

/// Pads with zeros or truncates `values` to exactly `target` elements.
/// The first `min(len, target)` elements are untouched.
pub fn adapt_dimension(mut values: Vec<f64>, target: usize) -> Vec<f64> {
    values.resize(target, 0.0);
    values
}

/// Fits vectors to a consumer's expected length and logs each distinct
/// mismatch once.
#[derive(Debug, Default)]
pub struct DimensionAdapter {
    expected: Option<usize>,
    reported: HashSet<(usize, usize)>,
}

impl DimensionAdapter {
    pub fn new(expected: Option<usize>) -> Self {
        Self {
            expected,
            reported: HashSet::new(),
        }
    }

    /// Returns the fitted vector and, when it had to change, the original
    /// length.
    pub fn fit(&mut self, values: Vec<f64>, what: &str) -> (Vec<f64>, Option<usize>) {
        let Some(target) = self.expected else {
            return (values, None);
        };
        let produced = values.len();
        if produced == target {
            return (values, None);
        }
        if self.reported.insert((produced, target)) {
            let how = if produced < target { "padding" } else { "truncating" };
            warn!(
                "{} has {} features but {} are expected; {} with zeros at the end",
                what, produced, target, how
            );
        }
        (adapt_dimension(values, target), Some(produced))
    }
}
