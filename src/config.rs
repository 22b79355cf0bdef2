use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::data_structures::{IntersectionId, Time};
use crate::error::ConfigError;

/// Top-level engine configuration. Every section falls back to its defaults
/// when missing from the JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub controller: ControllerConfig,
    pub encoder: EncoderConfig,
    pub reward: RewardConfig,
    pub episode: EpisodeConfig,
    pub coordinator: CoordinatorConfig,
}

/// Timing constraints and phase scoring for every phase controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub min_green_time: Time,
    pub max_red_time: Time,
    pub emergency_cooldown: Time,
    /// Fraction of `max_red_time` a lane may stay red before an override.
    pub starvation_fraction: f64,
    /// Controlled lanes tracked per intersection.
    pub max_lanes: usize,
    /// Phases kept from the simulator's program.
    pub max_phases: usize,
    pub scoring: PhaseScoring,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_green_time: 10,
            max_red_time: 90,
            emergency_cooldown: 20,
            starvation_fraction: 0.8,
            max_lanes: 12,
            max_phases: 8,
            scoring: PhaseScoring::default(),
        }
    }
}

impl ControllerConfig {
    pub fn starvation_threshold(&self) -> f64 {
        self.max_red_time as f64 * self.starvation_fraction
    }
}

/// Weights used to pick the next phase when a switch is requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseScoring {
    pub queue_weight: f64,
    pub waiting_weight: f64,
    pub vehicle_weight: f64,
    /// Seconds of red that earn one point of fairness bonus.
    pub fairness_normalizer: f64,
    pub fairness_cap: f64,
}

impl Default for PhaseScoring {
    fn default() -> Self {
        Self {
            queue_weight: 2.0,
            waiting_weight: 0.01,
            vehicle_weight: 0.5,
            fairness_normalizer: 60.0,
            fairness_cap: 5.0,
        }
    }
}

/// Divisors that clamp every observation feature into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub lane_slots: usize,
    pub avg_vehicle_length: f64,
    pub vehicle_cap: f64,
    pub halted_cap: f64,
    pub waiting_cap: f64,
    pub speed_cap: f64,
    /// Vehicles per kilometer.
    pub density_cap: f64,
    pub flow_cap: f64,
    pub switch_time_normalizer: f64,
    pub vehicles_in_system_cap: f64,
    pub emergency_cap: f64,
    pub network_wait_cap: f64,
    /// Length a downstream consumer expects. Outputs are padded or truncated
    /// to it.
    pub expected_dim: Option<usize>,
    /// Same, for the joint observation over all agent slots.
    pub expected_joint_dim: Option<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            lane_slots: 12,
            avg_vehicle_length: 5.0,
            vehicle_cap: 30.0,
            halted_cap: 20.0,
            waiting_cap: 180.0,
            speed_cap: 50.0,
            density_cap: 50.0,
            flow_cap: 300.0,
            switch_time_normalizer: 100.0,
            vehicles_in_system_cap: 1000.0,
            emergency_cap: 50.0,
            network_wait_cap: 10_000.0,
            expected_dim: None,
            expected_joint_dim: None,
        }
    }
}

/// Weights of the reward terms. Intended to sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub queue: f64,
    pub wait: f64,
    pub throughput: f64,
    pub fairness: f64,
    pub stagnation: f64,
    pub yellow: f64,
    pub switch: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            queue: 0.30,
            wait: 0.25,
            throughput: 0.15,
            fairness: 0.15,
            stagnation: 0.05,
            yellow: 0.05,
            switch: 0.05,
        }
    }
}

impl RewardWeights {
    pub fn sum(&self) -> f64 {
        self.queue
            + self.wait
            + self.throughput
            + self.fairness
            + self.stagnation
            + self.yellow
            + self.switch
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub weights: RewardWeights,
    pub queue_cap_per_lane: f64,
    pub wait_cap_per_lane: f64,
    pub throughput_cap_per_lane: f64,
    pub stagnation_cap: f64,
    /// Ticks before the fairness score departs from 1.0.
    pub fairness_warmup_ticks: u64,
    pub fairness_scale: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            weights: RewardWeights::default(),
            queue_cap_per_lane: 20.0,
            wait_cap_per_lane: 100.0,
            throughput_cap_per_lane: 300.0,
            stagnation_cap: 100.0,
            fairness_warmup_ticks: 100,
            fairness_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Simulated seconds between decisions.
    pub decision_interval: Time,
    /// Simulated seconds covered by one simulator step.
    pub step_length: Time,
    pub time_budget: Time,
    /// An empty network only ends the episode after this many seconds.
    pub empty_network_grace: Time,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            decision_interval: 5,
            step_length: 1,
            time_budget: 3600,
            empty_network_grace: 60,
        }
    }
}

impl EpisodeConfig {
    /// Simulator steps advanced per decision tick.
    pub fn sub_steps_per_tick(&self) -> u32 {
        if self.step_length <= 0 {
            return 0;
        }
        (self.decision_interval / self.step_length) as u32
    }
}

/// Which baseline drives the intersections that are not agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineKind {
    #[default]
    PassThrough,
    FixedCycle { cycle_length: Time },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Intersections exposed as agents. `None` takes the first `max_agents`.
    pub agents: Option<Vec<IntersectionId>>,
    pub max_agents: usize,
    pub background: BaselineKind,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agents: None,
            max_agents: 10,
            background: BaselineKind::PassThrough,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if c.min_green_time <= 0 {
            return Err(ConfigError::invalid("controller.min_green_time", "must be positive"));
        }
        if c.max_red_time <= 0 {
            return Err(ConfigError::invalid("controller.max_red_time", "must be positive"));
        }
        if c.emergency_cooldown < 0 {
            return Err(ConfigError::invalid("controller.emergency_cooldown", "must not be negative"));
        }
        if !(c.starvation_fraction > 0.0 && c.starvation_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "controller.starvation_fraction",
                format!("{} is outside (0, 1]", c.starvation_fraction),
            ));
        }
        if c.max_lanes == 0 || c.max_phases == 0 {
            return Err(ConfigError::invalid("controller.max_lanes", "lane and phase caps must be positive"));
        }
        if c.scoring.fairness_normalizer <= 0.0 {
            return Err(ConfigError::invalid("controller.scoring.fairness_normalizer", "must be positive"));
        }

        let e = &self.encoder;
        if e.lane_slots == 0 {
            return Err(ConfigError::invalid("encoder.lane_slots", "must be positive"));
        }
        let caps = [
            e.vehicle_cap,
            e.halted_cap,
            e.waiting_cap,
            e.speed_cap,
            e.density_cap,
            e.flow_cap,
            e.switch_time_normalizer,
            e.vehicles_in_system_cap,
            e.emergency_cap,
            e.network_wait_cap,
            e.avg_vehicle_length,
        ];
        if caps.iter().any(|cap| !(*cap > 0.0)) {
            return Err(ConfigError::invalid("encoder", "every divisor must be positive"));
        }

        let r = &self.reward;
        if [r.queue_cap_per_lane, r.wait_cap_per_lane, r.throughput_cap_per_lane, r.stagnation_cap]
            .iter()
            .any(|cap| !(*cap > 0.0))
        {
            return Err(ConfigError::invalid("reward", "every cap must be positive"));
        }
        let total = r.weights.sum();
        if !total.is_finite() {
            return Err(ConfigError::invalid("reward.weights", "weights must be finite"));
        }
        if (total - 1.0).abs() > 1e-6 {
            warn!("Reward weights sum to {:.3}, not 1.0", total);
        }

        let ep = &self.episode;
        if ep.decision_interval <= 0 || ep.step_length <= 0 {
            return Err(ConfigError::invalid("episode.decision_interval", "must be positive"));
        }
        if ep.decision_interval % ep.step_length != 0 {
            return Err(ConfigError::invalid(
                "episode.step_length",
                format!(
                    "decision interval {}s is not a whole number of {}s steps",
                    ep.decision_interval, ep.step_length
                ),
            ));
        }
        if ep.time_budget <= 0 {
            return Err(ConfigError::invalid("episode.time_budget", "must be positive"));
        }

        if self.coordinator.max_agents == 0 {
            return Err(ConfigError::invalid("coordinator.max_agents", "must be positive"));
        }
        if let BaselineKind::FixedCycle { cycle_length } = self.coordinator.background {
            if cycle_length <= 0 {
                return Err(ConfigError::invalid("coordinator.background.cycle_length", "must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!((config.reward.weights.sum() - 1.0).abs() < 1e-9);
        assert_eq!(config.controller.starvation_threshold(), 72.0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "controller": { "min_green_time": 15 },
            "coordinator": { "agents": ["J1"], "background": { "kind": "fixed_cycle", "cycle_length": 60 } }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.controller.min_green_time, 15);
        assert_eq!(config.controller.max_red_time, 90);
        assert_eq!(config.encoder.lane_slots, 12);
        assert_eq!(
            config.coordinator.background,
            BaselineKind::FixedCycle { cycle_length: 60 }
        );
        assert_eq!(config.coordinator.agents, Some(vec![IntersectionId::from("J1")]));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_starvation_fraction() {
        let mut config = EngineConfig::default();
        config.controller.starvation_fraction = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "controller.starvation_fraction", .. })
        ));
    }

    #[test]
    fn tick_length_follows_decision_interval() {
        let mut config = EngineConfig::default();
        assert_eq!(config.episode.sub_steps_per_tick(), 5);
        config.episode.decision_interval = 10;
        config.validate().unwrap();
        assert_eq!(config.episode.sub_steps_per_tick(), 10);
        config.episode.step_length = 2;
        assert_eq!(config.episode.sub_steps_per_tick(), 5);
    }

    #[test]
    fn rejects_interval_that_is_not_whole_steps() {
        let mut config = EngineConfig::default();
        config.episode.decision_interval = 5;
        config.episode.step_length = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "episode.step_length", .. })
        ));
    }

    #[test]
    fn background_defaults_to_pass_through() {
        assert_eq!(BaselineKind::default(), BaselineKind::PassThrough);
        let config: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.background, BaselineKind::PassThrough);
    }

    #[test]
    fn rejects_zero_lane_slots() {
        let mut config = EngineConfig::default();
        config.encoder.lane_slots = 0;
        assert!(config.validate().is_err());
    }
}
