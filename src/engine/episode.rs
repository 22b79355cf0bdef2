use log::info;
use serde::Serialize;

use crate::config::EpisodeConfig;
use crate::data_structures::{IntersectionId, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    TimeBudget,
    /// No vehicles left or expected, after the warm-up grace period.
    NetworkEmpty,
}

/// Per-episode bookkeeping. Created on reset, updated once per tick.
#[derive(Debug, Clone)]
pub struct Episode {
    pub start_time: Time,
    pub simulation_time: Time,
    pub target_intersection_ids: Vec<IntersectionId>,
    pub episode_reward: f64,
    pub emergency_switch_count: u64,
    pub infeasible_override_count: u64,
    pub ticks: u64,
    pub termination: Option<TerminationReason>,
}

/// End-of-episode summary.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub ticks: u64,
    pub simulation_time: Time,
    pub total_reward: f64,
    pub mean_reward_per_tick: f64,
    pub emergency_switches: u64,
    pub infeasible_overrides: u64,
    pub termination: Option<TerminationReason>,
}

impl Episode {
    pub fn new(target_intersection_ids: Vec<IntersectionId>, start: Time) -> Self {
        Self {
            start_time: start,
            simulation_time: start,
            target_intersection_ids,
            episode_reward: 0.0,
            emergency_switch_count: 0,
            infeasible_override_count: 0,
            ticks: 0,
            termination: None,
        }
    }

    pub fn is_over(&self) -> bool {
        self.termination.is_some()
    }

    pub fn elapsed(&self) -> Time {
        self.simulation_time - self.start_time
    }

    /// Checked at tick boundaries only. An unknown vehicle count never ends
    /// the episode early.
    pub fn check_termination(
        &mut self,
        now: Time,
        vehicles_in_system: Option<usize>,
        config: &EpisodeConfig,
    ) -> Option<TerminationReason> {
        self.simulation_time = now;
        let elapsed = self.elapsed();
        let reason = if elapsed >= config.time_budget {
            Some(TerminationReason::TimeBudget)
        } else if elapsed >= config.empty_network_grace && vehicles_in_system == Some(0) {
            Some(TerminationReason::NetworkEmpty)
        } else {
            None
        };
        if let Some(reason) = reason {
            info!(
                "Episode finished at t={}s after {} ticks ({:?}), reward {:.3}",
                now, self.ticks, reason, self.episode_reward
            );
            self.termination = Some(reason);
        }
        reason
    }

    pub fn summary(&self) -> EpisodeSummary {
        EpisodeSummary {
            ticks: self.ticks,
            simulation_time: self.simulation_time,
            total_reward: self.episode_reward,
            mean_reward_per_tick: if self.ticks == 0 {
                0.0
            } else {
                self.episode_reward / self.ticks as f64
            },
            emergency_switches: self.emergency_switch_count,
            infeasible_overrides: self.infeasible_override_count,
            termination: self.termination,
        }
    }
}
