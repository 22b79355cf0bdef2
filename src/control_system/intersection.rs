use std::collections::HashMap;

use crate::config::ControllerConfig;
use crate::data_structures::{IntersectionId, LaneId, Phase, SignalString, Time};
use crate::error::ConfigError;

/// One signalized junction and the fairness state tracked for it over an
/// episode. Owned and mutated only by its phase controller.
#[derive(Debug, Clone)]
pub struct Intersection {
    pub id: IntersectionId,
    pub(crate) phases: Vec<Phase>,
    /// Incoming lane of each controlled link, indexed like the signal string.
    /// `None` for links whose lane is beyond the tracking cap.
    pub(crate) link_lanes: Vec<Option<LaneId>>,
    /// Unique tracked lanes, in first-seen link order.
    pub(crate) controlled_lanes: Vec<LaneId>,
    /// Lanes served green by each phase, computed at load.
    pub(crate) served_lanes: Vec<Vec<LaneId>>,
    pub(crate) current_phase_index: usize,
    pub(crate) phase_start_time: Time,
    pub(crate) min_green_time: Time,
    pub(crate) max_red_time: Time,
    pub(crate) emergency_cooldown: Time,
    pub(crate) last_emergency_switch_time: Time,
    /// Populated for every tracked lane at construction.
    pub(crate) lane_last_green_time: HashMap<LaneId, Time>,
    pub(crate) phase_usage_histogram: Vec<u64>,
    pub(crate) consecutive_same_phase_count: u64,
    pub(crate) total_switches: u64,
    pub(crate) emergency_switches: u64,
    /// Starvation overrides skipped because no phase serves the lane.
    pub(crate) infeasible_overrides: u64,
    /// Set when the last applied `Switch` came before `min_green_time`.
    pub(crate) premature_switch: bool,
}

impl Intersection {
    /// Builds the episode-start state from the simulator's phase program and
    /// its per-link lane list.
    pub fn new(
        id: IntersectionId,
        mut phases: Vec<Phase>,
        links: Vec<LaneId>,
        initial_phase: usize,
        config: &ControllerConfig,
    ) -> Result<Self, ConfigError> {
        if phases.is_empty() {
            return Err(ConfigError::EmptyProgram(id));
        }
        phases.truncate(config.max_phases);

        let mut controlled_lanes: Vec<LaneId> = Vec::new();
        let link_lanes: Vec<Option<LaneId>> = links
            .into_iter()
            .map(|lane| {
                if controlled_lanes.contains(&lane) {
                    Some(lane)
                } else if controlled_lanes.len() < config.max_lanes {
                    controlled_lanes.push(lane.clone());
                    Some(lane)
                } else {
                    None
                }
            })
            .collect();

        let served_lanes = phases
            .iter()
            .map(|phase| lanes_for_signal(&link_lanes, phase.signal()))
            .collect();

        let lane_last_green_time = controlled_lanes
            .iter()
            .map(|lane| (lane.clone(), -config.max_red_time))
            .collect();

        let phase_count = phases.len();
        Ok(Self {
            id,
            phases,
            link_lanes,
            controlled_lanes,
            served_lanes,
            current_phase_index: if initial_phase < phase_count { initial_phase } else { 0 },
            phase_start_time: 0,
            min_green_time: config.min_green_time,
            max_red_time: config.max_red_time,
            emergency_cooldown: config.emergency_cooldown,
            last_emergency_switch_time: -config.max_red_time,
            lane_last_green_time,
            phase_usage_histogram: vec![0; phase_count],
            consecutive_same_phase_count: 0,
            total_switches: 0,
            emergency_switches: 0,
            infeasible_overrides: 0,
            premature_switch: false,
        })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn current_phase_index(&self) -> usize {
        self.current_phase_index
    }

    pub fn current_phase(&self) -> &Phase {
        &self.phases[self.current_phase_index]
    }

    pub fn controlled_lanes(&self) -> &[LaneId] {
        &self.controlled_lanes
    }

    pub fn phase_start_time(&self) -> Time {
        self.phase_start_time
    }

    pub fn time_since_last_switch(&self, now: Time) -> Time {
        (now - self.phase_start_time).max(0)
    }

    pub fn lane_last_green(&self, lane: &LaneId) -> Option<Time> {
        self.lane_last_green_time.get(lane).copied()
    }

    pub fn red_duration(&self, lane: &LaneId, now: Time) -> Option<Time> {
        self.lane_last_green(lane).map(|t| now - t)
    }

    pub fn phase_usage_histogram(&self) -> &[u64] {
        &self.phase_usage_histogram
    }

    pub fn ticks_observed(&self) -> u64 {
        self.phase_usage_histogram.iter().sum()
    }

    pub fn consecutive_same_phase_count(&self) -> u64 {
        self.consecutive_same_phase_count
    }

    pub fn total_switches(&self) -> u64 {
        self.total_switches
    }

    pub fn emergency_switches(&self) -> u64 {
        self.emergency_switches
    }

    pub fn infeasible_overrides(&self) -> u64 {
        self.infeasible_overrides
    }

    pub fn premature_switch(&self) -> bool {
        self.premature_switch
    }

    pub fn last_emergency_switch_time(&self) -> Time {
        self.last_emergency_switch_time
    }

    /// Indices of phases showing at least one green.
    pub fn green_phase_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.phases
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_green())
            .map(|(i, _)| i)
    }

    pub fn num_green_phases(&self) -> usize {
        self.green_phase_indices().count()
    }

    /// Tracked lanes served green by `phase`.
    pub fn served_lanes(&self, phase: usize) -> &[LaneId] {
        self.served_lanes.get(phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tracked lanes that are green under an arbitrary signal string.
    pub fn lanes_green_under(&self, signal: &SignalString) -> Vec<LaneId> {
        lanes_for_signal(&self.link_lanes, signal)
    }

    /// First green phase, in ascending index order, that serves `lane`.
    pub fn first_phase_serving(&self, lane: &LaneId) -> Option<usize> {
        self.green_phase_indices()
            .find(|&p| self.served_lanes[p].contains(lane))
    }

    pub fn link_count(&self) -> usize {
        self.link_lanes.len()
    }

    /// Seconds left of the current phase's nominal duration.
    pub fn remaining_nominal(&self, now: Time) -> f64 {
        (self.current_phase().nominal_duration() - self.time_since_last_switch(now) as f64).max(0.0)
    }
}

fn lanes_for_signal(link_lanes: &[Option<LaneId>], signal: &SignalString) -> Vec<LaneId> {
    let mut lanes: Vec<LaneId> = Vec::new();
    for link in signal.green_links() {
        if let Some(Some(lane)) = link_lanes.get(link) {
            if !lanes.contains(lane) {
                lanes.push(lane.clone());
            }
        }
    }
    lanes
}
