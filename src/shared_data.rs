// src/shared_data.rs

use serde::Serialize;

use crate::communication::messages::StatusEmission;
use crate::data_structures::{Decision, IntersectionId, Time};
use crate::engine::episode::TerminationReason;
use crate::flow_analyzer::reward::RewardBreakdown;

/// Diagnostics for one agent on one tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentInfo {
    pub phase_index: usize,
    pub waiting_time: f64,
    pub queue_length: f64,
    pub throughput: f64,
    pub fairness_score: f64,
    pub total_switches: u64,
    pub emergency_switches: u64,
    pub infeasible_overrides: u64,
    /// Lookups that fell back to neutral values this tick.
    pub degraded_reads: u32,
    /// `None` for intersections the engine only observed.
    pub decision: Option<Decision>,
    pub reward: RewardBreakdown,
}

/// Per-agent result of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub id: IntersectionId,
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: AgentInfo,
}

/// Mean and population standard deviation of one metric across agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    pub fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }
}

/// System-wide statistics over the active agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemAggregates {
    pub reward: MetricSummary,
    pub queue_length: MetricSummary,
    pub waiting_time: MetricSummary,
    pub fairness_score: MetricSummary,
    pub active_agents: usize,
}

/// Recoverable problems surfaced alongside a tick's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Reported once, on the tick after the agent was dropped.
    AgentDropped { id: IntersectionId, reason: String },
    ActionsPadded { expected: usize, got: usize },
    ActionsTruncated { expected: usize, got: usize },
    ObservationAdapted { id: Option<IntersectionId>, from: usize, to: usize },
}

/// Everything one tick hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
    pub time: Time,
    pub agents: Vec<AgentStep>,
    /// Global tail shared by every agent observation.
    pub global: Vec<f64>,
    /// All agent blocks in slot order, then the global tail.
    pub joint_observation: Vec<f64>,
    pub aggregates: SystemAggregates,
    pub done: bool,
    pub termination: Option<TerminationReason>,
    pub notices: Vec<Notice>,
    /// Status lines produced by operator commands drained this tick.
    pub statuses: Vec<StatusEmission>,
}

impl StepOutput {
    pub fn total_reward(&self) -> f64 {
        self.agents.iter().map(|a| a.reward).sum()
    }

    pub fn observations(&self) -> impl Iterator<Item = (&IntersectionId, &[f64])> {
        self.agents.iter().map(|a| (&a.id, a.observation.as_slice()))
    }
}
