use crate::config::BaselineKind;
use crate::data_structures::{Action, IntersectionId, Time};

/// What a decision source sees of one agent on one tick.
#[derive(Debug, Clone, Copy)]
pub struct AgentView<'a> {
    pub id: &'a IntersectionId,
    pub time_since_last_switch: Time,
    /// The encoded observation. Empty for intersections that are not agents.
    pub observation: &'a [f64],
}

/// Anything that turns an agent's view into a keep/switch selector: a
/// learned policy or one of the baselines below.
pub trait DecisionSource {
    fn name(&self) -> &str;

    fn decide(&mut self, view: &AgentView<'_>) -> Action;

    /// Whether the engine should take control of the intersection. A source
    /// that does not actuate leaves the simulator's own program running.
    fn actuates(&self) -> bool {
        true
    }
}

/// Switches whenever the current phase has lasted `cycle_length` seconds.
/// Ignores telemetry entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCycle {
    pub cycle_length: Time,
}

impl FixedCycle {
    pub fn new(cycle_length: Time) -> Self {
        Self { cycle_length }
    }
}

impl DecisionSource for FixedCycle {
    fn name(&self) -> &str {
        "fixed_cycle"
    }

    fn decide(&mut self, view: &AgentView<'_>) -> Action {
        if view.time_since_last_switch >= self.cycle_length {
            Action::Switch
        } else {
            Action::Keep
        }
    }
}

/// Zero-intervention baseline: always keeps, and the engine never actuates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassThrough;

impl DecisionSource for PassThrough {
    fn name(&self) -> &str {
        "pass_through"
    }

    fn decide(&mut self, _view: &AgentView<'_>) -> Action {
        Action::Keep
    }

    fn actuates(&self) -> bool {
        false
    }
}

pub fn build_baseline(kind: BaselineKind) -> Box<dyn DecisionSource + Send> {
    match kind {
        BaselineKind::PassThrough => Box::new(PassThrough),
        BaselineKind::FixedCycle { cycle_length } => Box::new(FixedCycle::new(cycle_length)),
    }
}
