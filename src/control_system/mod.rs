pub mod baselines;
pub mod intersection;
pub mod phase_controller;

pub use baselines::{AgentView, DecisionSource, FixedCycle, PassThrough};
pub use intersection::Intersection;
pub use phase_controller::PhaseController;
