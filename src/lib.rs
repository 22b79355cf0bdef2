pub mod communication;
pub mod config;
pub mod control_system;
pub mod data_structures;
pub mod engine;
pub mod error;
pub mod flow_analyzer;
pub mod global_variables;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;

pub use config::EngineConfig;
pub use data_structures::{Action, Decision, IntersectionId, LaneId, Phase, Time};
pub use engine::coordinator::Coordinator;
pub use error::{CommandError, ConfigError, EngineError, SimulatorError};
pub use simulation_engine::simulator::Simulator;
