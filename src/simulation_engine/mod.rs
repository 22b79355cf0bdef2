// simulation_engine/mod.rs
pub mod simulator;
pub mod synthetic;
pub mod telemetry;
