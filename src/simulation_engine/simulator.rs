use crate::data_structures::{IntersectionId, LaneId, LaneSnapshot, Phase, Time};
use crate::error::SimulatorError;

/// The microscopic traffic simulator the engine drives. Every lookup may
/// fail; the engine substitutes neutral values for failed reads and never
/// lets a read failure abort a tick.
pub trait Simulator {
    /// Signalized intersections, in the simulator's own order.
    fn intersection_ids(&self) -> Vec<IntersectionId>;

    /// Incoming lane of every controlled link, indexed like the signal string.
    /// Lanes may repeat when several links leave the same lane.
    fn controlled_lanes(&self, id: &IntersectionId) -> Result<Vec<LaneId>, SimulatorError>;

    fn program(&self, id: &IntersectionId) -> Result<Vec<Phase>, SimulatorError>;

    fn lane_snapshot(&self, lane: &LaneId) -> Result<LaneSnapshot, SimulatorError>;

    fn current_signal(&self, id: &IntersectionId) -> Result<String, SimulatorError>;

    fn current_phase(&self, id: &IntersectionId) -> Result<usize, SimulatorError>;

    fn set_phase(&mut self, id: &IntersectionId, phase_index: usize) -> Result<(), SimulatorError>;

    /// Remaining duration of the current phase in the simulator's own program.
    fn set_phase_duration(&mut self, id: &IntersectionId, seconds: f64) -> Result<(), SimulatorError>;

    /// Writes a raw signal string, bypassing the program.
    fn set_signal_string(&mut self, id: &IntersectionId, signal: &str) -> Result<(), SimulatorError>;

    /// Runs `sub_steps` simulation steps. Blocks until done.
    fn advance(&mut self, sub_steps: u32) -> Result<(), SimulatorError>;

    /// Current simulation time in seconds.
    fn time(&self) -> Time;

    /// Vehicles in the network plus those still expected to depart.
    fn vehicles_in_system(&self) -> Result<usize, SimulatorError>;
}
