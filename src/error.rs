use thiserror::Error;

use crate::data_structures::{IntersectionId, LaneId};

/// A signal string contained a code outside `G`, `g`, `y`, `r`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid signal code {code:?} at link {position} in {raw:?}")]
pub struct SignalParseError {
    pub raw: String,
    pub position: usize,
    pub code: char,
}

/// Setup-time failures. These abort episode construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("requested agent {0} is not an intersection known to the simulator")]
    UnknownIntersection(IntersectionId),
    #[error("intersection {0} has an empty phase program")]
    EmptyProgram(IntersectionId),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures reported by the simulator collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulatorError {
    #[error("unknown intersection {0}")]
    UnknownIntersection(IntersectionId),
    #[error("unknown lane {0}")]
    UnknownLane(LaneId),
    #[error("phase index {index} out of range for intersection {id}")]
    PhaseOutOfRange { id: IntersectionId, index: usize },
    #[error("simulator query failed: {0}")]
    Query(String),
}

/// Operator commands that could not be applied. Never fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown intersection {0}")]
    UnknownIntersection(IntersectionId),
    #[error("phase index {index} out of range ({phases} phases) for {id}")]
    PhaseOutOfRange {
        id: IntersectionId,
        index: usize,
        phases: usize,
    },
    #[error("bad signal string for {id}: {source}")]
    BadSignal {
        id: IntersectionId,
        #[source]
        source: SignalParseError,
    },
    #[error("signal string for {id} has {got} links, expected {expected}")]
    SignalLength {
        id: IntersectionId,
        expected: usize,
        got: usize,
    },
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("simulator rejected the command: {0}")]
    Simulator(#[from] SimulatorError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("simulator failed to advance: {0}")]
    Simulator(#[from] SimulatorError),
    #[error("episode has already terminated; call reset first")]
    EpisodeOver,
}
