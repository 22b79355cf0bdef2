use serde::{Deserialize, Serialize};

use crate::data_structures::IntersectionId;
use crate::error::CommandError;

/// Out-of-band operator commands, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorCommand {
    PhaseNext {
        id: IntersectionId,
    },
    PhasePrev {
        id: IntersectionId,
    },
    PhaseSet {
        id: IntersectionId,
        #[serde(rename = "phaseIndex")]
        phase_index: usize,
    },
    /// Re-asserts the engine's phase and hands control back to it.
    PhaseResume {
        id: IntersectionId,
    },
    /// Back to phase 0 with the program's nominal durations.
    PhaseReset {
        id: IntersectionId,
    },
    StateSet {
        id: IntersectionId,
        #[serde(rename = "signalString")]
        signal_string: String,
    },
}

impl OperatorCommand {
    pub fn id(&self) -> &IntersectionId {
        match self {
            OperatorCommand::PhaseNext { id }
            | OperatorCommand::PhasePrev { id }
            | OperatorCommand::PhaseSet { id, .. }
            | OperatorCommand::PhaseResume { id }
            | OperatorCommand::PhaseReset { id }
            | OperatorCommand::StateSet { id, .. } => id,
        }
    }

    pub fn parse(line: &str) -> Result<Self, CommandError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// What the engine tells the visualization layer after handling a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEmission {
    TlsStatus {
        id: IntersectionId,
        state: String,
        #[serde(rename = "phaseIndex", skip_serializing_if = "Option::is_none")]
        phase_index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining: Option<f64>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<IntersectionId>,
        message: String,
    },
}

impl StatusEmission {
    pub fn rejected(id: Option<IntersectionId>, error: &CommandError) -> Self {
        StatusEmission::Error {
            id,
            message: error.to_string(),
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
