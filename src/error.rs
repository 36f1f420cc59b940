//! Error types for Synheart Cohort

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading inputs or running the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Misaligned input for participant {participant_id}: {reason}")]
    MisalignedInput {
        participant_id: String,
        reason: String,
    },

    #[error("Participant id '{0}' is reserved")]
    ReservedParticipantId(String),

    #[error("Duplicate participant: {0}")]
    DuplicateParticipant(String),
}

impl EngineError {
    pub(crate) fn misaligned(participant_id: &str, reason: impl Into<String>) -> Self {
        EngineError::MisalignedInput {
            participant_id: participant_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Statistic-level failures.
///
/// These never reach callers of the engine: they are folded into
/// `Coefficient::NotComputable` or an invalid `Baseline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatError {
    #[error("Insufficient data: {available} of {required} required observations")]
    InsufficientData { required: usize, available: usize },

    #[error("Degenerate series: zero variance")]
    DegenerateSeries,
}
