//! Error types for the Cradle engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the Cradle engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("record id must not be empty")]
    MissingId,

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("measurement {0} has no temperature, weight or height")]
    EmptyMeasurement(RecordId),

    #[error("medication {0} uses dose key 'other' without a name")]
    MissingMedicationName(RecordId),

    #[error("unknown merge policy: {0}")]
    UnknownMergePolicy(String),

    // State errors
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
