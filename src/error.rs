//! Crate-wide error types
//!
//! Provides a unified error type used throughout the crate. Lookup and
//! validation failures raised before a job row exists propagate to the
//! caller; failures inside an admitted attempt are captured into the
//! job's result via [`Error::kind`] and never escape the attempt.

use thiserror::Error;

/// A failure reported by the runner boundary.
///
/// Carries the error class tag and message that end up in a job's
/// `result.error` object. Timeouts are reported with the
/// `"TimeoutError"` tag; they are a failure outcome, not a distinct
/// job status.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RunnerError {
    /// Error class tag, e.g. `"TimeoutError"`
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl RunnerError {
    /// Create a new runner error with a type tag and message
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Crate-wide error type
///
/// Concurrency rejection is deliberately absent: it is recorded as a
/// terminal job outcome, never thrown.
#[derive(Debug, Error)]
pub enum Error {
    /// No row matched a single-record lookup
    #[error("{entity} not found: '{key}'")]
    NotFound {
        /// Table the lookup ran against
        entity: String,
        /// The lookup key or rendered predicate
        key: String,
    },

    /// More than one row matched a single-record lookup
    #[error("Ambiguous lookup on {entity}: {matches} rows match")]
    AmbiguousLookup {
        /// Table the lookup ran against
        entity: String,
        /// Number of matching rows
        matches: usize,
    },

    /// Invalid input: bad duration string, malformed step list,
    /// or an insert that cannot be re-resolved after writing
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// The validation error message
        message: String,
    },

    /// A workflow step referenced a database that does not exist
    #[error("Cannot resolve step {step} '{field}': unknown database reference '{reference}'")]
    StepResolution {
        /// Zero-based index of the offending step
        step: usize,
        /// Which key failed to resolve (`source` or `target`)
        field: &'static str,
        /// The reference value that could not be resolved
        reference: String,
    },

    /// Failure reported by the runner, including timeouts
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Queue adapter transport failure
    #[error("Queue adapter error: {message}")]
    Adapter {
        /// The error message
        message: String,
    },

    /// Storage engine failure
    #[error("Storage error: {message}")]
    Storage {
        /// The error message
        message: String,
    },

    /// Filesystem failure (log sink allocation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a NotFound error
    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Create a Validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an Adapter error
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
        }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// The error class tag recorded in a job's `result.error.type`
    pub fn kind(&self) -> String {
        match self {
            Self::NotFound { .. } => "NotFoundError".to_string(),
            Self::AmbiguousLookup { .. } => "AmbiguousLookupError".to_string(),
            Self::Validation { .. } => "ValidationError".to_string(),
            Self::StepResolution { .. } => "StepResolutionError".to_string(),
            Self::Runner(e) => e.kind.clone(),
            Self::Adapter { .. } => "AdapterError".to_string(),
            Self::Storage { .. } => "StorageError".to_string(),
            Self::Io(_) => "IoError".to_string(),
        }
    }
}

impl From<sea_orm::DbErr> for Error {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::storage(e.to_string())
    }
}
