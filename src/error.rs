//! WolfTopo Error Types
//!
//! Every failure surfaced by the topology layer maps onto a stable code
//! (see [`Error::code`]) so tooling never has to parse backend messages.

use std::time::Duration;
use thiserror::Error;

use crate::kv::KvError;

/// Result type alias for WolfTopo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of entity referenced by an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Topology,
    Replicaset,
    Instance,
    Link,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Topology => write!(f, "topology"),
            EntityKind::Replicaset => write!(f, "replicaset"),
            EntityKind::Instance => write!(f, "instance"),
            EntityKind::Link => write!(f, "link"),
        }
    }
}

/// WolfTopo error types
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors, never retried
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{kind} '{name}' already exists")]
    NameConflict { kind: EntityKind, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: EntityKind, name: String },

    // Concurrency and backend errors, caller may retry
    #[error("Topology update lost the race {attempts} times in a row")]
    ConcurrencyExhausted { attempts: u32 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Document encoding errors
    #[error("Topology document corrupted: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a validation error for a field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(kind: EntityKind, name: impl Into<String>) -> Self {
        Error::NameConflict {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Stable taxonomy code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::NameConflict { .. } => "NAME_CONFLICT",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::ConcurrencyExhausted { .. } => "CONCURRENCY_EXHAUSTED",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "CORRUPTED_DOCUMENT",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Check if the whole logical operation may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConcurrencyExhausted { .. }
                | Error::StoreUnavailable(_)
                | Error::DeadlineExceeded(_)
        )
    }
}

impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Unavailable(reason) => Error::StoreUnavailable(reason),
            // Mismatches are absorbed by the mutation loop; reaching here means
            // a single-shot write raced another writer.
            KvError::RevisionMismatch { .. } => Error::ConcurrencyExhausted { attempts: 1 },
        }
    }
}
