use thiserror::Error;

use crate::config::ConfigError;

pub type GuardResult<T> = std::result::Result<T, GuardError>;

/// Failure taxonomy shared by the routing, session, and sync engines.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Malformed or oversized input, rejected before any crypto or validation work.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Integrity hash mismatch. Decryption was not attempted.
    #[error("integrity check failed for {context}")]
    Integrity { context: String },
    /// Decrypted metadata disagrees with what the caller expected.
    #[error("consistency check failed: field {field} expected {expected:?}, found {found:?}")]
    Consistency {
        field: &'static str,
        expected: String,
        found: String,
    },
    /// No emergency authentication method succeeded.
    #[error("emergency authentication failed: {0}")]
    Authentication(String),
    /// A collaborator raised or timed out.
    #[error("{collaborator} failed: {message}")]
    Dependency {
        collaborator: &'static str,
        message: String,
    },
    /// The operation is switched off (sync disabled or degraded mode active).
    #[error("operation disabled: {0}")]
    Disabled(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardError {
    pub fn dependency(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Dependency {
            collaborator,
            message: err.to_string(),
        }
    }

    pub fn integrity(context: impl Into<String>) -> Self {
        Self::Integrity {
            context: context.into(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}
