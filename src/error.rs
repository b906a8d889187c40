//! Error types for Healthboard

use thiserror::Error;

use crate::session::Availability;
use crate::types::{AggregateMetric, RecordKind};

/// Errors that can occur while talking to the health-data platform
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Health data platform unavailable: {0}")]
    Unavailable(Availability),

    #[error("Read permission not granted for {0}")]
    PermissionDenied(RecordKind),

    #[error("Failed to read {kind} records: {message}")]
    Read { kind: RecordKind, message: String },

    #[error("Failed to aggregate {metric}: {message}")]
    Aggregate {
        metric: AggregateMetric,
        message: String,
    },

    #[error("Changes token expired")]
    TokenExpired,

    #[error("Changes token rejected: {0}")]
    InvalidToken(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),
}

impl HealthError {
    /// Whether this error means a stored changes token can no longer be used
    pub fn is_token_rejection(&self) -> bool {
        matches!(self, HealthError::TokenExpired | HealthError::InvalidToken(_))
    }
}

impl From<config::ConfigError> for HealthError {
    fn from(e: config::ConfigError) -> Self {
        HealthError::Config(e.to_string())
    }
}
