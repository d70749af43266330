//! Core error type for cloud failover

use thiserror::Error;

/// Error type shared by every component of the failover engine
#[derive(Error, Debug)]
pub enum FailoverError {
    // Configuration
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Invalid resource id '{id}': {reason}")]
    InvalidResourceId { id: String, reason: String },

    // Election
    #[error("No instances available for election")]
    NoInstances,

    #[error("No eligible primary among {candidates} instances")]
    NoEligiblePrimary { candidates: usize },

    // Cloud API
    #[error("Transient cloud failure during {operation}: {details}")]
    TransientCloud { operation: String, details: String },

    #[error("Cloud API error during {operation} (status {status:?}): {message}")]
    CloudApi {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    // Device API
    #[error("Device request to {host}{path} failed: {message}")]
    Device {
        host: String,
        path: String,
        message: String,
    },

    // Coordination
    #[error("Could not acquire lock {path} after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // Storage
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Database error: {operation} failed")]
    DatabaseError {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] Box<serde_json::Error>),

    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Multiple errors in {context}: {}", format_errors(.errors))]
    Multiple {
        context: String,
        errors: Vec<FailoverError>,
    },
}

pub fn format_errors(errors: &[FailoverError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, FailoverError>;
pub type FailoverResult<T> = std::result::Result<T, FailoverError>;
