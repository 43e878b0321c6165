//! Error types for the scheduler module

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Job references a profile id the scheduler does not know
    #[error("Unknown profile '{profile_id}'")]
    UnknownProfile { profile_id: String },

    /// A job with this `(profile, name)` is already queued or running
    #[error("Duplicate job '{name}' for profile '{profile_id}'")]
    DuplicateJob { profile_id: String, name: String },

    /// No executor is registered for the job's faucet
    #[error("No executor registered for faucet '{faucet}'")]
    UnknownFaucet { faucet: String },

    /// Session persistence failed
    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    /// Proxy subsystem failure
    #[error("Proxy error: {0}")]
    Proxy(#[from] crate::proxy::ProxyError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
