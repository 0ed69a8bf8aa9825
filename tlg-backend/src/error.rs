//! Error types for tlg-backend
//!
//! Validation errors are reported to the caller as a single error event;
//! execution faults carry the worker-side context they were raised in.

use std::fmt;
use thiserror::Error;

/// Main error type for tlg-backend
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed query, unknown filter, page or category not found
    #[error("{0}")]
    Validation(String),

    /// No graph backend could be located for a wiki
    #[error("no catgraph host found for graph '{0}'")]
    BackendUnavailable(String),

    /// External lookup failed (graph, watchlist, geo, page store)
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// An action failed inside a worker
    #[error("{0}")]
    Execution(Fault),

    /// Errors from the shared crate (config, I/O, JSON, missing wiki data)
    #[error(transparent)]
    Common(#[from] tlg_common::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Error::Collaborator(msg.into())
    }

    /// Text shown to the caller in the run's error event
    pub fn event_text(&self) -> String {
        match self {
            Error::Validation(msg) => format!("Input validation failed:\n{}", msg),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Common(tlg_common::Error::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Common(tlg_common::Error::Json(e))
    }
}

/// Convenience Result type using tlg-backend Error
pub type Result<T> = std::result::Result<T, Error>;

/// Unhandled failure of one action, captured at the worker boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub worker_id: usize,
    /// Short name of the filter that owned the action
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} failed while processing {}: {}",
            self.worker_id, self.subject, self.message
        )
    }
}
