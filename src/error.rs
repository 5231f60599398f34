//! Error types for action-invoker.
//!
//! Two tiers. [`InvocationError`] is a precondition failure raised to the
//! caller of [`crate::invoker::ActionInvoker::invoke`]. Failures of the
//! action itself never surface here; they are captured in the returned
//! status. [`Error`] covers the ambient plumbing (config, telemetry, IO).

use thiserror::Error;

/// Message published and raised when an invocation request is incomplete.
pub const NULL_ACTION_MESSAGE: &str = "unable to invoke a null action";

#[derive(Debug, Error)]
pub enum InvocationError {
    /// Action details, the action handle, or the parameter map was absent.
    #[error("{NULL_ACTION_MESSAGE}")]
    NullAction,

    /// A marker required to identify the work item was not supplied.
    #[error("missing required invocation parameter: {0}")]
    MissingMarker(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
