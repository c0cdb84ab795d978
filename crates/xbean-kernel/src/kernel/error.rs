//! # XBean Kernel Errors
//!
//! Defines the error type shared by the whole kernel.
//!
//! [`Error`] has one variant per failure kind a caller may need to tell apart:
//! registration conflicts, illegal lifecycle transitions, unsatisfied
//! conditions, lock contention versus interruption, failures raised by service
//! factories, and the aggregate [`Error::KernelErrors`] used by sweeps that must
//! not stop at the first failure (registry shutdown, monitor fan-out).
//!
//! Errors are `Clone` so the same failure can be handed to monitors and
//! returned to the caller.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::service::types::ServiceName;

/// Boxed error returned by user supplied callbacks (factories, conditions, monitors).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a callback error, stored inside [`Error`].
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, ThisError)]
pub enum Error {
    #[error("Service '{name}' already exists")]
    ServiceAlreadyExists { name: ServiceName },

    #[error("Service '{name}' not found")]
    ServiceNotFound { name: ServiceName },

    /// Registration failed; the registry was left as it was before the call.
    #[error("Unable to register service '{name}': {source}")]
    ServiceRegistration {
        name: ServiceName,
        #[source]
        source: Box<Error>,
    },

    #[error("Illegal state for service '{name}': {message}")]
    IllegalServiceState { name: ServiceName, message: String },

    #[error("Service '{name}' has unsatisfied conditions: [{}]", .conditions.join(", "))]
    UnsatisfiedConditions {
        name: ServiceName,
        conditions: Vec<String>,
    },

    /// The per-service lock could not be acquired in time.
    #[error("Timed out after {timeout:?} waiting to {operation} service '{name}'; lock is held by operation '{holder}'")]
    KernelOperationTimeout {
        name: ServiceName,
        operation: String,
        holder: String,
        timeout: Duration,
    },

    /// A wait on the per-service lock or its conditions was interrupted.
    #[error("Interrupted while waiting to {operation} service '{name}'")]
    KernelOperationInterrupted { name: ServiceName, operation: String },

    /// Several independent failures, in the order they happened.
    #[error("{} kernel error(s): {}", .0.len(), render_errors(.0))]
    KernelErrors(Vec<Error>),

    #[error("Service '{name}' produced an instance of '{actual}' which is not assignable to declared type '{expected}'")]
    InvalidServiceType {
        name: ServiceName,
        expected: String,
        actual: String,
    },

    #[error("Factory of service '{name}' failed to create the service: {source}")]
    ServiceCreation {
        name: ServiceName,
        #[source]
        source: SharedError,
    },

    #[error("Factory of service '{name}' failed to destroy the service: {source}")]
    ServiceDestruction {
        name: ServiceName,
        #[source]
        source: SharedError,
    },

    #[error("Condition {condition} of service '{name}' failed during {phase}: {source}")]
    ConditionFailed {
        name: ServiceName,
        condition: String,
        phase: ConditionPhase,
        #[source]
        source: SharedError,
    },

    #[error("Monitor failed to handle '{event}' for service '{name}': {message}")]
    MonitorNotification {
        name: ServiceName,
        event: String,
        message: String,
    },

    #[error("Kernel '{kernel}' is not running")]
    KernelNotRunning { kernel: String },

    #[error("Invalid kernel configuration '{}': {message}", .path.display())]
    Config { path: PathBuf, message: String },
}

/// Which condition callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionPhase {
    Initialize,
    Destroy,
}

impl fmt::Display for ConditionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionPhase::Initialize => f.write_str("initialize"),
            ConditionPhase::Destroy => f.write_str("destroy"),
        }
    }
}

fn render_errors(errors: &[Error]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl Error {
    pub fn illegal_state(name: &ServiceName, message: impl Into<String>) -> Self {
        Error::IllegalServiceState {
            name: name.clone(),
            message: message.into(),
        }
    }

    /// Folds a list of collected errors into one: `Ok` when empty, the error
    /// itself when there is exactly one, `KernelErrors` otherwise.
    pub fn collect(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::KernelErrors(errors)),
        }
    }

    /// The individual errors, flattening `KernelErrors`.
    pub fn flatten(&self) -> Vec<&Error> {
        match self {
            Error::KernelErrors(errors) => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }

    /// The service this error is about, if any.
    pub fn service_name(&self) -> Option<&ServiceName> {
        match self {
            Error::ServiceAlreadyExists { name }
            | Error::ServiceNotFound { name }
            | Error::ServiceRegistration { name, .. }
            | Error::IllegalServiceState { name, .. }
            | Error::UnsatisfiedConditions { name, .. }
            | Error::KernelOperationTimeout { name, .. }
            | Error::KernelOperationInterrupted { name, .. }
            | Error::InvalidServiceType { name, .. }
            | Error::ServiceCreation { name, .. }
            | Error::ServiceDestruction { name, .. }
            | Error::ConditionFailed { name, .. }
            | Error::MonitorNotification { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Error carrying a panic payload caught from a user callback.
#[derive(Debug, Clone, ThisError)]
#[error("panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        PanicError { message }
    }
}

/// Runs a user callback, turning a panic into an error.
pub(crate) fn catch_callback<T>(
    f: impl FnOnce() -> StdResult<T, BoxError>,
) -> StdResult<T, SharedError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Arc::from(e)),
        Err(payload) => Err(Arc::new(PanicError::from_payload(payload))),
    }
}
