use thiserror::Error;

use crate::kernel::error::SharedError;

/// Errors raised while indexing a GBean or dispatching to it.
#[derive(Debug, Clone, Error)]
pub enum GBeanError {
    /// The bean's method table cannot be turned into a consistent index.
    #[error("Invalid configuration of GBean '{bean}': {message}")]
    InvalidConfiguration { bean: String, message: String },

    #[error("GBean '{bean}' has no attribute '{attribute}'")]
    NoSuchAttribute { bean: String, attribute: String },

    #[error("GBean '{bean}' has no operation {operation}")]
    NoSuchOperation { bean: String, operation: String },

    #[error("GBean '{bean}' is in the wrong state: {message}")]
    IllegalState { bean: String, message: String },

    #[error("Invalid argument for {target} on GBean '{bean}': {message}")]
    InvalidArgument {
        bean: String,
        target: String,
        message: String,
    },

    #[error("Invoking {target} on GBean '{bean}' failed: {source}")]
    Invocation {
        bean: String,
        target: String,
        #[source]
        source: SharedError,
    },

    #[error("Construction of GBean '{bean}' failed: {source}")]
    Construction {
        bean: String,
        #[source]
        source: SharedError,
    },

    #[error("Dependency {dependency} of GBean '{bean}' is not available")]
    DependencyUnavailable { bean: String, dependency: String },
}
