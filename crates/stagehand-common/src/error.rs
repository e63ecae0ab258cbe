//! Unified error types for the stagehand workspace.
//!
//! Every fallible operation in the library crates returns [`Result`]. Errors
//! raised deep inside a resolver are wrapped with [`StagehandError::Context`]
//! on the way up so the final message names both the failed operation and
//! its cause.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StagehandError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A `mount(2)` call failed.
    #[error("error mounting {target}: {source}")]
    Mount {
        /// Mount target of the failed call.
        target: PathBuf,
        /// Errno reported by the kernel.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A path resolution step left the app's root filesystem.
    #[error("path escapes app's root: {path}{detail}")]
    PathEscape {
        /// Path being resolved.
        path: String,
        /// Extra information, such as the offending symlink target.
        detail: String,
    },

    /// A CPU isolator asked for more than can be represented.
    #[error("cpu limit exceeds the maximum millivalue: {limit}")]
    CpuLimitExceeded {
        /// The requested limit as declared.
        limit: String,
    },

    /// An id does not fall inside the active user-namespace range.
    #[error("id {id} is out of range {range}")]
    IdOutOfRange {
        /// The host-visible id.
        id: u32,
        /// Human-readable rendering of the range.
        range: String,
    },

    /// An error wrapped with a description of the operation that failed.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// Underlying failure.
        source: Box<StagehandError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StagehandError {
    /// Builds an [`StagehandError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`StagehandError::Config`] from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wraps `self` with a description of the operation that failed.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any context wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StagehandError>;

/// Adds context to fallible results.
pub trait ResultExt<T> {
    /// Wraps the error, if any, with a fixed description.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`StagehandError::Context`].
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wraps the error, if any, with a lazily built description.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`StagehandError::Context`].
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}
