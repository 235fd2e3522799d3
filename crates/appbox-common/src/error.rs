//! Unified error types for the appbox workspace.
//!
//! Every crate returns [`AppboxError`]. Best-effort teardown paths collect
//! failures into an [`Errors`] aggregate instead of stopping at the first one.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum AppboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
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

    /// A resource with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// A request was rejected before any side effect took place.
    #[error("{message}")]
    InvalidInput {
        /// Description of the rejected input.
        message: String,
    },

    /// An SSH public key could not be parsed.
    #[error("invalid SSH key")]
    InvalidKey,

    /// A process inside a container exited with a non-zero status.
    #[error("{message}, Code: {code}")]
    Status {
        /// Exit code of the process.
        code: i32,
        /// Captured error output, empty if none was collected.
        message: String,
    },

    /// A host command used to manage the sandbox failed.
    #[error("{command} failed: {message}")]
    Command {
        /// Program that failed.
        command: String,
        /// Exit status or captured error output.
        message: String,
    },

    /// The container engine reported a failure.
    #[error("engine error: {message}")]
    Engine {
        /// Description of the engine failure.
        message: String,
    },

    /// The operation is not available on this platform.
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of the missing capability.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Several independent failures collected during best-effort cleanup.
    #[error("{0}")]
    Aggregate(Errors),
}

impl AppboxError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`AppboxError::InvalidInput`] from any message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// The SCM namespace does not exist.
    pub fn namespace_not_found(namespace: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "namespace",
            id: namespace.into(),
        }
    }

    /// The SCM namespace already exists.
    pub fn namespace_exists(namespace: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: "namespace",
            id: namespace.into(),
        }
    }

    /// The SCM repository does not exist.
    pub fn repo_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "repository",
            id: name.into(),
        }
    }

    /// The SCM repository already exists.
    pub fn repo_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: "repository",
            id: name.into(),
        }
    }

    /// The application does not exist.
    pub fn application_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "application",
            id: name.into(),
        }
    }

    /// Returns `true` for any "not found" condition.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for any "already exists" condition.
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// HTTP status code a front end should answer with for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::InvalidInput { .. } | Self::InvalidKey | Self::Config { .. } => 400,
            Self::PermissionDenied { .. } => 403,
            _ => 500,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, AppboxError>;

/// An ordered collection of failures from steps that were all attempted.
#[derive(Debug, Default)]
pub struct Errors(Vec<AppboxError>);

impl Errors {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Records the error of a failed step; successful steps are ignored.
    pub fn add<T>(&mut self, result: Result<T>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    /// Records an error.
    pub fn push(&mut self, err: AppboxError) {
        self.0.push(err);
    }

    /// Returns `true` if no step failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the recorded failures in the order they happened.
    pub fn iter(&self) -> std::slice::Iter<'_, AppboxError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing failed, otherwise an [`AppboxError::Aggregate`].
    ///
    /// # Errors
    ///
    /// Returns the aggregate when at least one failure was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppboxError::Aggregate(self))
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_includes_code() {
        let err = AppboxError::Status {
            code: 3,
            message: "no such file".into(),
        };
        assert_eq!(err.to_string(), "no such file, Code: 3");
    }

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(AppboxError::namespace_not_found("ns").status_code(), 404);
        assert_eq!(AppboxError::repo_exists("app").status_code(), 409);
        assert_eq!(AppboxError::invalid("bad name").status_code(), 400);
        assert_eq!(AppboxError::InvalidKey.status_code(), 400);
        let engine = AppboxError::Engine {
            message: "socket closed".into(),
        };
        assert_eq!(engine.status_code(), 500);
    }

    #[test]
    fn empty_errors_is_ok() {
        let mut errors = Errors::new();
        errors.add(Ok(()));
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn errors_keep_every_failure_in_order() {
        let mut errors = Errors::new();
        errors.add::<()>(Err(AppboxError::repo_not_found("blog")));
        errors.add(Ok(()));
        errors.add::<()>(Err(AppboxError::namespace_not_found("acme")));
        assert_eq!(errors.len(), 2);

        let err = errors.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("repository not found: blog"));
        assert!(text.contains("namespace not found: acme"));
        assert!(text.find("blog") < text.find("acme"));
    }
}
