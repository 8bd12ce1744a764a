//! Error types for civitdl.
//!
//! Every component returns [`CivitdlError`]. The batch runner decides whether
//! to retry by looking at [`CivitdlError::kind`], never at the variant itself.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the civitdl library.
#[derive(Debug, Error)]
pub enum CivitdlError {
    // Input errors
    #[error("Bad source provided: {source_str}{}", parent_suffix(.parent))]
    BadSource {
        source_str: String,
        /// Batch file that referenced the bad source, if any.
        parent: Option<PathBuf>,
    },

    #[error("{message}")]
    Input { message: String },

    // Remote errors
    #[error("{message}")]
    ResourceNotFound { message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("{message}")]
    Unexpected { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

fn parent_suffix(parent: &Option<PathBuf>) -> String {
    match parent {
        Some(path) => format!(" (Parent Batchfile Path: {})", path.display()),
        None => String::new(),
    }
}

/// Coarse classification used at the retry boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed user input or configuration. Never retried.
    Input,
    /// The referenced model or version does not exist.
    ResourceNotFound,
    /// Transient remote condition.
    Api,
    /// Contract breaches, unparseable payloads, local I/O failures.
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "InputError",
            ErrorKind::ResourceNotFound => "ResourceNotFoundError",
            ErrorKind::Api => "APIError",
            ErrorKind::Unexpected => "UnexpectedError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for civitdl operations.
pub type Result<T> = std::result::Result<T, CivitdlError>;

impl From<std::io::Error> for CivitdlError {
    fn from(err: std::io::Error) -> Self {
        CivitdlError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CivitdlError {
    fn from(err: serde_json::Error) -> Self {
        CivitdlError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CivitdlError {
    fn from(err: reqwest::Error) -> Self {
        CivitdlError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CivitdlError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CivitdlError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        CivitdlError::Input {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        CivitdlError::Unexpected {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CivitdlError::BadSource { .. } | CivitdlError::Input { .. } => ErrorKind::Input,
            CivitdlError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            CivitdlError::Api { .. } | CivitdlError::Network { .. } => ErrorKind::Api,
            CivitdlError::Unexpected { .. }
            | CivitdlError::Io { .. }
            | CivitdlError::Json { .. } => ErrorKind::Unexpected,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Api
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CivitdlError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_source_display() {
        let err = CivitdlError::BadSource {
            source_str: "nope".into(),
            parent: None,
        };
        assert_eq!(err.to_string(), "Bad source provided: nope");

        let err = CivitdlError::BadSource {
            source_str: "nope".into(),
            parent: Some(PathBuf::from("/tmp/batch.txt")),
        };
        assert!(err.to_string().contains("Parent Batchfile Path: /tmp/batch.txt"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CivitdlError::input("x").kind(), ErrorKind::Input);
        assert_eq!(
            CivitdlError::Api {
                status: 503,
                message: "x".into()
            }
            .kind(),
            ErrorKind::Api
        );
        assert_eq!(
            CivitdlError::from(std::io::Error::other("disk")).kind(),
            ErrorKind::Unexpected
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CivitdlError::Api {
            status: 500,
            message: "x".into()
        }
        .is_retryable());
        assert!(CivitdlError::Network {
            message: "reset".into(),
            source: None
        }
        .is_retryable());
        assert!(!CivitdlError::input("bad").is_retryable());
        assert!(!CivitdlError::ResourceNotFound {
            message: "gone".into()
        }
        .is_retryable());
        assert!(!CivitdlError::unexpected("json").is_retryable());
    }
}
