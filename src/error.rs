/*!
 * Error types for rods-grid
 */

use std::fmt;
use std::io;

use thiserror::Error;

use crate::gateway::{codes, GatewayError};
use crate::object::Kind;

pub type GridResult<T> = std::result::Result<T, GridError>;

/// Failures surfaced by every session and handle operation
#[derive(Error, Debug)]
pub enum GridError {
    /// Operation issued on a disconnected (or dropped) session
    #[error("session closed: cannot {operation}{}", fmt_path(.path))]
    SessionClosed {
        operation: String,
        path: Option<String>,
    },

    /// Credential or handshake failure at session open
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// Session options are incomplete or inconsistent
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The path (or an attribute on it) does not exist in the catalog
    #[error("not found: {path}{}", fmt_attribute(.attribute))]
    NotFound {
        path: String,
        attribute: Option<String>,
    },

    /// The path exists but is not the kind the caller asked for
    #[error("kind mismatch at {path}: expected {expected}, found {found}")]
    KindMismatch {
        path: String,
        expected: Kind,
        found: Kind,
    },

    /// The path fails normalization
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Any error signalled by the transport collaborator
    #[error("gateway error {code} during {operation}{}: {message}", fmt_path(.path))]
    Gateway {
        code: i32,
        message: String,
        operation: String,
        path: Option<String>,
    },

    /// Internal invariant violation
    #[error("fatal: {0}")]
    Fatal(String),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed or written
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn fmt_path(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(" ({})", p)).unwrap_or_default()
}

fn fmt_attribute(attribute: &Option<String>) -> String {
    attribute
        .as_ref()
        .map(|a| format!(" (attribute '{}')", a))
        .unwrap_or_default()
}

impl GridError {
    pub(crate) fn session_closed(operation: &str, path: Option<&str>) -> Self {
        GridError::SessionClosed {
            operation: operation.to_string(),
            path: path.map(str::to_string),
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        GridError::NotFound {
            path: path.into(),
            attribute: None,
        }
    }

    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        GridError::Fatal(message.into())
    }

    /// Attach path and operation context to a collaborator failure
    pub fn from_gateway(err: GatewayError, operation: &str, path: &str) -> Self {
        match err {
            GatewayError::NotFound => GridError::not_found(path),
            GatewayError::KindMismatch { expected, found } => GridError::KindMismatch {
                path: path.to_string(),
                expected,
                found,
            },
            GatewayError::Cancelled => GridError::Gateway {
                code: codes::CANCELLED,
                message: "operation cancelled".to_string(),
                operation: operation.to_string(),
                path: Some(path.to_string()),
            },
            GatewayError::Malformed(message) => GridError::Gateway {
                code: codes::MALFORMED_RESPONSE,
                message,
                operation: operation.to_string(),
                path: Some(path.to_string()),
            },
            GatewayError::Status { code, message } => GridError::Gateway {
                code,
                message,
                operation: operation.to_string(),
                path: Some(path.to_string()),
            },
        }
    }

    /// Short kind tag for user-facing reports
    pub fn kind_tag(&self) -> &'static str {
        match self {
            GridError::SessionClosed { .. } => "session-closed",
            GridError::AuthFailed { .. } => "auth-failed",
            GridError::InvalidConfig { .. } => "invalid-config",
            GridError::NotFound { .. } => "not-found",
            GridError::KindMismatch { .. } => "kind-mismatch",
            GridError::InvalidPath { .. } => "invalid-path",
            GridError::Gateway { .. } => "gateway",
            GridError::Fatal(_) => "fatal",
            GridError::Io(_) => "io",
            GridError::Serialization(_) => "serialization",
        }
    }

    /// The offending catalog path, when one applies
    pub fn path(&self) -> Option<&str> {
        match self {
            GridError::NotFound { path, .. }
            | GridError::KindMismatch { path, .. }
            | GridError::InvalidPath { path, .. } => Some(path),
            GridError::SessionClosed { path, .. } | GridError::Gateway { path, .. } => {
                path.as_deref()
            }
            _ => None,
        }
    }

    /// Gateway-supplied status code, if the error came from the transport
    pub fn gateway_code(&self) -> Option<i32> {
        match self {
            GridError::Gateway { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GridError::NotFound { .. })
    }

    pub fn is_session_closed(&self) -> bool {
        matches!(self, GridError::SessionClosed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        self.gateway_code() == Some(codes::CANCELLED)
    }

    /// Invariant violations; never suppressed by library code
    pub fn is_fatal(&self) -> bool {
        matches!(self, GridError::Fatal(_))
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            GridError::InvalidPath { .. }
            | GridError::NotFound { .. }
            | GridError::KindMismatch { .. } => ErrorCategory::Validation,
            GridError::AuthFailed { .. } => ErrorCategory::Security,
            GridError::InvalidConfig { .. }
            | GridError::Io(_)
            | GridError::Serialization(_) => ErrorCategory::Configuration,
            GridError::SessionClosed { .. } => ErrorCategory::Lifecycle,
            GridError::Gateway { .. } => ErrorCategory::Network,
            GridError::Fatal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad paths, missing entries, wrong kinds
    Validation,
    /// Authentication/authorization errors
    Security,
    /// Options, ambient environment, config files
    Configuration,
    /// Session already torn down
    Lifecycle,
    /// Transport/gateway errors
    Network,
    /// Invariant violations
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Serialization(format!("JSON parse error: {}", err))
    }
}

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        GridError::Serialization(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for GridError {
    fn from(err: toml::ser::Error) -> Self {
        GridError::Serialization(format!("TOML write error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_not_found_carries_path() {
        let err = GridError::from_gateway(GatewayError::NotFound, "get_collection", "/z/a");
        assert!(err.is_not_found());
        assert_eq!(err.path(), Some("/z/a"));
        assert_eq!(err.kind_tag(), "not-found");
    }

    #[test]
    fn test_cancellation_maps_to_dedicated_code() {
        let err = GridError::from_gateway(GatewayError::Cancelled, "list_meta", "/z/a");
        assert!(err.is_cancelled());
        assert_eq!(err.gateway_code(), Some(codes::CANCELLED));
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_status_display() {
        let err = GridError::from_gateway(
            GatewayError::Status {
                code: -818000,
                message: "no access".to_string(),
            },
            "add_meta",
            "/z/a",
        );
        assert_eq!(
            err.to_string(),
            "gateway error -818000 during add_meta (/z/a): no access"
        );
    }

    #[test]
    fn test_kind_mismatch_display() {
        let err = GridError::from_gateway(
            GatewayError::KindMismatch {
                expected: Kind::Collection,
                found: Kind::DataObject,
            },
            "get_collection",
            "/z/file.txt",
        );
        assert_eq!(
            err.to_string(),
            "kind mismatch at /z/file.txt: expected collection, found data object"
        );
    }

    #[test]
    fn test_session_closed_display() {
        let err = GridError::session_closed("read metadata", Some("/z/a"));
        assert!(err.is_session_closed());
        assert_eq!(err.to_string(), "session closed: cannot read metadata (/z/a)");
        assert_eq!(err.category(), ErrorCategory::Lifecycle);
    }

    #[test]
    fn test_attribute_not_found_display() {
        let err = GridError::NotFound {
            path: "/z/a".to_string(),
            attribute: Some("color".to_string()),
        };
        assert_eq!(err.to_string(), "not found: /z/a (attribute 'color')");
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        assert!(GridError::fatal("bad kind").is_fatal());
        assert!(!GridError::not_found("/z").is_fatal());
        assert!(!GridError::AuthFailed {
            message: "x".to_string()
        }
        .is_fatal());
    }
}
