//! Error types for the valet client

use crate::token::TokenError;
use thiserror::Error;

/// Errors that can occur when talking to a mediator or backend
#[derive(Error, Debug)]
pub enum ValetError {
    /// Establishing or maintaining the boundary connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake with the mediator failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Not currently connected to the mediator
    #[error("Not connected")]
    NotConnected,

    /// The connection was closed while a request was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request did not receive a response in time
    #[error("Operation timed out")]
    Timeout,

    /// The operation requires a capability or token permission we do not hold
    #[error("Permission denied: missing {capability}")]
    PermissionDenied { capability: String },

    /// The approval window could not be opened
    #[error("Approval window blocked: allow popups for this application and retry")]
    ApprovalBlocked,

    /// A capability token failed to decode or verify
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Structured error reported by the mediator or backend, passed through verbatim
    #[error("Backend error {code}: {message}")]
    Backend { code: String, message: String },

    /// Failed to serialize/deserialize a boundary message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure underneath the boundary
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for valet operations
pub type Result<T> = std::result::Result<T, ValetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connection() {
        let err = ValetError::Connection("mount failed".to_string());
        assert_eq!(err.to_string(), "Connection error: mount failed");
    }

    #[test]
    fn test_error_display_not_connected() {
        assert_eq!(ValetError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_error_display_timeout() {
        assert_eq!(ValetError::Timeout.to_string(), "Operation timed out");
    }

    #[test]
    fn test_error_display_permission_denied() {
        let err = ValetError::PermissionDenied {
            capability: "kv:read".to_string(),
        };
        assert_eq!(err.to_string(), "Permission denied: missing kv:read");
    }

    #[test]
    fn test_error_display_approval_blocked_names_remedy() {
        let msg = ValetError::ApprovalBlocked.to_string();
        assert!(msg.contains("popups"));
    }

    #[test]
    fn test_error_display_backend() {
        let err = ValetError::Backend {
            code: "conflict".to_string(),
            message: "key exists".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error conflict: key exists");
    }

    #[test]
    fn test_error_from_token_error() {
        let err: ValetError = TokenError::UnknownVersion(9).into();
        assert!(matches!(err, ValetError::Token(TokenError::UnknownVersion(9))));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: ValetError = json_err.into();
        assert!(matches!(err, ValetError::Serialization(_)));
    }
}
