//! Error types for channel forwarding.
//!
//! Every failure a caller can observe is a variant of [`ChannelError`]. Errors
//! raised by the peer are carried back as [`ChannelError::Remote`] with the
//! JSON-RPC code and message the peer produced, never reinterpreted.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    // Dispatch errors
    #[error("Method not found: {command}")]
    MethodNotFound { command: String },

    #[error("Call not found: {command}")]
    CallNotFound { command: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Unsupported operations
    #[error("Events are not supported by this channel: {event}")]
    EventsUnsupported { event: String },

    #[error("Event not found: {event}")]
    EventNotFound { event: String },

    #[error("Unsupported proxy property: {property}")]
    UnsupportedProxyProperty { property: String },

    // Transport errors
    #[error("Remote error ({code}): {message}")]
    Remote { code: i32, message: String },

    #[error("Connection to {addr} lost")]
    ConnectionLost { addr: SocketAddr },

    #[error("Connect timeout after {0:?}")]
    Timeout(Duration),

    #[error("Server at max capacity ({limit} connections)")]
    AtCapacity { limit: usize },

    #[error("No tokio runtime available to serve {event}")]
    NoRuntime { event: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
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

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ChannelError {
    /// Build an `InvalidParams` error for a command argument.
    pub fn invalid_param(command: &str, index: usize, message: impl std::fmt::Display) -> Self {
        ChannelError::InvalidParams {
            message: format!("{}: argument {}: {}", command, index, message),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Transport error
    /// - -32004: Unsupported operation
    /// - -32005: Validation error
    ///
    /// A `Remote` error keeps the code the peer sent.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ChannelError::MethodNotFound { .. } | ChannelError::CallNotFound { .. } => -32601,

            ChannelError::InvalidParams { .. } => -32602,

            ChannelError::EventsUnsupported { .. }
            | ChannelError::EventNotFound { .. }
            | ChannelError::UnsupportedProxyProperty { .. } => -32004,

            ChannelError::ConnectionLost { .. }
            | ChannelError::Timeout(_)
            | ChannelError::AtCapacity { .. } => -32000,

            ChannelError::Json { .. } => -32700,

            ChannelError::Validation { .. } => -32005,

            ChannelError::Remote { code, .. } => *code,

            _ => -32603,
        }
    }

    /// True when no handler exists for the command, locally or on the peer.
    pub fn is_method_not_found(&self) -> bool {
        match self {
            ChannelError::MethodNotFound { .. } | ChannelError::CallNotFound { .. } => true,
            ChannelError::Remote { code, .. } => *code == -32601,
            _ => false,
        }
    }

    /// True for failures raised before anything was sent over the channel.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ChannelError::EventsUnsupported { .. }
                | ChannelError::EventNotFound { .. }
                | ChannelError::UnsupportedProxyProperty { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::MethodNotFound {
            command: "openWindow".into(),
        };
        assert_eq!(err.to_string(), "Method not found: openWindow");

        let err = ChannelError::EventsUnsupported {
            event: "anyEvent".into(),
        };
        assert!(err.to_string().ends_with("anyEvent"));
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            ChannelError::MethodNotFound {
                command: "x".into()
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(
            ChannelError::InvalidParams {
                message: "bad".into()
            }
            .to_rpc_error_code(),
            -32602
        );
        assert_eq!(
            ChannelError::Remote {
                code: -32042,
                message: "custom".into()
            }
            .to_rpc_error_code(),
            -32042
        );
        assert_eq!(ChannelError::Other("boom".into()).to_rpc_error_code(), -32603);
        assert_eq!(ChannelError::AtCapacity { limit: 64 }.to_rpc_error_code(), -32000);
    }

    #[test]
    fn test_method_not_found_survives_transport() {
        let remote = ChannelError::Remote {
            code: -32601,
            message: "Method not found: nope".into(),
        };
        assert!(remote.is_method_not_found());
        assert!(!ChannelError::Other("nope".into()).is_method_not_found());
    }

    #[test]
    fn test_invalid_param_message_names_command() {
        let err = ChannelError::invalid_param("isFocused", 0, "expected a number");
        assert_eq!(
            err.to_string(),
            "Invalid params: isFocused: argument 0: expected a number"
        );
    }
}
