//! WolfRelay Error Types

use thiserror::Error;

use crate::rpc::ErrorCode;

/// Result type alias for WolfRelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfRelay error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Payload errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid payload for {method}: {reason}")]
    InvalidPayload { method: String, reason: String },

    // Handler errors
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u32),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Lifecycle errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is a timeout (connect or request)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::Timeout(_)
                | Error::Remote { code: ErrorCode::Timeout, .. }
        )
    }

    /// Map this error onto a wire error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::UnknownMethod(_) => ErrorCode::UnknownMethod,
            Error::InvalidPayload { .. } | Error::Serialization(_) => ErrorCode::InvalidPayload,
            Error::Handler(_) => ErrorCode::Handler,
            Error::Rejected(_) => ErrorCode::Rejected,
            Error::Remote { code, .. } => *code,
            Error::ConnectionTimeout(_) | Error::Timeout(_) => ErrorCode::Timeout,
            Error::Cancelled | Error::ShuttingDown => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::UnknownMethod("X".into()).code(), ErrorCode::UnknownMethod);
        assert_eq!(Error::Handler("boom".into()).code(), ErrorCode::Handler);
        assert_eq!(Error::ShuttingDown.code(), ErrorCode::Unavailable);
        assert_eq!(Error::Cancelled.code(), ErrorCode::Unavailable);
        assert_eq!(Error::Rejected("foo".into()).code(), ErrorCode::Rejected);
        assert_eq!(Error::Io(std::io::ErrorKind::BrokenPipe.into()).code(), ErrorCode::Internal);

        let remote = Error::Remote {
            code: ErrorCode::Timeout,
            message: "slow".into(),
        };
        assert_eq!(remote.code(), ErrorCode::Timeout);
        assert!(remote.is_timeout());
        assert!(Error::ConnectionTimeout("peer:1".into()).is_timeout());
        assert!(Error::Timeout("Storage.Write".into()).is_timeout());
        assert!(!Error::Network("reset".into()).is_timeout());
    }
}
