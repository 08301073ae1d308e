//! Bridge error types.

use thiserror::Error;

/// Errors from the bridge transport.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The listen endpoint could not be bound
    #[error("Failed to bind bridge endpoint: {0}")]
    Bind(std::io::Error),

    /// Socket I/O failure
    #[error("Bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No EA is connected right now
    #[error("No EA connection")]
    NotConnected,

    /// No reply arrived within the command wait window
    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    /// A command could not be encoded
    #[error("Frame encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
