//! Execution error types.

use thiserror::Error;

/// Errors from broker commands and their accounting.
#[derive(Debug, Error)]
pub enum ExecError {
    /// No terminal connection is currently established
    #[error("Not connected to the trading terminal")]
    NotConnected,

    /// Transport-level failure while sending or awaiting a command
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// No reply arrived within the command wait window
    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    /// The terminal answered with a rejection
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Close retries were exhausted; the position needs operator attention
    #[error("Close failed for ticket {ticket} after {attempts} attempts")]
    CloseFailed { ticket: i64, attempts: u32 },

    /// A stop/target modification was rejected
    #[error("Modify rejected for ticket {ticket}: {message}")]
    ModifyRejected { ticket: i64, message: String },

    /// The terminal replied with an unexpected frame kind
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Durable accounting failed; trading must not continue blind
    #[error("Ledger error: {0}")]
    Ledger(#[from] aurum_ledger::LedgerError),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
