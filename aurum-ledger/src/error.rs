//! Ledger error types.

use thiserror::Error;

/// Errors from ledger reads and writes.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Filesystem error
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log file could not be parsed
    #[error("Ledger parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Atomic rename of a rewritten log file failed
    #[error("Ledger persist error: {0}")]
    Persist(String),

    /// No OPEN record matches the ticket
    #[error("No open trade record for ticket {0}")]
    OpenRecordNotFound(i64),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
