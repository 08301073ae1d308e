//! Protection error types.

use thiserror::Error;

/// Errors from circuit-breaker state handling.
#[derive(Debug, Error)]
pub enum ProtectError {
    /// State file I/O error
    #[error("Protection state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file could not be parsed
    #[error("Protection state parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Atomic rewrite of the state file failed
    #[error("Protection state persist error: {0}")]
    Persist(String),

    /// Ledger read failed while evaluating gates
    #[error("Ledger error: {0}")]
    Ledger(#[from] aurum_ledger::LedgerError),
}

/// Result type for protection operations.
pub type ProtectResult<T> = Result<T, ProtectError>;
