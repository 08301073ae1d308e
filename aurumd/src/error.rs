//! Daemon error types.

use thiserror::Error;

/// Daemon-level errors; each layer's error converts upward into this.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] aurum_domain::DomainError),

    /// Strategy or risk computation error
    #[error("Engine error: {0}")]
    Engine(#[from] aurum_engine::EngineError),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] aurum_ledger::LedgerError),

    /// Protection state error
    #[error("Protection error: {0}")]
    Protect(#[from] aurum_protect::ProtectError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] aurum_exec::ExecError),

    /// Bridge transport error
    #[error("Bridge error: {0}")]
    Bridge(#[from] aurum_bridge::BridgeError),

    /// Configuration error (fatal at startup only)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
