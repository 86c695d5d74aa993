//! Error types for the custody ledger

use thiserror::Error;

use custody_core::{Address, Amount, Asset};

use crate::gateway::GatewayError;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in the ledger.
///
/// Every error aborts the whole enclosing operation; nothing is committed.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Signature malformed or signed by someone other than the caller
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Internal balance too low for a debit
    #[error("Insufficient balance of {asset}: available {available}, required {required}")]
    InsufficientBalance {
        asset: Asset,
        available: Amount,
        required: Amount,
    },

    /// The token gateway refused to move tokens
    #[error("Transfer of {amount} {asset} with {counterparty} failed: {reason}")]
    AssetTransferFailed {
        asset: Asset,
        counterparty: Address,
        amount: Amount,
        reason: GatewayError,
    },

    /// The token gateway could not open or finish a unit of work
    #[error("Token gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Arithmetic bound exceeded
    #[error("Amount overflow")]
    AmountOverflow,

    /// Deposits and transfer lines must move a positive amount
    #[error("Amount must be positive")]
    ZeroAmount,

    /// Batch holds more lines than the configured maximum
    #[error("Batch of {lines} lines exceeds limit of {limit}")]
    BatchTooLarge { lines: usize, limit: usize },

    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] custody_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
