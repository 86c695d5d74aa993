//! Error types for custody-core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Payload encoding error: {0}")]
    Encoding(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),
}
