//! Custody Core - Shared types, payload encoding, and signature recovery
//!
//! This crate provides the foundational types for the Custody ledger:
//! addresses and assets, the canonical encodings that key holders sign,
//! and recovery of a signer's address from a detached signature.

pub mod crypto;
pub mod error;
pub mod payload;
pub mod types;

pub use crypto::{keccak256, personal_message_hash, recover, sign_digest, PERSONAL_MESSAGE_PREFIX};
pub use error::{Error, Result};
pub use payload::{DepositPayload, TransferBatch, TransferLine};
pub use types::{Address, Amount, Asset, MessageHash, Principal, RecoverableSignature};

/// Length of a recoverable signature (r || s || v)
pub const SIGNATURE_LEN: usize = 65;

/// Length of an address
pub const ADDRESS_LEN: usize = 20;

/// Size of one ABI word
pub const WORD_LEN: usize = 32;
