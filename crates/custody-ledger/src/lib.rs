//! Custody Ledger - Signed deposits and batched transfers
//!
//! This crate provides:
//! - The balance table and staged (all-or-nothing) mutations over it
//! - The token gateway seam to the external token system
//! - The transfer engine that authenticates and executes operations
//! - Ledger events and configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod store;
pub mod telemetry;

pub use config::LedgerConfig;
pub use engine::TransferEngine;
pub use error::{LedgerError, Result};
pub use events::{EventLog, EventSink, LedgerEvent};
pub use gateway::{GatewayError, InMemoryTokens, TokenGateway};
pub use store::{Changeset, LedgerStore, StagedBalances};
