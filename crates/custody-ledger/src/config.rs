//! Ledger configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use custody_core::Address;

use crate::error::{LedgerError, Result};

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The ledger's own address at the token system (its custody account)
    pub ledger_address: Address,

    /// Largest batch accepted by a single transfer
    #[serde(default = "LedgerConfig::default_max_batch_lines")]
    pub max_batch_lines: usize,

    /// Where balance snapshots are written, if anywhere
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_address: Address::ZERO,
            max_batch_lines: Self::default_max_batch_lines(),
            state_path: None,
        }
    }
}

impl LedgerConfig {
    /// Config for a ledger custodying tokens at `ledger_address`
    pub fn new(ledger_address: Address) -> Self {
        Self {
            ledger_address,
            ..Self::default()
        }
    }

    fn default_max_batch_lines() -> usize {
        256
    }

    /// Set the snapshot path
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_lines == 0 {
            return Err(LedgerError::Config(
                "max_batch_lines must be at least 1".to_string(),
            ));
        }
        if self.ledger_address == Address::ZERO {
            return Err(LedgerError::Config(
                "ledger_address must not be the zero address".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
