//! Balance table
//!
//! `LedgerStore` owns the (principal, asset) -> balance mapping. Engine
//! operations never mutate it in place: they stage every change in a
//! `StagedBalances` overlay and commit the resulting `Changeset` only once
//! the whole operation has succeeded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use custody_core::{Amount, Asset, Principal};

use crate::error::{LedgerError, Result};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

type BalanceKey = (Principal, Asset);

/// Internal balances held in custody, per principal and asset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStore {
    balances: HashMap<BalanceKey, Amount>,
}

/// One row of a persisted snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BalanceEntry {
    principal: Principal,
    asset: Asset,
    balance: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
struct BalanceSnapshot {
    version: u32,
    balances: Vec<BalanceEntry>,
}

impl LedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance; zero for keys never credited
    pub fn balance_of(&self, principal: &Principal, asset: &Asset) -> Amount {
        self.balances
            .get(&(*principal, *asset))
            .copied()
            .unwrap_or(0)
    }

    /// Increase a balance, failing rather than wrapping
    pub fn credit(
        &mut self,
        principal: &Principal,
        asset: &Asset,
        amount: Amount,
    ) -> Result<Amount> {
        let updated = checked_credit(self.balance_of(principal, asset), amount)?;
        self.balances.insert((*principal, *asset), updated);
        Ok(updated)
    }

    /// Decrease a balance; leaves it untouched when too low
    pub fn debit(
        &mut self,
        principal: &Principal,
        asset: &Asset,
        amount: Amount,
    ) -> Result<Amount> {
        let updated = checked_debit(asset, self.balance_of(principal, asset), amount)?;
        self.balances.insert((*principal, *asset), updated);
        Ok(updated)
    }

    /// Start staging changes on top of this store
    pub fn stage(&self) -> StagedBalances<'_> {
        StagedBalances {
            base: self,
            pending: HashMap::new(),
        }
    }

    /// Apply a fully validated changeset
    pub fn commit(&mut self, changeset: Changeset) {
        self.balances.extend(changeset.balances);
    }

    /// Number of (principal, asset) entries ever credited
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&Principal, &Asset, Amount)> {
        self.balances
            .iter()
            .map(|((principal, asset), balance)| (principal, asset, *balance))
    }

    /// Write a JSON snapshot of the table
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut balances: Vec<BalanceEntry> = self
            .iter()
            .map(|(principal, asset, balance)| BalanceEntry {
                principal: *principal,
                asset: *asset,
                balance,
            })
            .collect();
        balances.sort_by(|a, b| (a.principal, a.asset).cmp(&(b.principal, b.asset)));

        let snapshot = BalanceSnapshot {
            version: SNAPSHOT_VERSION,
            balances,
        };
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    /// Load a snapshot written by [`LedgerStore::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: BalanceSnapshot = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::Serialization(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut balances = HashMap::with_capacity(snapshot.balances.len());
        for entry in snapshot.balances {
            let key = (entry.principal, entry.asset);
            if balances.insert(key, entry.balance).is_some() {
                return Err(LedgerError::Serialization(format!(
                    "Duplicate snapshot entry for {} / {}",
                    entry.principal, entry.asset
                )));
            }
        }

        Ok(Self { balances })
    }
}

/// Pending balance changes layered over a store
#[derive(Debug)]
pub struct StagedBalances<'a> {
    base: &'a LedgerStore,
    pending: HashMap<BalanceKey, Amount>,
}

impl<'a> StagedBalances<'a> {
    /// Balance as it would be after committing
    pub fn balance_of(&self, principal: &Principal, asset: &Asset) -> Amount {
        self.pending
            .get(&(*principal, *asset))
            .copied()
            .unwrap_or_else(|| self.base.balance_of(principal, asset))
    }

    pub fn credit(
        &mut self,
        principal: &Principal,
        asset: &Asset,
        amount: Amount,
    ) -> Result<Amount> {
        let updated = checked_credit(self.balance_of(principal, asset), amount)?;
        self.pending.insert((*principal, *asset), updated);
        Ok(updated)
    }

    pub fn debit(
        &mut self,
        principal: &Principal,
        asset: &Asset,
        amount: Amount,
    ) -> Result<Amount> {
        let updated = checked_debit(asset, self.balance_of(principal, asset), amount)?;
        self.pending.insert((*principal, *asset), updated);
        Ok(updated)
    }

    /// Finish staging. Dropping the overlay instead discards every change.
    pub fn into_changeset(self) -> Changeset {
        Changeset {
            balances: self.pending,
        }
    }
}

/// Final balances produced by a successful operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    balances: HashMap<BalanceKey, Amount>,
}

fn checked_credit(current: Amount, amount: Amount) -> Result<Amount> {
    current.checked_add(amount).ok_or(LedgerError::AmountOverflow)
}

fn checked_debit(asset: &Asset, current: Amount, amount: Amount) -> Result<Amount> {
    current
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientBalance {
            asset: *asset,
            available: current,
            required: amount,
        })
}
