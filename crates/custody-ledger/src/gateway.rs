//! Token gateway seam
//!
//! The ledger never moves tokens itself. It asks a `TokenGateway` to pull
//! tokens from a principal into custody, or push them from custody to a
//! recipient, and branches on the returned `Result`.
//!
//! Multi-movement operations run inside a unit of work: movements made
//! after `begin` are provisional until `commit`, and `rollback` undoes all
//! of them. A chain-backed gateway maps this onto its enclosing
//! transaction.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use custody_core::{Address, Amount, Asset};

/// Why the token system refused a movement
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("allowance {available} below {required}")]
    InsufficientAllowance { available: Amount, required: Amount },

    #[error("token balance {available} below {required}")]
    InsufficientFunds { available: Amount, required: Amount },

    #[error("recipient {0} refused by token")]
    RecipientBlocked(Address),

    #[error("token balance overflow")]
    Overflow,

    #[error("unit of work already open")]
    UnitOfWorkOpen,

    #[error("no unit of work open")]
    NoUnitOfWork,

    #[error("{0}")]
    Rejected(String),
}

/// Synchronous access to the external token system
pub trait TokenGateway {
    /// Move `amount` from `from` into the custody account `to`, spending
    /// an allowance `from` granted to `to`
    fn pull_from(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError>;

    /// Move `amount` out of the custody account `from` to `to`
    fn push_to(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError>;

    /// Open a unit of work
    fn begin(&mut self) -> Result<(), GatewayError>;

    /// Make every movement since `begin` final
    fn commit(&mut self) -> Result<(), GatewayError>;

    /// Undo every movement since `begin`. Must leave external balances
    /// exactly as they were when the unit of work was opened.
    fn rollback(&mut self);
}

impl<G: TokenGateway + ?Sized> TokenGateway for &mut G {
    fn pull_from(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        (**self).pull_from(from, to, asset, amount)
    }

    fn push_to(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        (**self).push_to(from, to, asset, amount)
    }

    fn begin(&mut self) -> Result<(), GatewayError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        (**self).commit()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }
}

impl<G: TokenGateway + ?Sized> TokenGateway for Box<G> {
    fn pull_from(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        (**self).pull_from(from, to, asset, amount)
    }

    fn push_to(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        (**self).push_to(from, to, asset, amount)
    }

    fn begin(&mut self) -> Result<(), GatewayError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        (**self).commit()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }
}

/// In-memory token system with ERC-20 transfer and allowance rules.
///
/// Suitable for tests and local simulation. Recipients can be blocked to
/// model tokens that refuse transfers to certain addresses. A unit of work
/// is backed by a savepoint of balances and allowances.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokens {
    balances: HashMap<(Address, Asset), Amount>,
    allowances: HashMap<(Address, Address, Asset), Amount>,
    blocked: HashSet<Address>,
    savepoint: Option<Savepoint>,
}

#[derive(Debug, Clone)]
struct Savepoint {
    balances: HashMap<(Address, Asset), Amount>,
    allowances: HashMap<(Address, Address, Asset), Amount>,
}

impl InMemoryTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create tokens out of thin air
    pub fn mint(
        &mut self,
        owner: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        let balance = self.balances.entry((*owner, *asset)).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(GatewayError::Overflow)?;
        Ok(())
    }

    /// Let `spender` pull up to `amount` from `owner`
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        asset: &Asset,
        amount: Amount,
    ) {
        self.allowances.insert((*owner, *spender, *asset), amount);
    }

    pub fn balance_of(&self, owner: &Address, asset: &Asset) -> Amount {
        self.balances.get(&(*owner, *asset)).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address, asset: &Asset) -> Amount {
        self.allowances
            .get(&(*owner, *spender, *asset))
            .copied()
            .unwrap_or(0)
    }

    /// Refuse all future transfers to `recipient`
    pub fn block_recipient(&mut self, recipient: Address) {
        self.blocked.insert(recipient);
    }

    pub fn unblock_recipient(&mut self, recipient: &Address) {
        self.blocked.remove(recipient);
    }

    /// Whether a unit of work is open
    pub fn in_unit_of_work(&self) -> bool {
        self.savepoint.is_some()
    }

    fn move_tokens(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        if self.blocked.contains(to) {
            return Err(GatewayError::RecipientBlocked(*to));
        }

        let available = self.balance_of(from, asset);
        let remaining = available
            .checked_sub(amount)
            .ok_or(GatewayError::InsufficientFunds {
                available,
                required: amount,
            })?;

        if from != to {
            let credited = self
                .balance_of(to, asset)
                .checked_add(amount)
                .ok_or(GatewayError::Overflow)?;
            self.balances.insert((*from, *asset), remaining);
            self.balances.insert((*to, *asset), credited);
        }

        debug!(
            "Token {} moved {} from {} to {}",
            asset.address().short(),
            amount,
            from.short(),
            to.short()
        );
        Ok(())
    }
}

impl TokenGateway for InMemoryTokens {
    fn pull_from(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        let allowance = self.allowance(from, to, asset);
        if allowance < amount {
            return Err(GatewayError::InsufficientAllowance {
                available: allowance,
                required: amount,
            });
        }

        self.move_tokens(from, to, asset, amount)?;
        self.allowances
            .insert((*from, *to, *asset), allowance - amount);
        Ok(())
    }

    fn push_to(
        &mut self,
        from: &Address,
        to: &Address,
        asset: &Asset,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        self.move_tokens(from, to, asset, amount)
    }

    fn begin(&mut self) -> Result<(), GatewayError> {
        if self.savepoint.is_some() {
            return Err(GatewayError::UnitOfWorkOpen);
        }
        self.savepoint = Some(Savepoint {
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        self.savepoint
            .take()
            .map(|_| ())
            .ok_or(GatewayError::NoUnitOfWork)
    }

    fn rollback(&mut self) {
        if let Some(savepoint) = self.savepoint.take() {
            debug!("Rolling back token movements");
            self.balances = savepoint.balances;
            self.allowances = savepoint.allowances;
        }
    }
}
