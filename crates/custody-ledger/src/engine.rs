//! Signed deposit and transfer execution
//!
//! Each operation runs to completion on `&mut self`:
//!
//! 1. Recompute the payload digest and recover the signer
//! 2. Reject unless the signer is the caller
//! 3. Stage balance changes and drive the token gateway
//! 4. Commit the staged changes, then deliver events
//!
//! Any failure in steps 1-3 drops the staged changes and rolls back the
//! gateway's unit of work, so neither the store nor custody at the token
//! system changes and no event is delivered.

use tracing::{debug, info, warn};

use custody_core::{crypto, Amount, Asset, DepositPayload, MessageHash, Principal, TransferBatch};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::{EventSink, LedgerEvent};
use crate::gateway::TokenGateway;
use crate::store::LedgerStore;

/// Authenticates and executes ledger operations
pub struct TransferEngine<G, S> {
    /// Ledger configuration
    config: LedgerConfig,

    /// Balance table, owned exclusively by this engine
    store: LedgerStore,

    /// External token system
    gateway: G,

    /// Receiver of committed events
    sink: S,
}

impl<G: TokenGateway, S: EventSink> TransferEngine<G, S> {
    /// Create an engine with an empty balance table
    pub fn new(config: LedgerConfig, gateway: G, sink: S) -> Result<Self> {
        Self::with_store(config, LedgerStore::new(), gateway, sink)
    }

    /// Create an engine over an existing balance table
    pub fn with_store(
        config: LedgerConfig,
        store: LedgerStore,
        gateway: G,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            gateway,
            sink,
        })
    }

    /// Create an engine, restoring balances from `config.state_path` if a
    /// snapshot exists there
    pub fn open(config: LedgerConfig, gateway: G, sink: S) -> Result<Self> {
        let store = match &config.state_path {
            Some(path) if path.exists() => {
                let store = LedgerStore::load(path)?;
                info!("Restored {} balance entries from {:?}", store.len(), path);
                store
            }
            _ => LedgerStore::new(),
        };
        Self::with_store(config, store, gateway, sink)
    }

    /// Write the balance table to `config.state_path`
    pub fn persist(&self) -> Result<()> {
        let path = self
            .config
            .state_path
            .as_ref()
            .ok_or_else(|| LedgerError::Config("No state_path configured".to_string()))?;
        self.store.save(path)?;
        debug!("Saved {} balance entries to {:?}", self.store.len(), path);
        Ok(())
    }

    /// Pull `amount` of `asset` from the caller into custody and credit it.
    ///
    /// `signature` must be the caller's signature over the deposit payload
    /// `(asset, amount)`.
    pub fn deposit(
        &mut self,
        caller: &Principal,
        asset: &Asset,
        amount: Amount,
        signature: &[u8],
    ) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let digest = DepositPayload::new(*asset, amount).digest();
        self.authorize(caller, &digest, signature)?;

        let ledger = self.config.ledger_address;
        let mut staged = self.store.stage();

        // Checked before the pull so an overflow never strands pulled tokens
        staged.credit(caller, asset, amount)?;

        self.gateway
            .pull_from(caller, &ledger, asset, amount)
            .map_err(|reason| {
                warn!(
                    "Deposit pull of {} {} from {} failed: {}",
                    amount, asset, caller, reason
                );
                LedgerError::AssetTransferFailed {
                    asset: *asset,
                    counterparty: ledger,
                    amount,
                    reason,
                }
            })?;

        let changeset = staged.into_changeset();
        self.store.commit(changeset);

        info!("Deposit of {} {} credited to {}", amount, asset, caller);

        self.sink.emit(LedgerEvent::DepositExecuted {
            principal: *caller,
            asset: *asset,
            amount,
        });

        Ok(())
    }

    /// Debit the caller and push tokens out of custody for every line of
    /// `batch`, in order. All lines succeed or none do.
    ///
    /// Every line's debit is staged before any token leaves custody. The
    /// pushes then run inside one gateway unit of work, rolled back as a
    /// whole if any line is refused.
    ///
    /// `signature` must be the caller's signature over the batch encoding.
    pub fn transfer(
        &mut self,
        caller: &Principal,
        batch: &TransferBatch,
        signature: &[u8],
    ) -> Result<()> {
        if batch.len() > self.config.max_batch_lines {
            return Err(LedgerError::BatchTooLarge {
                lines: batch.len(),
                limit: self.config.max_batch_lines,
            });
        }
        if batch.iter().any(|line| line.amount == 0) {
            return Err(LedgerError::ZeroAmount);
        }

        let digest = batch.digest();
        self.authorize(caller, &digest, signature)?;

        let ledger = self.config.ledger_address;
        let mut staged = self.store.stage();

        for (index, line) in batch.iter().enumerate() {
            staged.debit(caller, &line.asset, line.amount).map_err(|e| {
                warn!("Transfer line {} from {} rejected: {}", index, caller, e);
                e
            })?;
        }

        self.gateway.begin()?;
        for (index, line) in batch.iter().enumerate() {
            let pushed = self
                .gateway
                .push_to(&ledger, &line.recipient, &line.asset, line.amount);

            if let Err(reason) = pushed {
                warn!(
                    "Transfer line {} push of {} {} to {} failed: {}",
                    index, line.amount, line.asset, line.recipient, reason
                );
                self.gateway.rollback();
                return Err(LedgerError::AssetTransferFailed {
                    asset: line.asset,
                    counterparty: line.recipient,
                    amount: line.amount,
                    reason,
                });
            }

            debug!(
                "Transfer line {} pushed: {} {} to {}",
                index, line.amount, line.asset, line.recipient
            );
        }
        if let Err(e) = self.gateway.commit() {
            self.gateway.rollback();
            return Err(e.into());
        }

        let changeset = staged.into_changeset();
        self.store.commit(changeset);

        info!("Transfer batch of {} lines from {} committed", batch.len(), caller);

        for line in batch {
            self.sink.emit(LedgerEvent::TransferExecuted {
                principal: *caller,
                recipient: line.recipient,
                asset: line.asset,
                amount: line.amount,
            });
        }

        Ok(())
    }

    /// Internal balance of `principal` in `asset`
    pub fn balance_of(&self, principal: &Principal, asset: &Asset) -> Amount {
        self.store.balance_of(principal, asset)
    }

    /// Check that `signature` over `digest` was made by `caller`
    fn authorize(&self, caller: &Principal, digest: &MessageHash, signature: &[u8]) -> Result<()> {
        let signer = crypto::recover(digest, signature).map_err(|e| {
            warn!("Rejected malformed signature from {}: {}", caller, e);
            LedgerError::InvalidSignature(e.to_string())
        })?;

        if signer != *caller {
            warn!("Signature by {} presented for {}", signer, caller);
            return Err(LedgerError::InvalidSignature(format!(
                "signed by {}, expected {}",
                signer, caller
            )));
        }

        Ok(())
    }
}

impl<G, S> TransferEngine<G, S> {
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Take the engine apart
    pub fn into_parts(self) -> (LedgerStore, G, S) {
        (self.store, self.gateway, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::gateway::{GatewayError, InMemoryTokens};
    use custody_core::{crypto::address_of_signing_key, Address, RecoverableSignature, TransferLine};
    use k256::ecdsa::SigningKey;

    struct Fixture {
        engine: TransferEngine<InMemoryTokens, EventLog>,
        key: SigningKey,
        user: Principal,
        token: Asset,
        ledger: Address,
    }

    fn setup() -> Fixture {
        let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let user = address_of_signing_key(&key);
        let token = Asset::new(Address::new([0x70; 20]));
        let ledger = Address::new([0x1e; 20]);

        let mut tokens = InMemoryTokens::new();
        tokens.mint(&user, &token, 1_000).unwrap();
        tokens.approve(&user, &ledger, &token, 1_000);

        let engine =
            TransferEngine::new(LedgerConfig::new(ledger), tokens, EventLog::new()).unwrap();

        Fixture {
            engine,
            key,
            user,
            token,
            ledger,
        }
    }

    fn sign_deposit(key: &SigningKey, asset: &Asset, amount: Amount) -> RecoverableSignature {
        crypto::sign_digest(key, &DepositPayload::new(*asset, amount).digest()).unwrap()
    }

    fn sign_batch(key: &SigningKey, batch: &TransferBatch) -> RecoverableSignature {
        crypto::sign_digest(key, &batch.digest()).unwrap()
    }

    fn deposit(f: &mut Fixture, amount: Amount) {
        let sig = sign_deposit(&f.key, &f.token, amount);
        f.engine.deposit(&f.user, &f.token, amount, sig.as_bytes()).unwrap();
    }

    #[test]
    fn test_deposit_credits_after_pull() {
        let mut f = setup();
        deposit(&mut f, 100);

        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
        assert_eq!(f.engine.gateway().balance_of(&f.ledger, &f.token), 100);
        assert_eq!(f.engine.gateway().balance_of(&f.user, &f.token), 900);
        assert_eq!(
            f.engine.sink().events(),
            &[LedgerEvent::DepositExecuted {
                principal: f.user,
                asset: f.token,
                amount: 100
            }]
        );
    }

    #[test]
    fn test_deposit_signature_bound_to_amount() {
        let mut f = setup();
        let sig = sign_deposit(&f.key, &f.token, 100);

        let result = f.engine.deposit(&f.user, &f.token, 101, sig.as_bytes());
        assert!(matches!(result, Err(LedgerError::InvalidSignature(_))));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 0);
        assert_eq!(f.engine.gateway().balance_of(&f.ledger, &f.token), 0);
    }

    #[test]
    fn test_deposit_signature_bound_to_asset() {
        let mut f = setup();
        let other = Asset::new(Address::new([0x71; 20]));
        let sig = sign_deposit(&f.key, &other, 100);

        let result = f.engine.deposit(&f.user, &f.token, 100, sig.as_bytes());
        assert!(matches!(result, Err(LedgerError::InvalidSignature(_))));
    }

    #[test]
    fn test_deposit_wrong_key_rejected() {
        let mut f = setup();
        let intruder = SigningKey::from_slice(&[0x99; 32]).unwrap();
        let sig = sign_deposit(&intruder, &f.token, 100);

        let result = f.engine.deposit(&f.user, &f.token, 100, sig.as_bytes());
        assert!(matches!(result, Err(LedgerError::InvalidSignature(_))));
        assert!(f.engine.store().is_empty());
        assert!(f.engine.sink().is_empty());
    }

    #[test]
    fn test_deposit_malformed_signature_rejected() {
        let mut f = setup();
        let result = f.engine.deposit(&f.user, &f.token, 100, &[0u8; 10]);
        assert!(matches!(result, Err(LedgerError::InvalidSignature(_))));
    }

    #[test]
    fn test_deposit_failed_pull_credits_nothing() {
        let mut f = setup();
        f.engine.gateway_mut().approve(&f.user, &f.ledger, &f.token, 10);
        let sig = sign_deposit(&f.key, &f.token, 100);

        let err = f
            .engine
            .deposit(&f.user, &f.token, 100, sig.as_bytes())
            .unwrap_err();
        match err {
            LedgerError::AssetTransferFailed {
                asset,
                counterparty,
                amount,
                reason,
            } => {
                assert_eq!(asset, f.token);
                assert_eq!(counterparty, f.ledger);
                assert_eq!(amount, 100);
                assert!(matches!(reason, GatewayError::InsufficientAllowance { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 0);
        assert!(f.engine.sink().is_empty());
    }

    #[test]
    fn test_deposit_overflow_does_not_pull() {
        let mut f = setup();
        let mut store = LedgerStore::new();
        store.credit(&f.user, &f.token, Amount::MAX).unwrap();
        let (_, tokens, log) = f.engine.into_parts();
        f.engine =
            TransferEngine::with_store(LedgerConfig::new(f.ledger), store, tokens, log).unwrap();

        let sig = sign_deposit(&f.key, &f.token, 1);
        let result = f.engine.deposit(&f.user, &f.token, 1, sig.as_bytes());

        assert!(matches!(result, Err(LedgerError::AmountOverflow)));
        assert_eq!(f.engine.gateway().balance_of(&f.user, &f.token), 1_000);
    }

    #[test]
    fn test_transfer_debits_and_pushes() {
        let mut f = setup();
        deposit(&mut f, 100);
        let dapp = Address::new([0xd0; 20]);
        let batch = TransferBatch::new(vec![TransferLine::new(dapp, 50, f.token)]);
        let sig = sign_batch(&f.key, &batch);

        f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap();

        assert_eq!(f.engine.balance_of(&f.user, &f.token), 50);
        assert_eq!(f.engine.gateway().balance_of(&dapp, &f.token), 50);
        assert_eq!(
            f.engine.sink().events().last(),
            Some(&LedgerEvent::TransferExecuted {
                principal: f.user,
                recipient: dapp,
                asset: f.token,
                amount: 50
            })
        );
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut f = setup();
        deposit(&mut f, 100);
        let dapp = Address::new([0xd0; 20]);
        let batch = TransferBatch::new(vec![TransferLine::new(dapp, 150, f.token)]);
        let sig = sign_batch(&f.key, &batch);

        let err = f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                asset,
                available,
                required,
            } => {
                assert_eq!(asset, f.token);
                assert_eq!(available, 100);
                assert_eq!(required, 150);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
    }

    #[test]
    fn test_transfer_failed_push_rolls_back() {
        let mut f = setup();
        deposit(&mut f, 100);
        let dapp = Address::new([0xd0; 20]);
        f.engine.gateway_mut().block_recipient(dapp);
        let batch = TransferBatch::new(vec![TransferLine::new(dapp, 50, f.token)]);
        let sig = sign_batch(&f.key, &batch);

        let err = f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AssetTransferFailed { counterparty, amount: 50, .. }
                if counterparty == dapp
        ));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
        assert_eq!(f.engine.sink().len(), 1);
    }

    #[test]
    fn test_transfer_later_line_failure_discards_earlier_lines() {
        let mut f = setup();
        deposit(&mut f, 100);
        let batch = TransferBatch::new(vec![
            TransferLine::new(Address::new([0xd1; 20]), 60, f.token),
            TransferLine::new(Address::new([0xd2; 20]), 60, f.token),
        ]);
        let sig = sign_batch(&f.key, &batch);

        let err = f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { available: 40, required: 60, .. }
        ));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
        // Nothing left custody for the first line
        assert_eq!(f.engine.gateway().balance_of(&f.ledger, &f.token), 100);
        assert_eq!(f.engine.gateway().balance_of(&Address::new([0xd1; 20]), &f.token), 0);
        // Only the deposit event was delivered
        assert_eq!(f.engine.sink().len(), 1);
    }

    #[test]
    fn test_transfer_later_push_failure_reverses_earlier_pushes() {
        let mut f = setup();
        deposit(&mut f, 100);
        let paid = Address::new([0xd1; 20]);
        let refused = Address::new([0xd2; 20]);
        f.engine.gateway_mut().block_recipient(refused);
        let batch = TransferBatch::new(vec![
            TransferLine::new(paid, 30, f.token),
            TransferLine::new(refused, 30, f.token),
        ]);
        let sig = sign_batch(&f.key, &batch);

        let err = f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AssetTransferFailed { counterparty, .. } if counterparty == refused
        ));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
        assert_eq!(f.engine.gateway().balance_of(&f.ledger, &f.token), 100);
        assert_eq!(f.engine.gateway().balance_of(&paid, &f.token), 0);
        assert!(!f.engine.gateway().in_unit_of_work());
        assert_eq!(f.engine.sink().len(), 1);
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let mut f = setup();
        let sig = sign_deposit(&f.key, &f.token, 0);
        assert!(matches!(
            f.engine.deposit(&f.user, &f.token, 0, sig.as_bytes()),
            Err(LedgerError::ZeroAmount)
        ));

        deposit(&mut f, 100);
        let batch = TransferBatch::new(vec![
            TransferLine::new(Address::new([0xd1; 20]), 10, f.token),
            TransferLine::new(Address::new([0xd2; 20]), 0, f.token),
        ]);
        let sig = sign_batch(&f.key, &batch);
        assert!(matches!(
            f.engine.transfer(&f.user, &batch, sig.as_bytes()),
            Err(LedgerError::ZeroAmount)
        ));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
    }

    #[test]
    fn test_transfer_reordered_batch_rejected() {
        let mut f = setup();
        deposit(&mut f, 100);
        let a = TransferLine::new(Address::new([0xd1; 20]), 10, f.token);
        let b = TransferLine::new(Address::new([0xd2; 20]), 20, f.token);
        let sig = sign_batch(&f.key, &TransferBatch::new(vec![a, b]));

        let reordered = TransferBatch::new(vec![b, a]);
        let result = f.engine.transfer(&f.user, &reordered, sig.as_bytes());
        assert!(matches!(result, Err(LedgerError::InvalidSignature(_))));
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 100);
    }

    #[test]
    fn test_transfer_emits_one_event_per_line() {
        let mut f = setup();
        deposit(&mut f, 100);
        let batch = TransferBatch::new(vec![
            TransferLine::new(Address::new([0xd1; 20]), 10, f.token),
            TransferLine::new(Address::new([0xd2; 20]), 20, f.token),
            TransferLine::new(Address::new([0xd1; 20]), 30, f.token),
        ]);
        let sig = sign_batch(&f.key, &batch);
        f.engine.sink_mut().drain();

        f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap();

        let amounts: Vec<Amount> = f
            .engine
            .sink()
            .events()
            .iter()
            .map(|e| match e {
                LedgerEvent::TransferExecuted { amount, .. } => *amount,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(amounts, vec![10, 20, 30]);
        assert_eq!(f.engine.balance_of(&f.user, &f.token), 40);
    }

    #[test]
    fn test_batch_limit_enforced() {
        let mut f = setup();
        let mut config = LedgerConfig::new(f.ledger);
        config.max_batch_lines = 1;
        let (store, tokens, log) = f.engine.into_parts();
        f.engine = TransferEngine::with_store(config, store, tokens, log).unwrap();

        let line = TransferLine::new(Address::new([0xd1; 20]), 1, f.token);
        let batch = TransferBatch::new(vec![line, line]);
        let sig = sign_batch(&f.key, &batch);

        assert!(matches!(
            f.engine.transfer(&f.user, &batch, sig.as_bytes()),
            Err(LedgerError::BatchTooLarge { lines: 2, limit: 1 })
        ));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut f = setup();
        let batch = TransferBatch::default();
        let sig = sign_batch(&f.key, &batch);

        f.engine.transfer(&f.user, &batch, sig.as_bytes()).unwrap();
        assert!(f.engine.sink().is_empty());
    }

    #[test]
    fn test_persist_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = setup();
        let config = LedgerConfig::new(f.ledger).with_state_path(dir.path().join("balances.json"));
        let (store, tokens, log) = f.engine.into_parts();
        f.engine = TransferEngine::with_store(config.clone(), store, tokens, log).unwrap();

        deposit(&mut f, 100);
        f.engine.persist().unwrap();

        let reopened =
            TransferEngine::open(config, InMemoryTokens::new(), EventLog::new()).unwrap();
        assert_eq!(reopened.balance_of(&f.user, &f.token), 100);
    }

    #[test]
    fn test_persist_without_path_fails() {
        let f = setup();
        assert!(matches!(f.engine.persist(), Err(LedgerError::Config(_))));
    }
}
