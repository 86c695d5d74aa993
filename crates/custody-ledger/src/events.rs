//! Ledger events
//!
//! Events are handed to an `EventSink` only after the operation that
//! produced them has committed.

use serde::{Deserialize, Serialize};

use custody_core::{Address, Amount, Asset, Principal};

/// Observable outcome of a committed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Tokens pulled into custody and credited
    DepositExecuted {
        principal: Principal,
        asset: Asset,
        amount: Amount,
    },

    /// One transfer line debited and pushed
    TransferExecuted {
        principal: Principal,
        recipient: Address,
        asset: Asset,
        amount: Amount,
    },
}

/// Receives committed events
pub trait EventSink {
    fn emit(&mut self, event: LedgerEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: LedgerEvent) {
        (**self).emit(event)
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take all recorded events
    pub fn drain(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }
}
