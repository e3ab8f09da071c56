//! Planned transfer legs

use std::future::Future;
use std::sync::Arc;

use super::executor::TransferExecutor;
use crate::error::SettlementError;
use crate::ledger::PoolKind;
use crate::money::{Cents, cents_to_decimal};
use crate::transaction::{ConfirmedTransaction, TransferTag};

/// Data of one leg of a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub pool: PoolKind,
    pub amount: Cents,
    pub sender_memo: String,
    pub recipient_memo: String,
    /// Currency symbol, e.g. "LEM"
    pub currency: String,
    pub tag: TransferTag,
    /// Bare destination address
    pub destination: String,
    /// Display name of the recipient, copied on the confirmed record
    pub recipient_name: Option<String>,
}

impl TransferLeg {
    pub fn new(
        pool: PoolKind,
        amount: Cents,
        destination: &str,
        currency: &str,
        sender_memo: &str,
        recipient_memo: &str,
    ) -> Self {
        Self {
            pool,
            amount,
            sender_memo: sender_memo.to_string(),
            recipient_memo: recipient_memo.to_string(),
            currency: currency.to_string(),
            tag: TransferTag::for_pool(pool),
            destination: destination.to_string(),
            recipient_name: None,
        }
    }

    pub fn with_recipient_name(mut self, name: Option<String>) -> Self {
        self.recipient_name = name;
        self
    }
}

/// A leg bound to the executor that will send it.
///
/// Executing consumes the plan, so a leg can only be sent once.
pub struct PlannedTransfer {
    leg: TransferLeg,
    executor: Arc<TransferExecutor>,
}

impl PlannedTransfer {
    pub fn new(leg: TransferLeg, executor: Arc<TransferExecutor>) -> Self {
        Self { leg, executor }
    }

    pub fn leg(&self) -> &TransferLeg {
        &self.leg
    }

    pub fn pool(&self) -> PoolKind {
        self.leg.pool
    }

    pub fn amount(&self) -> Cents {
        self.leg.amount
    }

    /// Submit and wait for confirmation
    pub async fn execute(self) -> Result<ConfirmedTransaction, SettlementError> {
        self.executor.execute(self.leg).await
    }

    /// Like [`Self::execute`], giving up the confirmation wait when `cancel`
    /// completes first.
    pub async fn execute_with_cancel<C>(
        self,
        cancel: C,
    ) -> Result<ConfirmedTransaction, SettlementError>
    where
        C: Future<Output = ()>,
    {
        self.executor.execute_with_cancel(self.leg, cancel).await
    }
}

impl std::fmt::Debug for PlannedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedTransfer")
            .field("pool", &self.leg.pool)
            .field("amount", &cents_to_decimal(self.leg.amount))
            .field("tag", &self.leg.tag)
            .field("destination", &self.leg.destination)
            .finish_non_exhaustive()
    }
}
