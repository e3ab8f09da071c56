//! Transfer Executor
//!
//! Sends one leg to the ledger and waits for it to be confirmed.
//!
//! Leg lifecycle: `BUILT -> SUBMITTED -> AWAITING_CONFIRMATION -> CONFIRMED`,
//! any step may end in `FAILED`. A leg that reached `SUBMITTED` may have been
//! applied by the ledger even when confirmation never arrives, so a missing
//! confirmation is reported and never retried.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::LegState;
use super::types::TransferLeg;
use crate::account::LedgerView;
use crate::config::{LedgerConfig, TransferConfig};
use crate::error::SettlementError;
use crate::ledger::{
    BlockRef, LedgerError, MessageKey, PoolKind, WalletUnlocker, prefixed_address,
};
use crate::money::{cents_to_decimal, ensure_safe};
use crate::poll::{PollOutcome, poll_until};
use crate::transaction::{ConfirmedTransaction, Direction};

const INCOMPATIBLE_AMOUNT: &str = "Incompatible_Amount";
const INSUFFICIENT_COLLATERALIZED_BALANCE: &str = "InsufficientNantBalance";
const ACCOUNT_LOCKED: &str = "Account_Locked_Error";

/// A leg accepted by the ledger node, not yet confirmed
#[derive(Debug, Clone)]
pub struct SubmittedLeg {
    pub tx_hash: String,
    pub leg: TransferLeg,
}

/// `0x` followed by 64 hex digits
pub fn is_transaction_id(s: &str) -> bool {
    s.len() == 66 && s.starts_with("0x") && hex::decode(&s[2..]).is_ok()
}

/// Map a submission failure to the settlement taxonomy.
///
/// The insufficient-collateral case is handled by the caller, which needs a
/// balance read to fill the safe-amount hint.
pub fn map_submission_error(err: LedgerError) -> SettlementError {
    match err {
        LedgerError::Api { message, data } if message == INCOMPATIBLE_AMOUNT => {
            SettlementError::RefusedAmount(data)
        }
        LedgerError::Api { message, .. } if message == ACCOUNT_LOCKED => {
            SettlementError::InactiveAccount
        }
        other => SettlementError::Ledger(other),
    }
}

/// Sends legs on behalf of one sender account
pub struct TransferExecutor {
    sender: String,
    sender_key: Option<MessageKey>,
    view: LedgerView,
    unlocker: Arc<dyn WalletUnlocker>,
    ledger: LedgerConfig,
    transfer: TransferConfig,
}

impl TransferExecutor {
    pub fn new(
        sender: &str,
        sender_key: Option<MessageKey>,
        view: LedgerView,
        unlocker: Arc<dyn WalletUnlocker>,
        ledger: LedgerConfig,
        transfer: TransferConfig,
    ) -> Self {
        Self {
            sender: sender.to_string(),
            sender_key,
            view,
            unlocker,
            ledger,
            transfer,
        }
    }

    /// Submit `leg` and wait for its confirmation
    pub async fn execute(&self, leg: TransferLeg) -> Result<ConfirmedTransaction, SettlementError> {
        let submitted = self.submit(leg).await?;
        self.confirm(submitted).await
    }

    /// Submit `leg`, then wait for confirmation until `cancel` completes.
    ///
    /// Cancelling only stops the wait: the leg may still be applied.
    pub async fn execute_with_cancel<C>(
        &self,
        leg: TransferLeg,
        cancel: C,
    ) -> Result<ConfirmedTransaction, SettlementError>
    where
        C: Future<Output = ()>,
    {
        let submitted = self.submit(leg).await?;
        let tx_hash = submitted.tx_hash.clone();
        tokio::select! {
            result = self.confirm(submitted) => result,
            _ = cancel => {
                warn!(tx = %tx_hash, state = %LegState::Failed, "Confirmation wait abandoned");
                Err(SettlementError::ConfirmationAbandoned { tx_hash })
            }
        }
    }

    /// Send `leg` to the ledger node
    pub async fn submit(&self, leg: TransferLeg) -> Result<SubmittedLeg, SettlementError> {
        if leg.amount == 0 {
            return Err(SettlementError::NullAmount);
        }
        if leg.amount < 0 {
            return Err(SettlementError::NegativeAmount(leg.amount));
        }
        ensure_safe(leg.amount)?;

        debug!(
            state = %LegState::Built,
            pool = %leg.pool,
            amount = %cents_to_decimal(leg.amount),
            dest = %leg.destination,
            "Preparing transfer leg"
        );

        let manager = self.view.manager().await?;
        let recipient_key = self.view.check(
            manager
                .reader
                .message_key(&prefixed_address(&leg.destination))
                .await,
        )?;
        let memo = manager.memo.encrypt(
            self.sender_key.as_ref().map(|k| k.public.as_str()),
            recipient_key.as_ref().map(|k| k.public.as_str()),
            &leg.sender_memo,
            &leg.recipient_memo,
        )?;
        let wallet = self.unlocker.unlock(&self.sender).await?;

        let result = match leg.pool {
            PoolKind::Collateralized => {
                manager
                    .writer
                    .transfer_collateralized(&wallet, &leg.destination, leg.amount, &memo)
                    .await
            }
            PoolKind::MutualCredit => {
                manager
                    .writer
                    .transfer_mutual_credit(&wallet, &leg.destination, leg.amount, &memo)
                    .await
            }
        };
        // Balances may have moved whatever the outcome
        self.view.invalidate();

        let tx_hash = match result {
            Ok(tx_hash) => tx_hash,
            Err(LedgerError::Api { message, data })
                if message == INCOMPATIBLE_AMOUNT && data == INSUFFICIENT_COLLATERALIZED_BALANCE =>
            {
                warn!(state = %LegState::Failed, pool = %leg.pool, "Ledger refused leg: insufficient collateralized balance");
                let max_transferable = match self
                    .view
                    .balance(PoolKind::Collateralized, &self.sender, BlockRef::Pending)
                    .await
                {
                    Ok(balance) => balance.max(0),
                    Err(e) => {
                        warn!(sender = %self.sender, code = e.code(), error = %e, "Balance unavailable after refused leg");
                        return Err(e);
                    }
                };
                return Err(SettlementError::InsufficientBalance { max_transferable });
            }
            Err(e) => {
                let err = map_submission_error(e);
                warn!(state = %LegState::Failed, pool = %leg.pool, code = err.code(), error = %err, "Ledger refused leg");
                return Err(err);
            }
        };

        if !is_transaction_id(&tx_hash) {
            error!(state = %LegState::Failed, response = %tx_hash, "Unexpected transfer response (not a transaction id)");
            return Err(SettlementError::MalformedResponse(format!(
                "not a transaction id: {}",
                tx_hash
            )));
        }

        info!(
            state = %LegState::Submitted,
            tx = %tx_hash,
            pool = %leg.pool,
            amount = %cents_to_decimal(leg.amount),
            "Transfer leg submitted"
        );
        Ok(SubmittedLeg { tx_hash, leg })
    }

    /// Poll the ledger until `submitted` is known, or the timeout passes
    pub async fn confirm(
        &self,
        submitted: SubmittedLeg,
    ) -> Result<ConfirmedTransaction, SettlementError> {
        let SubmittedLeg { tx_hash, leg } = submitted;
        debug!(state = %LegState::AwaitingConfirmation, tx = %tx_hash, "Waiting for confirmation");

        let manager = self.view.manager().await?;
        let reader = manager.reader.as_ref();
        let tx = tx_hash.as_str();
        let outcome = poll_until(
            self.transfer.poll_interval(),
            self.transfer.confirmation_timeout(),
            move || async move {
                match reader.transaction_info(tx).await {
                    Ok(raw) => Ok::<_, SettlementError>(Some(raw)),
                    Err(e) => {
                        debug!(tx = %tx, error = %e, "Transaction info not available yet");
                        Ok(None)
                    }
                }
            },
        )
        .await?;

        let raw = match outcome {
            PollOutcome::Ready(raw) => raw,
            PollOutcome::TimedOut { waited } => {
                let waited_ms = waited.as_millis() as u64;
                error!(
                    state = %LegState::Failed,
                    tx = %tx_hash,
                    waited_ms,
                    "Payment confirmation missing"
                );
                return Err(SettlementError::PaymentConfirmationMissing { tx_hash, waited_ms });
            }
        };

        let mut confirmed = ConfirmedTransaction::from_raw(
            raw,
            &self.sender,
            Direction::Outbound,
            &leg.currency,
            &self.ledger,
        );
        confirmed.tags = vec![leg.tag];
        confirmed.counterparty_name = leg.recipient_name.clone();
        confirmed.reconversion_pending = false;

        info!(state = %LegState::Confirmed, tx = %tx_hash, pool = %leg.pool, "Transfer leg confirmed");
        Ok(confirmed)
    }
}
