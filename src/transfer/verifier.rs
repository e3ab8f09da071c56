//! Settlement Verifier
//!
//! A split is only accepted when it is the same against the pending view of
//! the ledger (including in-flight transactions) and against the latest
//! confirmed block. Any difference means a concurrent transaction is about
//! to change the balances the split relies on, and the transfer is refused.
//! Nothing is locked on the ledger side.

use tracing::{debug, warn};

use super::split::{Split, compute_split};
use crate::account::LedgerView;
use crate::config::LedgerConfig;
use crate::error::SettlementError;
use crate::ledger::{BlockRef, PoolKind};
use crate::money::{Cents, decimal_to_cents, ensure_safe, has_exact_fraction};

pub struct SettlementVerifier {
    view: LedgerView,
    ledger: LedgerConfig,
}

impl SettlementVerifier {
    pub fn new(view: LedgerView, ledger: LedgerConfig) -> Self {
        Self { view, ledger }
    }

    /// Whether transfers to `recipient` bypass the mutual-credit pool
    pub fn is_technical_recipient(&self, recipient: &str) -> bool {
        self.ledger.is_technical(recipient)
    }

    /// Split computed from the balances visible at `block`
    pub async fn split_at(
        &self,
        sender: &str,
        sender_has_credit: bool,
        recipient: &str,
        amount: Cents,
        block: BlockRef,
    ) -> Result<Split, SettlementError> {
        let technical = self.is_technical_recipient(recipient);
        if !sender_has_credit || technical {
            let pools = self.view.sender_pools(sender, block, false).await?;
            return compute_split(amount, &pools, None, technical);
        }
        let (pools, capacity) = tokio::try_join!(
            self.view.sender_pools(sender, block, true),
            self.view.receiver_capacity(recipient, block),
        )?;
        compute_split(amount, &pools, Some(capacity), false)
    }

    /// Split that holds in both the pending and the latest confirmed view.
    ///
    /// # Errors
    /// * Feasibility errors of either computation
    /// * `UnsafeSplit` - the two views disagree
    pub async fn verified_split(
        &self,
        sender: &str,
        sender_has_credit: bool,
        recipient: &str,
        amount: Cents,
    ) -> Result<Split, SettlementError> {
        let pending = self
            .split_at(sender, sender_has_credit, recipient, amount, BlockRef::Pending)
            .await?;

        let block = self.view.current_block().await?;
        let latest = self
            .split_at(
                sender,
                sender_has_credit,
                recipient,
                amount,
                BlockRef::Number(block),
            )
            .await?;

        if pending != latest {
            warn!(%pending, %latest, block, "Pending and confirmed splits differ");
            return Err(SettlementError::UnsafeSplit { pending, latest });
        }
        debug!(split = %pending, block, "Split verified");
        Ok(pending)
    }

    /// Collateralized-pool preflight.
    ///
    /// Fails when the confirmed balance is malformed, when the amount is
    /// above the pending balance (`InsufficientBalance`), or above the
    /// confirmed one (`UnsafeBalance`).
    pub async fn prepare_transfer(&self, sender: &str, amount: Cents) -> Result<(), SettlementError> {
        ensure_safe(amount)?;
        let block = self.view.current_block().await?;
        let (confirmed_raw, nominal) = tokio::try_join!(
            self.view
                .raw_balance(PoolKind::Collateralized, sender, BlockRef::Number(block)),
            self.view
                .balance(PoolKind::Collateralized, sender, BlockRef::Pending),
        )?;

        if !has_exact_fraction(&confirmed_raw) {
            return Err(SettlementError::MalformedResponse(format!(
                "invalid amount returned by balance read: {}",
                confirmed_raw
            )));
        }
        let confirmed = decimal_to_cents(&confirmed_raw).map_err(|e| {
            SettlementError::MalformedResponse(format!(
                "invalid amount returned by balance read: {} ({})",
                confirmed_raw, e
            ))
        })?;
        ensure_safe(nominal)?;

        if amount > nominal {
            return Err(SettlementError::InsufficientBalance {
                max_transferable: nominal.max(0),
            });
        }
        if amount > confirmed {
            warn!(sender = %sender, confirmed, nominal, "Pending transactions make the balance unsafe");
            return Err(SettlementError::UnsafeBalance { confirmed });
        }
        Ok(())
    }
}
