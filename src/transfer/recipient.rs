//! Transfer recipients
//!
//! A recipient is a destination address seen from one sender account. It
//! turns a requested amount into verified legs, sends them in order and
//! reports what went through.

use std::sync::Arc;
use tracing::{info, warn};

use super::executor::TransferExecutor;
use super::split::Split;
use super::types::{PlannedTransfer, TransferLeg};
use super::verifier::SettlementVerifier;
use crate::account::{STATUS_ACTIVE, WalletAccount, account_type};
use crate::config::{LedgerConfig, TransferConfig};
use crate::error::SettlementError;
use crate::ledger::{
    AccountActivation, AccountParams, Contact, CreationDiscard, IdentityService, PoolKind, WalletUnlocker,
    normalize_address,
};
use crate::money::{Cents, signed_decimal_to_cents};
use crate::poll::{PollOutcome, poll_until};
use crate::transaction::ConfirmedTransaction;

/// Account type written when validating a new account
pub const VALIDATED_ACCOUNT_TYPE: i64 = 0;

pub struct Recipient {
    address: String,
    contact: Contact,
    sender: Arc<WalletAccount>,
    verifier: SettlementVerifier,
    executor: Arc<TransferExecutor>,
    identity: Arc<dyn IdentityService>,
    unlocker: Arc<dyn WalletUnlocker>,
    ledger: LedgerConfig,
    transfer: TransferConfig,
}

impl Recipient {
    pub fn new(
        address: &str,
        contact: Contact,
        sender: Arc<WalletAccount>,
        identity: Arc<dyn IdentityService>,
        unlocker: Arc<dyn WalletUnlocker>,
        ledger: LedgerConfig,
        transfer: TransferConfig,
    ) -> Self {
        let verifier = SettlementVerifier::new(sender.view().clone(), ledger.clone());
        let executor = Arc::new(TransferExecutor::new(
            sender.address(),
            sender.record().message_key.clone(),
            sender.view().clone(),
            unlocker.clone(),
            ledger.clone(),
            transfer.clone(),
        ));
        Self {
            address: normalize_address(address),
            contact,
            sender,
            verifier,
            executor,
            identity,
            unlocker,
            ledger,
            transfer,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub async fn symbol(&self) -> Result<String, SettlementError> {
        self.sender.symbol().await
    }

    /// Id of the wallet on the identity service side, e.g. `ledger:ab12..`
    pub fn wallet_internal_id(&self) -> String {
        let scheme = self
            .ledger
            .backend_id
            .split_once(':')
            .map_or(self.ledger.backend_id.as_str(), |(scheme, _)| scheme);
        format!("{}:{}", scheme, self.address)
    }

    async fn collateralized_only(&self) -> Result<bool, SettlementError> {
        if self.verifier.is_technical_recipient(&self.address) {
            return Ok(true);
        }
        Ok(!self.sender.has_mutual_credit().await?)
    }

    /// Verify `amount` and turn it into legs, mutual credit first.
    pub async fn plan(
        &self,
        amount: Cents,
        sender_memo: &str,
        recipient_memo: &str,
    ) -> Result<Vec<PlannedTransfer>, SettlementError> {
        let split = if self.collateralized_only().await? {
            if amount <= 0 {
                return Err(if amount == 0 {
                    SettlementError::NullAmount
                } else {
                    SettlementError::NegativeAmount(amount)
                });
            }
            self.verifier
                .prepare_transfer(self.sender.address(), amount)
                .await?;
            Split {
                collateralized: amount,
                mutual_credit: 0,
            }
        } else {
            self.verifier
                .verified_split(self.sender.address(), true, &self.address, amount)
                .await?
        };

        let symbol = self.sender.symbol().await?;
        let legs = [
            (PoolKind::MutualCredit, split.mutual_credit),
            (PoolKind::Collateralized, split.collateralized),
        ];
        Ok(legs
            .into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(pool, amount)| {
                let leg = TransferLeg::new(
                    pool,
                    amount,
                    &self.address,
                    &symbol,
                    sender_memo,
                    recipient_memo,
                )
                .with_recipient_name(self.contact.public_name.clone());
                PlannedTransfer::new(leg, self.executor.clone())
            })
            .collect())
    }

    /// Transfer `amount` (decimal string) to this recipient.
    ///
    /// `recipient_memo` defaults to `sender_memo`. Legs run one after the
    /// other; when a leg fails after an earlier one was confirmed the error
    /// is `PartiallyApplied` with the confirmed legs.
    pub async fn transfer(
        &self,
        amount: &str,
        sender_memo: &str,
        recipient_memo: Option<&str>,
    ) -> Result<Vec<ConfirmedTransaction>, SettlementError> {
        let cents = signed_decimal_to_cents(amount)?;
        let recipient_memo = recipient_memo.unwrap_or(sender_memo);
        let plan = self.plan(cents, sender_memo, recipient_memo).await?;

        info!(
            sender = %self.sender.address(),
            recipient = %self.address,
            amount = %amount,
            legs = plan.len(),
            "Transfer planned"
        );

        let mut completed = Vec::with_capacity(plan.len());
        for planned in plan {
            match planned.execute().await {
                Ok(tx) => completed.push(tx),
                Err(failure) if completed.is_empty() => return Err(failure),
                Err(failure) => {
                    warn!(
                        recipient = %self.address,
                        confirmed_legs = completed.len(),
                        code = failure.code(),
                        "Transfer partially applied"
                    );
                    return Err(SettlementError::PartiallyApplied {
                        completed,
                        failure: Box::new(failure),
                    });
                }
            }
        }
        Ok(completed)
    }

    /// Collateralized preflight for `amount` (decimal string)
    pub async fn prepare_transfer(&self, amount: &str) -> Result<(), SettlementError> {
        let cents = signed_decimal_to_cents(amount)?;
        self.verifier
            .prepare_transfer(self.sender.address(), cents)
            .await
    }

    /// Activate this recipient's account on the ledger and notify the
    /// identity service.
    pub async fn validate_creation(&self) -> Result<(), SettlementError> {
        if !self.sender.has_user_account_validation_rights().await? {
            return Err(SettlementError::PermissionDenied(
                "validation rights are required to validate a wallet".into(),
            ));
        }

        let manager = self.sender.manager().await?;
        let reader = manager.reader.as_ref();
        let params = AccountParams {
            status: STATUS_ACTIVE,
            account_type: VALIDATED_ACCOUNT_TYPE,
            limit_above: self.transfer.validation_limit_above,
            limit_below: self.transfer.validation_limit_below,
        };

        if reader.account_status(&self.address).await? != STATUS_ACTIVE {
            let wallet = self.unlocker.unlock(self.sender.address()).await?;
            manager
                .writer
                .set_account_param(&wallet, &self.address, params)
                .await?;

            let address = self.address.as_str();
            let outcome = poll_until(
                self.transfer.poll_interval(),
                self.transfer.confirmation_timeout(),
                move || async move {
                    let status = reader.account_status(address).await?;
                    Ok::<_, SettlementError>((status == STATUS_ACTIVE).then_some(status))
                },
            )
            .await?;
            if let PollOutcome::TimedOut { waited } = outcome {
                warn!(address = %self.address, waited_ms = waited.as_millis() as u64, "Account status did not change in time");
                return Err(SettlementError::Timeout(format!(
                    "account {} not active after {} ms",
                    self.address,
                    waited.as_millis()
                )));
            }
            info!(address = %self.address, "Account validated");
        } else {
            info!(address = %self.address, "Account already validated, notifying identity service");
        }

        self.identity
            .activate_account(&AccountActivation {
                account_id: self.wallet_internal_id(),
                recipient_id: self.contact.id,
                account_type: params.account_type,
                credit_min: params.limit_below,
                credit_max: params.limit_above,
            })
            .await?;
        Ok(())
    }

    /// Withdraw this recipient's pending account creation request
    pub async fn discard_create_request(&self) -> Result<(), SettlementError> {
        self.identity
            .discard_creations(&[CreationDiscard {
                recipient_id: self.contact.id,
                address: self.address.clone(),
            }])
            .await?;
        info!(address = %self.address, "Account creation request discarded");
        Ok(())
    }

    pub async fn is_business_for_finance_backend(&self) -> Result<bool, SettlementError> {
        let manager = self.sender.manager().await?;
        let kind = self
            .sender
            .view()
            .check(manager.reader.account_type(&self.address).await)?;
        Ok(kind == account_type::BUSINESS)
    }
}
