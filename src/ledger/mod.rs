//! Ledger Collaborators
//!
//! Contracts for everything the engine talks to but does not implement:
//! the ledger node (read and write RPC), memo ciphering, currency server
//! discovery, the identity service of the host framework and the wallet
//! unlocker.
//!
//! All remote calls are async and fallible. Implementations must be
//! `Send + Sync` so a single instance can be shared behind an `Arc`.

pub mod error;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
pub mod types;

pub use error::{IdentityError, LedgerError, WalletError};
pub use types::{
    AccountActivation, AccountParams, BlockRef, Contact, CreationDiscard, CurrencyProfile,
    MessageKey, PendingTopUp, PoolKind, RawTransaction, SigningHandle, normalize_address,
    prefixed_address,
};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::connection::CurrencyManager;
use crate::money::Cents;

/// Read side of the ledger node
///
/// Balances and limits are returned as decimal strings exactly as the node
/// formats them; conversion to cents is the caller's job.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn collateralized_balance(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<String, LedgerError>;

    async fn mutual_credit_balance(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<String, LedgerError>;

    /// Maximum allowed negative balance of the mutual-credit pool
    async fn limit_below(&self, address: &str, block: BlockRef) -> Result<String, LedgerError>;

    /// Maximum allowed positive balance of the mutual-credit pool
    async fn limit_above(&self, address: &str, block: BlockRef) -> Result<String, LedgerError>;

    async fn account_type(&self, address: &str) -> Result<i64, LedgerError>;

    async fn account_status(&self, address: &str) -> Result<i64, LedgerError>;

    /// One page of history, newest first
    async fn transaction_list(
        &self,
        address: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawTransaction>, LedgerError>;

    /// Whole history between two epoch-second bounds
    async fn export_transaction_list(
        &self,
        address: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<RawTransaction>, LedgerError>;

    /// Fails with `NotFound` until the transaction is known to the node
    async fn transaction_info(&self, tx_id: &str) -> Result<RawTransaction, LedgerError>;

    /// Most recently confirmed block number
    async fn current_block(&self) -> Result<u64, LedgerError>;

    async fn message_key(&self, address: &str) -> Result<Option<MessageKey>, LedgerError>;
}

/// Write side of the ledger node
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Returns the transaction id on acceptance
    async fn transfer_collateralized(
        &self,
        wallet: &SigningHandle,
        dest_address: &str,
        amount: Cents,
        memo: &str,
    ) -> Result<String, LedgerError>;

    /// Returns the transaction id on acceptance
    async fn transfer_mutual_credit(
        &self,
        wallet: &SigningHandle,
        dest_address: &str,
        amount: Cents,
        memo: &str,
    ) -> Result<String, LedgerError>;

    async fn set_account_param(
        &self,
        wallet: &SigningHandle,
        address: &str,
        params: AccountParams,
    ) -> Result<String, LedgerError>;
}

/// Memo ciphering, synchronous and local
pub trait MemoCipher: Send + Sync {
    fn encrypt(
        &self,
        sender_key: Option<&str>,
        recipient_key: Option<&str>,
        sender_memo: &str,
        recipient_memo: &str,
    ) -> Result<String, LedgerError>;

    /// Decrypts the memo of `raw` for the owner `address`
    fn decrypt(
        &self,
        raw: &RawTransaction,
        address: &str,
        message_key: &MessageKey,
    ) -> Result<String, LedgerError>;
}

/// Server discovery and configuration load for a currency
#[async_trait]
pub trait CurrencyDiscovery: Send + Sync {
    async fn connect(&self, server: &str) -> Result<CurrencyManager, LedgerError>;
}

/// Identity service of the host framework
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Keys of the result are bare (un-prefixed) addresses
    async fn resolve_contacts(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, Contact>, IdentityError>;

    /// `true` means the reconversion is still being processed
    async fn reconversion_status(
        &self,
        tx_ids: &[String],
    ) -> Result<HashMap<String, bool>, IdentityError>;

    async fn activate_account(&self, activation: &AccountActivation) -> Result<(), IdentityError>;

    /// Withdraw account creation requests that will not be validated
    async fn discard_creations(&self, discards: &[CreationDiscard]) -> Result<(), IdentityError>;

    /// Payment URL crediting `amount` to the collateralized pool of `address`
    async fn credit_url(&self, address: &str, amount: Cents) -> Result<String, IdentityError>;

    async fn pending_top_ups(&self, address: &str) -> Result<Vec<PendingTopUp>, IdentityError>;
}

/// Provides a decrypted signing handle for a wallet address
#[async_trait]
pub trait WalletUnlocker: Send + Sync {
    async fn unlock(&self, address: &str) -> Result<SigningHandle, WalletError>;
}
