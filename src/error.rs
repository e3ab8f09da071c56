//! Settlement Error Types
//!
//! One taxonomy for every failure surfaced by the engine. Feasibility
//! failures carry a safe-amount hint so the caller can offer a reduced
//! transfer; none of them are retried by the engine itself.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::ledger::{IdentityError, LedgerError, WalletError};
use crate::money::{Cents, MoneyError, cents_to_decimal};
use crate::transaction::ConfirmedTransaction;
use crate::transfer::split::Split;

/// A transient connectivity failure for one connection attempt.
///
/// Shared through `Arc`: every caller that observed the same failed attempt
/// receives the same instance, which callers can use to deduplicate logging
/// and retry bookkeeping (`Arc::ptr_eq`).
#[derive(Debug, PartialEq, Eq)]
pub struct BackendOutage {
    pub key: String,
    pub attempt: u64,
    pub reason: String,
}

impl fmt::Display for BackendOutage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backend '{}' has no available endpoint (attempt {}): {}",
            self.key, self.attempt, self.reason
        )
    }
}

/// Settlement error taxonomy
#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Contract violations ===
    #[error("Malformed amount: {0}")]
    MalformedAmount(String),

    #[error("Malformed ledger response: {0}")]
    MalformedResponse(String),

    // === Feasibility ===
    #[error("Insufficient balance (max transferable: {})", cents_to_decimal(*.max_transferable))]
    InsufficientBalance { max_transferable: Cents },

    #[error("Recipient capacity exceeded (max transferable: {})", cents_to_decimal(*.max_transferable))]
    RecipientCapacityExceeded { max_transferable: Cents },

    #[error("Unsafe balance due to pending transactions (confirmed: {})", cents_to_decimal(*.confirmed))]
    UnsafeBalance { confirmed: Cents },

    #[error("Unsafe split: pending view {pending} differs from confirmed view {latest}")]
    UnsafeSplit { pending: Split, latest: Split },

    // === Connectivity ===
    #[error("Backend unavailable: {0}")]
    BackendUnavailableTransient(Arc<BackendOutage>),

    // === Ledger-side business rejections ===
    #[error("Amount refused by ledger (given reason: {0})")]
    RefusedAmount(String),

    #[error("You can't transfer from/to an inactive account")]
    InactiveAccount,

    #[error("Null amount for transfer is invalid")]
    NullAmount,

    #[error("Negative amounts for transfer are invalid (amount: {})", cents_to_decimal(*.0))]
    NegativeAmount(Cents),

    // === Ambiguous outcomes ===
    #[error("No confirmation for transaction {tx_hash} within {waited_ms} ms")]
    PaymentConfirmationMissing { tx_hash: String, waited_ms: u64 },

    #[error("Confirmation wait for transaction {tx_hash} was abandoned")]
    ConfirmationAbandoned { tx_hash: String },

    #[error("Transfer partially applied ({} leg(s) confirmed): {failure}", .completed.len())]
    PartiallyApplied {
        completed: Vec<ConfirmedTransaction>,
        failure: Box<SettlementError>,
    },

    // === Usage errors ===
    #[error("Unsupported partial date boundaries")]
    UnsupportedPartialRange,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Current user has no wallet account")]
    NoWalletAccount,

    #[error("Current user has more than one wallet account")]
    MultipleWalletAccounts,

    #[error("Unsupported retrieval of pending top ups on multiple creditable accounts")]
    MultipleCreditableAccounts,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // === Collaborator failures ===
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Identity service error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

impl SettlementError {
    /// Stable error code for callers and logs
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::MalformedAmount(_) => "MALFORMED_AMOUNT",
            SettlementError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            SettlementError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettlementError::RecipientCapacityExceeded { .. } => "RECIPIENT_CAPACITY_EXCEEDED",
            SettlementError::UnsafeBalance { .. } => "UNSAFE_BALANCE",
            SettlementError::UnsafeSplit { .. } => "UNSAFE_SPLIT",
            SettlementError::BackendUnavailableTransient(_) => "BACKEND_UNAVAILABLE_TRANSIENT",
            SettlementError::RefusedAmount(_) => "REFUSED_AMOUNT",
            SettlementError::InactiveAccount => "INACTIVE_ACCOUNT",
            SettlementError::NullAmount => "NULL_AMOUNT",
            SettlementError::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            SettlementError::PaymentConfirmationMissing { .. } => "PAYMENT_CONFIRMATION_MISSING",
            SettlementError::ConfirmationAbandoned { .. } => "CONFIRMATION_ABANDONED",
            SettlementError::PartiallyApplied { .. } => "PARTIALLY_APPLIED",
            SettlementError::UnsupportedPartialRange => "UNSUPPORTED_PARTIAL_RANGE",
            SettlementError::InvalidQuery(_) => "INVALID_QUERY",
            SettlementError::NoWalletAccount => "NO_WALLET_ACCOUNT",
            SettlementError::MultipleWalletAccounts => "MULTIPLE_WALLET_ACCOUNTS",
            SettlementError::MultipleCreditableAccounts => "MULTIPLE_CREDITABLE_ACCOUNTS",
            SettlementError::PermissionDenied(_) => "PERMISSION_DENIED",
            SettlementError::Timeout(_) => "TIMEOUT",
            SettlementError::Ledger(_) => "LEDGER_ERROR",
            SettlementError::Identity(_) => "IDENTITY_ERROR",
            SettlementError::Wallet(_) => "WALLET_ERROR",
        }
    }

    /// Only connectivity failures may be retried, after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::BackendUnavailableTransient(_))
    }

    /// Largest amount the caller can safely retry with, when known
    pub fn safe_amount(&self) -> Option<Cents> {
        match self {
            SettlementError::InsufficientBalance { max_transferable }
            | SettlementError::RecipientCapacityExceeded { max_transferable } => {
                Some(*max_transferable)
            }
            SettlementError::UnsafeBalance { confirmed } => Some(*confirmed),
            _ => None,
        }
    }
}

impl From<MoneyError> for SettlementError {
    fn from(e: MoneyError) -> Self {
        SettlementError::MalformedAmount(e.to_string())
    }
}
