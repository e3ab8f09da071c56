//! Top-ups of the collateralized pool
//!
//! A credit request is a pending top-up submitted through the identity
//! service, to be validated by an account holding credit request
//! validation rights.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::WalletAccount;
use crate::error::SettlementError;
use crate::ledger::normalize_address;
use crate::money::{Cents, decimal_to_cents};

/// Credit request as listed by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequestRecord {
    pub id: i64,
    /// Decimal string with two fraction digits
    pub amount: String,
    /// Backend kind and address of the account to credit
    #[serde(rename = "monujo_backend")]
    pub backend: (String, String),
}

pub struct CreditRequest {
    id: i64,
    amount: Cents,
    address: String,
    validator: Arc<WalletAccount>,
}

impl CreditRequest {
    /// `validator` is the current user's account, the one whose rights
    /// decide whether the request can be validated
    pub fn new(record: CreditRequestRecord, validator: Arc<WalletAccount>) -> Result<Self, SettlementError> {
        let amount = decimal_to_cents(&record.amount)?;
        Ok(Self {
            id: record.id,
            amount,
            address: normalize_address(&record.backend.1),
            validator,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    /// Bare address of the account to credit
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn can_validate(&self) -> Result<bool, SettlementError> {
        self.validator.has_credit_request_validation_rights().await
    }
}
