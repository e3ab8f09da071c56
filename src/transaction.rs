//! Confirmed transactions
//!
//! Immutable records built from ledger history entries, or by the transfer
//! executor once a leg is confirmed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::config::LedgerConfig;
use crate::ledger::{MemoCipher, MessageKey, PoolKind, RawTransaction};
use crate::money::{Cents, cents_to_rust_decimal};

/// Direction of a transaction relative to the account it was read for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Tag attached to a transfer, one per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferTag {
    /// Mutual-credit leg
    Barter,
    /// Collateralized leg
    Collateralized,
}

impl TransferTag {
    pub fn for_pool(pool: PoolKind) -> Self {
        match pool {
            PoolKind::MutualCredit => TransferTag::Barter,
            PoolKind::Collateralized => TransferTag::Collateralized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferTag::Barter => "barter",
            TransferTag::Collateralized => "collateralized",
        }
    }
}

impl fmt::Display for TransferTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmedTransaction {
    pub id: String,
    /// Signed: debits are negative
    pub amount: Cents,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Address as reported by the ledger (may be the admin marker)
    pub counterparty: String,
    pub counterparty_name: Option<String>,
    /// Not yet part of a confirmed block
    pub pending: bool,
    pub tags: Vec<TransferTag>,
    pub is_top_up: bool,
    pub is_reconversion: bool,
    /// Reconversion still being processed by the finance backend
    pub reconversion_pending: bool,
    /// Bare address of the account this record was read for
    pub owner: String,
    #[serde(skip)]
    raw: RawTransaction,
}

impl ConfirmedTransaction {
    /// Build the record of `raw` as seen by `owner` in `direction`.
    pub fn from_raw(
        raw: RawTransaction,
        owner: &str,
        direction: Direction,
        currency: &str,
        ledger: &LedgerConfig,
    ) -> Self {
        let (amount, counterparty) = match direction {
            Direction::Inbound => (raw.received, raw.addr_from.clone()),
            Direction::Outbound => (-raw.sent, raw.addr_to.clone()),
        };
        let is_top_up = direction == Direction::Inbound
            && (ledger.is_admin(&counterparty) || ledger.is_technical(&counterparty));
        let is_reconversion =
            direction == Direction::Outbound && ledger.is_technical(&counterparty);

        Self {
            id: raw.hash.clone(),
            amount,
            currency: currency.to_string(),
            timestamp: DateTime::from_timestamp(raw.time, 0).unwrap_or_default(),
            direction,
            counterparty,
            counterparty_name: None,
            pending: raw.status != 0,
            tags: raw.pool().map(TransferTag::for_pool).into_iter().collect(),
            is_top_up,
            is_reconversion,
            reconversion_pending: is_reconversion,
            owner: owner.to_string(),
            raw,
        }
    }

    pub fn raw(&self) -> &RawTransaction {
        &self.raw
    }

    pub fn amount_decimal(&self) -> Decimal {
        cents_to_rust_decimal(self.amount)
    }

    /// Counterparty display: resolved name, else address
    pub fn related(&self) -> &str {
        self.counterparty_name
            .as_deref()
            .unwrap_or(&self.counterparty)
    }

    /// Decrypt the memo for the owner.
    ///
    /// Undecipherable memos are logged and read as empty.
    pub fn description(&self, cipher: &dyn MemoCipher, key: Option<&MessageKey>) -> String {
        let Some(key) = key else {
            return String::new();
        };
        match cipher.decrypt(&self.raw, &self.owner, key) {
            Ok(memo) => memo,
            Err(e) => {
                warn!(tx = %self.id, error = %e, "Could not decipher memo");
                String::new()
            }
        }
    }
}
