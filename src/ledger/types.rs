//! Ledger Wire Types
//!
//! Shapes exchanged with the ledger node and the identity service.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Cents;

/// Raw direction value for a transaction received by the queried address.
pub const DIRECTION_INBOUND: i64 = 2;

/// Balance pool on the ledger
///
/// Every pool-specific remote call is dispatched through a `match` on this
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Fully backed 1:1, never negative
    Collateralized,
    /// Mutual credit line bounded by a lower and an upper limit
    MutualCredit,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Collateralized => "COLLATERALIZED",
            PoolKind::MutualCredit => "MUTUAL_CREDIT",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which ledger state a read is made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRef {
    /// Includes unconfirmed, in-flight transactions
    Pending,
    /// State at a confirmed block number
    Number(u64),
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Pending => write!(f, "pending"),
            BlockRef::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One history entry as returned by the ledger node.
///
/// Amounts are integer cents. Memo payload fields are not interpreted
/// here; they are kept in `extra` for the memo cipher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    #[serde(default)]
    pub block: Option<u64>,
    /// Epoch seconds
    pub time: i64,
    /// 0 once included in a confirmed block
    #[serde(default)]
    pub status: i64,
    pub direction: i64,
    pub addr_from: String,
    pub addr_to: String,
    #[serde(default)]
    pub sent: Cents,
    #[serde(default, alias = "recieved")]
    pub received: Cents,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawTransaction {
    #[inline]
    pub fn is_inbound(&self) -> bool {
        self.direction == DIRECTION_INBOUND
    }

    /// Address on the other side of the entry, as seen by the queried account.
    pub fn counterparty(&self) -> &str {
        if self.is_inbound() {
            &self.addr_from
        } else {
            &self.addr_to
        }
    }

    /// Pool the entry moved value in, when the ledger reports it.
    pub fn pool(&self) -> Option<PoolKind> {
        match self.kind.as_deref() {
            Some("TransferCredit") => Some(PoolKind::MutualCredit),
            Some("Transfer") | Some("Pledge") => Some(PoolKind::Collateralized),
            _ => None,
        }
    }
}

/// Public/private message key pair used to cipher memos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    #[serde(rename = "pub")]
    pub public: String,
    #[serde(default, rename = "priv", skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// Currency-level settings loaded with the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyProfile {
    /// Short symbol, e.g. "LEM"
    pub symbol: String,
    /// Global currency name
    pub name: String,
    pub collateralized_name: String,
    pub mutual_credit_name: String,
    pub has_collateralized: bool,
    pub has_mutual_credit: bool,
}

/// Counterparty identity as resolved by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub public_name: Option<String>,
}

/// Account parameters written when validating a new account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountParams {
    pub status: i64,
    pub account_type: i64,
    pub limit_above: Cents,
    pub limit_below: Cents,
}

/// Notification sent to the identity service once an account is validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountActivation {
    pub account_id: String,
    pub recipient_id: Option<i64>,
    pub account_type: i64,
    pub credit_min: Cents,
    pub credit_max: Cents,
}

/// Top-up of a collateralized account awaiting payment or validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTopUp {
    pub id: i64,
    pub amount: Cents,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Account creation request to withdraw from the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationDiscard {
    pub recipient_id: Option<i64>,
    pub address: String,
}

/// Decrypted signing handle handed out by the wallet unlocker.
///
/// Opaque to this crate; only the ledger writer interprets `secret`.
#[derive(Clone)]
pub struct SigningHandle {
    pub address: String,
    pub secret: Vec<u8>,
}

impl fmt::Debug for SigningHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningHandle")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Strip a leading `0x` and lowercase, for address comparisons.
pub fn normalize_address(address: &str) -> String {
    address
        .strip_prefix("0x")
        .unwrap_or(address)
        .to_ascii_lowercase()
}

/// Address with the `0x` prefix the ledger uses in history entries.
pub fn prefixed_address(address: &str) -> String {
    if address.starts_with("0x") {
        address.to_string()
    } else {
        format!("0x{}", address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_transaction_deserialize() {
        let json = r#"{
            "hash": "0xabc",
            "block": 12,
            "time": 1700000000,
            "status": 0,
            "direction": 2,
            "addr_from": "Admin",
            "addr_to": "0x1111",
            "sent": 0,
            "recieved": 2500,
            "type": "Transfer",
            "message_from": "cipher"
        }"#;
        let raw: RawTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(raw.received, 2500);
        assert!(raw.is_inbound());
        assert_eq!(raw.counterparty(), "Admin");
        assert_eq!(raw.pool(), Some(PoolKind::Collateralized));
        assert_eq!(raw.extra.get("message_from").unwrap(), "cipher");
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(normalize_address("0xAbCd"), "abcd");
        assert_eq!(normalize_address("abcd"), "abcd");
        assert_eq!(prefixed_address("abcd"), "0xabcd");
        assert_eq!(prefixed_address("0xabcd"), "0xabcd");
    }

    #[test]
    fn test_signing_handle_debug_redacts() {
        let handle = SigningHandle {
            address: "abcd".into(),
            secret: vec![1, 2, 3],
        };
        let out = format!("{:?}", handle);
        assert!(out.contains("redacted"));
        assert!(!out.contains("[1, 2, 3]"));
    }

    #[test]
    fn test_block_ref_display() {
        assert_eq!(BlockRef::Pending.to_string(), "pending");
        assert_eq!(BlockRef::Number(42).to_string(), "42");
    }
}
