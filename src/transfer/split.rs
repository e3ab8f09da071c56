//! Split Calculator
//!
//! Pure policy deciding how a requested amount is spread over the two
//! pools. No I/O: balances and limits are read by the caller.
//!
//! # Policy
//! 1. No mutual-credit pool on the sender, or a technical recipient: the
//!    whole amount goes to the collateralized pool.
//! 2. Otherwise the mutual-credit leg takes as much as possible, capped by
//!    the amount, the sender's available credit (`balance + room`, floored
//!    at 0) and the receiver's capacity. The remainder is collateralized.
//! 3. A remainder above the collateralized balance fails. When the receiver
//!    capacity was the binding cap the failure is
//!    `RecipientCapacityExceeded`, otherwise `InsufficientBalance`. Both carry
//!    `mutual_credit_leg + collateralized_balance` as the largest amount that
//!    would go through.

use std::fmt;

use crate::error::SettlementError;
use crate::money::{Cents, cents_to_decimal, ensure_safe};

/// Amounts per pool for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Split {
    pub collateralized: Cents,
    pub mutual_credit: Cents,
}

impl Split {
    #[inline]
    pub fn total(&self) -> Cents {
        self.collateralized + self.mutual_credit
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{mutual_credit: {}, collateralized: {}}}",
            cents_to_decimal(self.mutual_credit),
            cents_to_decimal(self.collateralized)
        )
    }
}

/// Sender's mutual-credit position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutualCreditLine {
    /// Current balance, may be negative
    pub balance: Cents,
    /// How far below zero the balance may go (non-negative)
    pub low_limit_room: Cents,
}

impl MutualCreditLine {
    /// Credit the sender can still spend
    #[inline]
    pub fn available(&self) -> Cents {
        (self.balance + self.low_limit_room).max(0)
    }
}

/// Sender balances as seen by one view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderPools {
    pub collateralized: Cents,
    /// `None` when the currency or the account has no mutual-credit pool
    pub mutual_credit: Option<MutualCreditLine>,
}

/// Receiver capacity from its upper limit and current balance, floored at 0
#[inline]
pub fn receiver_capacity(limit_above: Cents, balance: Cents) -> Cents {
    (limit_above - balance).max(0)
}

/// Compute the split for `amount`.
///
/// `capacity` is the receiver's mutual-credit headroom, `None` when it was
/// not evaluated (uncapped).
pub fn compute_split(
    amount: Cents,
    sender: &SenderPools,
    capacity: Option<Cents>,
    technical_recipient: bool,
) -> Result<Split, SettlementError> {
    if amount == 0 {
        return Err(SettlementError::NullAmount);
    }
    if amount < 0 {
        return Err(SettlementError::NegativeAmount(amount));
    }
    ensure_safe(amount)?;

    let collateralized_balance = sender.collateralized.max(0);

    let line = match sender.mutual_credit {
        Some(line) if !technical_recipient => line,
        _ => {
            if amount > collateralized_balance {
                return Err(SettlementError::InsufficientBalance {
                    max_transferable: collateralized_balance,
                });
            }
            return Ok(Split {
                collateralized: amount,
                mutual_credit: 0,
            });
        }
    };

    let uncapped = amount.min(line.available());
    let mutual_credit = match capacity {
        Some(capacity) => uncapped.min(capacity.max(0)),
        None => uncapped,
    };
    let remainder = amount - mutual_credit;

    if remainder > collateralized_balance {
        let max_transferable = mutual_credit + collateralized_balance;
        if mutual_credit < uncapped {
            return Err(SettlementError::RecipientCapacityExceeded { max_transferable });
        }
        return Err(SettlementError::InsufficientBalance { max_transferable });
    }

    Ok(Split {
        collateralized: remainder,
        mutual_credit,
    })
}
