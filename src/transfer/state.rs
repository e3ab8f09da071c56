//! Transfer Leg States
//!
//! `Built -> Submitted -> AwaitingConfirmation -> Confirmed | Failed`

use std::fmt;

/// Lifecycle of one transfer leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegState {
    /// Leg planned, nothing sent yet
    Built,

    /// Accepted by the ledger node, transaction id known
    Submitted,

    /// Polling for the transaction to appear
    AwaitingConfirmation,

    /// Terminal: transaction info received
    Confirmed,

    /// Terminal: rejected, malformed response, or no confirmation in time
    Failed,
}

impl LegState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LegState::Confirmed | LegState::Failed)
    }

    /// Whether the ledger may already have applied the leg
    #[inline]
    pub fn may_be_applied(&self) -> bool {
        matches!(
            self,
            LegState::Submitted | LegState::AwaitingConfirmation | LegState::Confirmed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LegState::Built => "BUILT",
            LegState::Submitted => "SUBMITTED",
            LegState::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            LegState::Confirmed => "CONFIRMED",
            LegState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
