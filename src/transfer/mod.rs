//! Split transfers
//!
//! - `split`: pure split policy
//! - `verifier`: pending vs confirmed consistency and preflight
//! - `executor`: leg submission and confirmation polling
//! - `recipient`: orchestration for one destination

pub mod executor;
pub mod recipient;
pub mod split;
pub mod state;
pub mod types;
pub mod verifier;

pub use executor::{SubmittedLeg, TransferExecutor};
pub use recipient::Recipient;
pub use split::{MutualCreditLine, SenderPools, Split, compute_split};
pub use state::LegState;
pub use types::{PlannedTransfer, TransferLeg};
pub use verifier::SettlementVerifier;
