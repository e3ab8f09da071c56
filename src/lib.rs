//! splitpay - Split-Transfer Settlement Engine
//!
//! Pays a recipient from two pools of the same currency: a collateralized
//! pool backed by deposits and a mutual-credit pool that may go negative
//! down to a per-account limit.
//!
//! # Modules
//!
//! - [`money`] - Exact cent amounts and decimal string codec
//! - [`ledger`] - Ledger collaborator traits and wire records
//! - [`connection`] - Memoized currency server connections
//! - [`cache`] - Short-lived cache of pending-view reads
//! - [`account`] - Wallet accounts and their ledger views
//! - [`credit`] - Top-ups and credit requests
//! - [`transfer`] - Split computation, verification and leg execution
//! - [`transaction`] - Confirmed transaction records
//! - [`history`] - Paged per-account history and ordered merge
//! - [`engine`] - Facade wiring everything together
//! - [`poll`] - Deadline-bounded polling

// Amounts first, everything else builds on them
pub mod money;

// Ambient
pub mod config;
pub mod error;
pub mod logging;

// Ledger access
pub mod cache;
pub mod connection;
pub mod ledger;
pub mod poll;

// Settlement
pub mod account;
pub mod credit;
pub mod engine;
pub mod history;
pub mod transaction;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::{LedgerView, WalletAccount, WalletRecord};
pub use config::EngineConfig;
pub use credit::{CreditRequest, CreditRequestRecord};
pub use engine::SettlementEngine;
pub use error::SettlementError;
pub use history::{HistoryQuery, SortSpec, TransactionStream};
pub use ledger::{BlockRef, PoolKind};
pub use money::Cents;
pub use transaction::{ConfirmedTransaction, Direction, TransferTag};
pub use transfer::{LegState, PlannedTransfer, Recipient, Split, TransferLeg};
