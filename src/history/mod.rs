//! Transaction history across accounts
//!
//! Every account contributes one [`HistorySource`]; [`merge`] interleaves
//! them in the requested order.

pub mod mux;
pub mod query;
pub mod source;

pub use mux::mux;
pub use query::{HistoryQuery, SortField, SortKey, SortSpec};
pub use source::HistorySource;

use futures::stream::BoxStream;

use crate::error::SettlementError;
use crate::transaction::ConfirmedTransaction;

pub type TransactionStream = BoxStream<'static, Result<ConfirmedTransaction, SettlementError>>;

/// Merge per-account streams ordered by `order`
pub fn merge(sources: Vec<TransactionStream>, order: SortSpec) -> TransactionStream {
    mux(sources, move |a, b| order.compare(a, b))
}
