//! Per-account history source
//!
//! Pages through the ledger history of one account (or runs one export
//! query when both date bounds are given) and turns each page into
//! enriched [`ConfirmedTransaction`]s.
//!
//! Counterparty names and reconversion statuses are resolved once per page
//! with a single batched call each. Results, including misses, are memoized
//! for the lifetime of the stream.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::account::WalletAccount;
use crate::config::LedgerConfig;
use crate::error::SettlementError;
use crate::ledger::{
    Contact, IdentityError, IdentityService, RawTransaction, normalize_address, prefixed_address,
};
use crate::transaction::{ConfirmedTransaction, Direction};

/// History of one wallet account
pub struct HistorySource {
    account: Arc<WalletAccount>,
    identity: Arc<dyn IdentityService>,
    ledger: LedgerConfig,
    page_size: usize,
}

struct PageCursor {
    offset: usize,
    exhausted: bool,
    contacts: HashMap<String, Option<Contact>>,
    reconversions: HashMap<String, Option<bool>>,
}

impl HistorySource {
    pub fn new(
        account: Arc<WalletAccount>,
        identity: Arc<dyn IdentityService>,
        ledger: LedgerConfig,
        page_size: usize,
    ) -> Self {
        Self {
            account,
            identity,
            ledger,
            page_size: page_size.max(1),
        }
    }

    /// Stream the account history, newest first as the ledger returns it.
    ///
    /// `bounds` are epoch seconds; `None` pages through the whole history.
    pub fn stream(
        self,
        bounds: Option<(i64, i64)>,
    ) -> BoxStream<'static, Result<ConfirmedTransaction, SettlementError>> {
        if !self.account.is_active() {
            debug!(address = %self.account.address(), "Inactive account, empty history");
            return stream::empty().boxed();
        }

        let cursor = PageCursor {
            offset: 0,
            exhausted: false,
            contacts: HashMap::new(),
            reconversions: HashMap::new(),
        };
        let source = Arc::new(self);

        stream::try_unfold(cursor, move |mut cursor| {
            let source = source.clone();
            async move {
                if cursor.exhausted {
                    return Ok::<_, SettlementError>(None);
                }
                let raws = source.fetch_page(bounds, cursor.offset).await?;
                cursor.exhausted = bounds.is_some() || raws.len() < source.page_size;
                cursor.offset += source.page_size;

                let page = source.enrich_page(raws, &mut cursor).await?;
                Ok(Some((page, cursor)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn fetch_page(
        &self,
        bounds: Option<(i64, i64)>,
        offset: usize,
    ) -> Result<Vec<RawTransaction>, SettlementError> {
        let manager = self.account.manager().await?;
        let reader = &manager.reader;
        let address = prefixed_address(self.account.address());
        let result = match bounds {
            Some((from, to)) => reader.export_transaction_list(&address, from, to).await,
            None => {
                reader
                    .transaction_list(&address, self.page_size, offset)
                    .await
            }
        };
        let raws = self.account.view().check(result)?;
        debug!(address = %address, offset, count = raws.len(), "History page fetched");
        Ok(raws)
    }

    async fn enrich_page(
        &self,
        raws: Vec<RawTransaction>,
        cursor: &mut PageCursor,
    ) -> Result<Vec<ConfirmedTransaction>, SettlementError> {
        self.resolve_contacts(&raws, cursor).await?;
        self.resolve_reconversions(&raws, cursor).await?;

        let me = self.account.address();
        let currency = self.account.symbol().await?;
        let mut page = Vec::with_capacity(raws.len());
        for raw in raws {
            let inbound = normalize_address(&raw.addr_to) == me;
            let outbound = normalize_address(&raw.addr_from) == me;
            let directions = [
                (inbound, Direction::Inbound),
                (outbound, Direction::Outbound),
            ];
            for (matches, direction) in directions {
                if !matches {
                    continue;
                }
                let mut tx = ConfirmedTransaction::from_raw(
                    raw.clone(),
                    me,
                    direction,
                    &currency,
                    &self.ledger,
                );
                if !self.ledger.is_admin(&tx.counterparty) {
                    tx.counterparty_name = cursor
                        .contacts
                        .get(&normalize_address(&tx.counterparty))
                        .and_then(|c| c.as_ref())
                        .and_then(|c| c.public_name.clone());
                }
                if tx.is_reconversion {
                    let id = self.ledger.reconversion_id(&tx.id);
                    tx.reconversion_pending = cursor
                        .reconversions
                        .get(&id)
                        .copied()
                        .flatten()
                        .unwrap_or(true);
                }
                page.push(tx);
            }
        }
        Ok(page)
    }

    async fn resolve_contacts(
        &self,
        raws: &[RawTransaction],
        cursor: &mut PageCursor,
    ) -> Result<(), SettlementError> {
        let mut seen = HashSet::new();
        let unresolved: Vec<String> = raws
            .iter()
            .map(|raw| raw.counterparty())
            .filter(|addr| !self.ledger.is_admin(addr))
            .map(normalize_address)
            .filter(|addr| !cursor.contacts.contains_key(addr) && seen.insert(addr.clone()))
            .collect();
        if unresolved.is_empty() {
            return Ok(());
        }

        let mut contacts = self.identity.resolve_contacts(&unresolved).await?;
        debug!(requested = unresolved.len(), resolved = contacts.len(), "Counterparties resolved");
        for address in unresolved {
            let contact = contacts.remove(&address);
            cursor.contacts.insert(address, contact);
        }
        Ok(())
    }

    async fn resolve_reconversions(
        &self,
        raws: &[RawTransaction],
        cursor: &mut PageCursor,
    ) -> Result<(), SettlementError> {
        let me = self.account.address();
        let mut seen = HashSet::new();
        let unresolved: Vec<String> = raws
            .iter()
            .filter(|raw| {
                normalize_address(&raw.addr_from) == me && self.ledger.is_technical(&raw.addr_to)
            })
            .map(|raw| self.ledger.reconversion_id(&raw.hash))
            .filter(|id| !cursor.reconversions.contains_key(id) && seen.insert(id.clone()))
            .collect();
        if unresolved.is_empty() {
            return Ok(());
        }

        let mut statuses = match self.identity.reconversion_status(&unresolved).await {
            Ok(statuses) => statuses,
            Err(IdentityError::NotFound(endpoint)) => {
                warn!(endpoint = %endpoint, "Reconversion endpoint missing, statuses unknown");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        for id in unresolved {
            let status = statuses.remove(&id);
            cursor.reconversions.insert(id, status);
        }
        Ok(())
    }
}
