//! Settlement Engine
//!
//! Entry point for the host: wires configuration, collaborators and the
//! shared caches, and hands out recipients and merged history streams.

use std::sync::Arc;
use tracing::{debug, info};

use crate::account::{WalletAccount, WalletRecord};
use crate::cache::ReadCache;
use crate::config::EngineConfig;
use crate::connection::ConnectionCache;
use crate::credit::{CreditRequest, CreditRequestRecord};
use crate::error::SettlementError;
use crate::history::{HistoryQuery, HistorySource, TransactionStream, merge};
use crate::ledger::{
    BlockRef, Contact, CurrencyDiscovery, IdentityService, PendingTopUp, WalletUnlocker,
};
use crate::money::{Cents, cents_to_decimal, decimal_to_cents};
use crate::transfer::Recipient;

pub struct SettlementEngine {
    config: EngineConfig,
    connections: Arc<ConnectionCache>,
    reads: Arc<ReadCache>,
    identity: Arc<dyn IdentityService>,
    unlocker: Arc<dyn WalletUnlocker>,
    accounts: Vec<Arc<WalletAccount>>,
}

impl SettlementEngine {
    /// Wrap every wallet record into an account.
    ///
    /// Nothing is connected yet: each account reaches its currency server
    /// through the shared connection cache on first use, and records sharing
    /// a server share one connection.
    pub fn new(
        config: EngineConfig,
        discovery: Arc<dyn CurrencyDiscovery>,
        identity: Arc<dyn IdentityService>,
        unlocker: Arc<dyn WalletUnlocker>,
        records: Vec<WalletRecord>,
    ) -> Self {
        let connections = Arc::new(ConnectionCache::new(discovery));
        let reads = Arc::new(ReadCache::new(config.cache.ttl_seconds));

        let accounts = records
            .into_iter()
            .map(|record| Arc::new(WalletAccount::new(record, connections.clone(), reads.clone())))
            .collect::<Vec<_>>();

        info!(accounts = accounts.len(), "Settlement engine ready");
        Self {
            config,
            connections,
            reads,
            identity,
            unlocker,
            accounts,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &[Arc<WalletAccount>] {
        &self.accounts
    }

    pub fn connections(&self) -> &Arc<ConnectionCache> {
        &self.connections
    }

    /// Drop every cached balance and limit read
    pub fn clear_read_cache(&self) {
        self.reads.clear();
    }

    /// History of all accounts merged in `query.order`.
    ///
    /// Partial date bounds are rejected before anything is fetched.
    pub fn transactions(&self, query: &HistoryQuery) -> Result<TransactionStream, SettlementError> {
        let bounds = query.bounds()?;
        let sources = self
            .accounts
            .iter()
            .map(|account| {
                HistorySource::new(
                    account.clone(),
                    self.identity.clone(),
                    self.config.ledger.clone(),
                    self.config.history.page_size,
                )
                .stream(bounds)
            })
            .collect();
        Ok(merge(sources, query.order.clone()))
    }

    fn only_account(&self) -> Result<Arc<WalletAccount>, SettlementError> {
        match self.accounts.as_slice() {
            [] => Err(SettlementError::NoWalletAccount),
            [account] => Ok(account.clone()),
            _ => Err(SettlementError::MultipleWalletAccounts),
        }
    }

    /// The account with a collateralized pool, if any
    async fn creditable_account(&self) -> Result<Option<Arc<WalletAccount>>, SettlementError> {
        let mut creditable = None;
        for account in &self.accounts {
            if !account.is_creditable().await? {
                continue;
            }
            if creditable.is_some() {
                return Err(SettlementError::MultipleCreditableAccounts);
            }
            creditable = Some(account.clone());
        }
        Ok(creditable)
    }

    /// Recipient at `address`, paid from the only wallet account
    pub fn recipient(&self, address: &str, contact: Contact) -> Result<Recipient, SettlementError> {
        let sender = self.only_account()?;
        Ok(Recipient::new(
            address,
            contact,
            sender,
            self.identity.clone(),
            self.unlocker.clone(),
            self.config.ledger.clone(),
            self.config.transfer.clone(),
        ))
    }

    /// Sum of every pool of every account, pending view
    pub async fn total_balance(&self) -> Result<Cents, SettlementError> {
        let balances = futures::future::try_join_all(
            self.accounts
                .iter()
                .map(|account| account.total_balance(BlockRef::Pending)),
        )
        .await?;
        Ok(balances.into_iter().sum())
    }

    pub async fn formatted_total_balance(&self) -> Result<String, SettlementError> {
        Ok(cents_to_decimal(self.total_balance().await?))
    }

    /// Pending top-ups of the only creditable account; empty without one
    pub async fn pending_top_ups(&self) -> Result<Vec<PendingTopUp>, SettlementError> {
        let Some(account) = self.creditable_account().await? else {
            return Ok(Vec::new());
        };
        Ok(self.identity.pending_top_ups(account.address()).await?)
    }

    /// Payment URL topping up the creditable account by `amount`
    pub async fn credit_url(&self, amount: &str) -> Result<String, SettlementError> {
        let cents = decimal_to_cents(amount)?;
        if cents == 0 {
            return Err(SettlementError::NullAmount);
        }
        let account = self
            .creditable_account()
            .await?
            .ok_or(SettlementError::NoWalletAccount)?;
        debug!(address = %account.address(), amount = cents, "Requesting credit URL");
        Ok(self.identity.credit_url(account.address(), cents).await?)
    }

    /// Wrap a credit request listed by the identity service; the only
    /// wallet account decides whether it can be validated
    pub fn credit_request(&self, record: CreditRequestRecord) -> Result<CreditRequest, SettlementError> {
        CreditRequest::new(record, self.only_account()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::account_type;
    use crate::ledger::mock::{MockDiscovery, MockIdentity, MockLedger, MockWallet};
    use crate::ledger::{LedgerError, PoolKind};

    fn record(address: &str) -> WalletRecord {
        WalletRecord {
            address: address.into(),
            server: "lem".into(),
            active: true,
            message_key: None,
        }
    }

    fn engine(ledger: Arc<MockLedger>, records: Vec<WalletRecord>) -> (Arc<MockDiscovery>, SettlementEngine) {
        let (discovery, _, engine) = engine_with_identity(ledger, records);
        (discovery, engine)
    }

    fn engine_with_identity(
        ledger: Arc<MockLedger>,
        records: Vec<WalletRecord>,
    ) -> (Arc<MockDiscovery>, Arc<MockIdentity>, SettlementEngine) {
        let discovery = Arc::new(MockDiscovery::new(ledger));
        let identity = Arc::new(MockIdentity::new());
        let engine = SettlementEngine::new(
            EngineConfig::default(),
            discovery.clone(),
            identity.clone(),
            Arc::new(MockWallet::new()),
            records,
        );
        (discovery, identity, engine)
    }

    #[tokio::test]
    async fn test_accounts_share_one_connection() {
        let ledger = Arc::new(MockLedger::new());
        let (discovery, engine) = engine(ledger, vec![record("aaaa"), record("cccc")]);
        assert_eq!(engine.accounts().len(), 2);
        assert_eq!(discovery.connect_count(), 0);

        engine.total_balance().await.unwrap();
        assert_eq!(discovery.connect_count(), 1);
        assert!(engine.connections().is_connected("lem"));
    }

    #[tokio::test]
    async fn test_startup_outage_heals_on_next_call() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "4.00");
        let discovery = Arc::new(MockDiscovery::new(ledger.clone()));
        discovery.fail_with(Some(LedgerError::NoEndpointAvailable("all down".into())));
        let engine = SettlementEngine::new(
            EngineConfig::default(),
            discovery.clone(),
            Arc::new(MockIdentity::new()),
            Arc::new(MockWallet::new()),
            vec![record("aaaa")],
        );

        let err = engine.total_balance().await.unwrap_err();
        assert!(err.is_retryable());

        discovery.fail_with(None);
        assert_eq!(engine.total_balance().await.unwrap(), 400);
        assert!(engine.connections().is_connected("lem"));

        // A discarded connection is recreated by the next operation
        engine.connections().invalidate("lem");
        engine.clear_read_cache();
        assert_eq!(engine.total_balance().await.unwrap(), 400);
        assert!(engine.connections().is_connected("lem"));
        assert_eq!(discovery.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_recipient_needs_exactly_one_account() {
        let ledger = Arc::new(MockLedger::new());
        let (_, none) = engine(ledger.clone(), vec![]);
        assert!(matches!(
            none.recipient("bbbb", Contact::default()),
            Err(SettlementError::NoWalletAccount)
        ));

        let (_, two) = engine(ledger.clone(), vec![record("aaaa"), record("cccc")]);
        assert!(matches!(
            two.recipient("bbbb", Contact::default()),
            Err(SettlementError::MultipleWalletAccounts)
        ));

        let (_, one) = engine(ledger, vec![record("aaaa")]);
        assert_eq!(one.recipient("0xBBBB", Contact::default()).unwrap().address(), "bbbb");
    }

    #[tokio::test]
    async fn test_total_balance_across_accounts() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "10.00");
        ledger.set_balance(PoolKind::MutualCredit, "aaaa", "-1.00");
        ledger.set_balance(PoolKind::Collateralized, "cccc", "0.50");
        let (_, engine) = engine(ledger, vec![record("aaaa"), record("cccc")]);
        assert_eq!(engine.total_balance().await.unwrap(), 950);
        assert_eq!(engine.formatted_total_balance().await.unwrap(), "9.50");
    }

    #[tokio::test]
    async fn test_partial_range_rejected_before_streaming() {
        let ledger = Arc::new(MockLedger::new());
        let (_, engine) = engine(ledger.clone(), vec![record("aaaa")]);
        let query = HistoryQuery {
            date_begin: Some(chrono::Utc::now()),
            ..HistoryQuery::default()
        };
        assert!(matches!(
            engine.transactions(&query),
            Err(SettlementError::UnsupportedPartialRange)
        ));
        assert!(ledger.list_calls().is_empty());
        assert!(ledger.export_calls().is_empty());
    }

    fn top_up(id: i64, amount: Cents) -> PendingTopUp {
        PendingTopUp {
            id,
            amount,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_pending_top_ups_of_creditable_account() {
        let ledger = Arc::new(MockLedger::new());
        let (_, identity, engine) = engine_with_identity(ledger.clone(), vec![record("0xAAAA")]);
        identity.set_pending_top_ups("aaaa", vec![top_up(1, 2_000), top_up(2, 500)]);

        let top_ups = engine.pending_top_ups().await.unwrap();
        assert_eq!(top_ups, vec![top_up(1, 2_000), top_up(2, 500)]);
        assert_eq!(identity.top_up_calls(), vec!["aaaa".to_string()]);

        // Inactive accounts have no pools, hence nothing creditable
        let mut inactive = record("aaaa");
        inactive.active = false;
        let (_, identity, engine) = engine_with_identity(ledger.clone(), vec![inactive]);
        assert!(engine.pending_top_ups().await.unwrap().is_empty());
        assert!(identity.top_up_calls().is_empty());

        let (_, identity, engine) =
            engine_with_identity(ledger, vec![record("aaaa"), record("cccc")]);
        let err = engine.pending_top_ups().await.unwrap_err();
        assert_eq!(err.code(), "MULTIPLE_CREDITABLE_ACCOUNTS");
        assert!(identity.top_up_calls().is_empty());
    }

    #[tokio::test]
    async fn test_credit_url_for_creditable_account() {
        let ledger = Arc::new(MockLedger::new());
        let (_, identity, engine) = engine_with_identity(ledger.clone(), vec![record("0xAAAA")]);

        let url = engine.credit_url("25.00").await.unwrap();
        assert!(url.contains("address=aaaa"));
        assert_eq!(identity.credit_calls(), vec![("aaaa".to_string(), 2_500)]);

        assert_eq!(engine.credit_url("0").await.unwrap_err().code(), "NULL_AMOUNT");
        assert_eq!(engine.credit_url("2.5").await.unwrap_err().code(), "MALFORMED_AMOUNT");

        let (_, _, none) = engine_with_identity(ledger, vec![]);
        assert!(matches!(
            none.credit_url("1.00").await,
            Err(SettlementError::NoWalletAccount)
        ));
    }

    #[tokio::test]
    async fn test_credit_request_needs_exactly_one_account() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_account_type("aaaa", account_type::CREDIT_MANAGER);
        let record_json = CreditRequestRecord {
            id: 4,
            amount: "10.00".into(),
            backend: ("comchain".into(), "0xBBBB".into()),
        };

        let (_, one) = engine(ledger.clone(), vec![record("aaaa")]);
        let request = one.credit_request(record_json.clone()).unwrap();
        assert_eq!(request.address(), "bbbb");
        assert!(request.can_validate().await.unwrap());

        let (_, two) = engine(ledger, vec![record("aaaa"), record("cccc")]);
        assert!(matches!(
            two.credit_request(record_json),
            Err(SettlementError::MultipleWalletAccounts)
        ));
    }
}
