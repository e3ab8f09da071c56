//! Wallet Accounts
//!
//! A wallet account is one address on one currency server. Balances and
//! limits are read through [`LedgerView`], which dispatches on [`PoolKind`]
//! and goes through the shared [`ReadCache`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::cache::{ReadCache, ReadKey, ReadOp};
use crate::connection::{ConnectionCache, CurrencyManager};
use crate::error::SettlementError;
use crate::ledger::{BlockRef, LedgerError, MessageKey, PoolKind, normalize_address};
use crate::money::{Cents, cents_to_decimal, signed_decimal_to_cents};
use crate::transfer::split::{MutualCreditLine, SenderPools, receiver_capacity};

/// Account type values reported by the ledger
pub mod account_type {
    pub const BUSINESS: i64 = 1;
    pub const CREDIT_MANAGER: i64 = 2;
    pub const CREDIT_REQUEST_VALIDATOR: i64 = 3;
    pub const USER_VALIDATOR: i64 = 4;
}

/// Status of a validated, usable account
pub const STATUS_ACTIVE: i64 = 1;

/// Wallet entry supplied by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub address: String,
    /// Currency server key, also the connection cache key
    pub server: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub message_key: Option<MessageKey>,
}

fn default_active() -> bool {
    true
}

/// Pool-dispatched ledger reads for one currency, cached for a short TTL
///
/// The currency connection is looked up in the [`ConnectionCache`] on every
/// operation, so a dropped connection is re-established on next use.
#[derive(Clone)]
pub struct LedgerView {
    connections: Arc<ConnectionCache>,
    server: String,
    cache: Arc<ReadCache>,
}

impl LedgerView {
    pub fn new(connections: Arc<ConnectionCache>, server: &str, cache: Arc<ReadCache>) -> Self {
        Self {
            connections,
            server: server.to_string(),
            cache,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Connection to the currency server, connecting on first use
    pub async fn manager(&self) -> Result<Arc<CurrencyManager>, SettlementError> {
        self.connections.get(&self.server).await
    }

    /// Convert a ledger call result, dropping the connection when the
    /// server reports that no endpoint is left
    pub fn check<T>(&self, result: Result<T, LedgerError>) -> Result<T, SettlementError> {
        if let Err(LedgerError::NoEndpointAvailable(reason)) = &result {
            warn!(server = %self.server, reason = %reason, "No ledger endpoint left, dropping connection");
            self.connections.invalidate(&self.server);
        }
        result.map_err(SettlementError::from)
    }

    async fn read(
        &self,
        op: ReadOp,
        address: &str,
        block: BlockRef,
    ) -> Result<String, SettlementError> {
        let address = normalize_address(address);
        let key = ReadKey::new(op, &address, block);
        let reader = self.manager().await?.reader.clone();
        let result = self
            .cache
            .get_or_try_insert_with(key, || async move {
                debug!(op = ?op, address = %address, block = %block, "Ledger read");
                match op {
                    ReadOp::CollateralizedBalance => {
                        reader.collateralized_balance(&address, block).await
                    }
                    ReadOp::MutualCreditBalance => {
                        reader.mutual_credit_balance(&address, block).await
                    }
                    ReadOp::LimitBelow => reader.limit_below(&address, block).await,
                    ReadOp::LimitAbove => reader.limit_above(&address, block).await,
                }
            })
            .await;
        self.check(result)
    }

    /// Balance exactly as the ledger formats it
    pub async fn raw_balance(
        &self,
        pool: PoolKind,
        address: &str,
        block: BlockRef,
    ) -> Result<String, SettlementError> {
        let op = match pool {
            PoolKind::Collateralized => ReadOp::CollateralizedBalance,
            PoolKind::MutualCredit => ReadOp::MutualCreditBalance,
        };
        self.read(op, address, block).await
    }

    pub async fn balance(
        &self,
        pool: PoolKind,
        address: &str,
        block: BlockRef,
    ) -> Result<Cents, SettlementError> {
        let raw = self.raw_balance(pool, address, block).await?;
        ledger_amount(&raw)
    }

    /// How far below zero the mutual-credit balance may go
    pub async fn low_limit_room(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<Cents, SettlementError> {
        let raw = self.read(ReadOp::LimitBelow, address, block).await?;
        Ok(ledger_amount(&raw)?.abs())
    }

    pub async fn upper_limit(&self, address: &str, block: BlockRef) -> Result<Cents, SettlementError> {
        let raw = self.read(ReadOp::LimitAbove, address, block).await?;
        ledger_amount(&raw)
    }

    /// Sender balances at `block`; mutual credit only when `with_credit`
    pub async fn sender_pools(
        &self,
        address: &str,
        block: BlockRef,
        with_credit: bool,
    ) -> Result<SenderPools, SettlementError> {
        if !with_credit {
            let collateralized = self
                .balance(PoolKind::Collateralized, address, block)
                .await?;
            return Ok(SenderPools {
                collateralized,
                mutual_credit: None,
            });
        }
        let (collateralized, balance, low_limit_room) = tokio::try_join!(
            self.balance(PoolKind::Collateralized, address, block),
            self.balance(PoolKind::MutualCredit, address, block),
            self.low_limit_room(address, block),
        )?;
        Ok(SenderPools {
            collateralized,
            mutual_credit: Some(MutualCreditLine {
                balance,
                low_limit_room,
            }),
        })
    }

    /// Headroom of the receiver's mutual-credit pool at `block`
    pub async fn receiver_capacity(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<Cents, SettlementError> {
        let (limit_above, balance) = tokio::try_join!(
            self.upper_limit(address, block),
            self.balance(PoolKind::MutualCredit, address, block),
        )?;
        Ok(receiver_capacity(limit_above, balance))
    }

    /// Most recently confirmed block number
    pub async fn current_block(&self) -> Result<u64, SettlementError> {
        let manager = self.manager().await?;
        self.check(manager.reader.current_block().await)
    }

    /// Drop cached reads, after a submission changed the balances
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

/// A decimal string returned by the ledger; anything unparsable is a
/// contract violation of the node, not a caller mistake
pub fn ledger_amount(raw: &str) -> Result<Cents, SettlementError> {
    signed_decimal_to_cents(raw).map_err(|e| {
        SettlementError::MalformedResponse(format!("invalid amount returned by ledger: {}", e))
    })
}

/// One wallet address on one currency server
pub struct WalletAccount {
    record: WalletRecord,
    address: String,
    view: LedgerView,
    account_type: OnceCell<i64>,
    account_status: OnceCell<i64>,
}

impl WalletAccount {
    /// The currency connection is only established on first use
    pub fn new(record: WalletRecord, connections: Arc<ConnectionCache>, cache: Arc<ReadCache>) -> Self {
        let view = LedgerView::new(connections, &record.server, cache);
        Self {
            address: normalize_address(&record.address),
            record,
            view,
            account_type: OnceCell::new(),
            account_status: OnceCell::new(),
        }
    }

    /// Bare lowercase address
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn record(&self) -> &WalletRecord {
        &self.record
    }

    pub fn view(&self) -> &LedgerView {
        &self.view
    }

    pub async fn manager(&self) -> Result<Arc<CurrencyManager>, SettlementError> {
        self.view.manager().await
    }

    pub fn is_active(&self) -> bool {
        self.record.active
    }

    /// Pools the currency offers; none for an inactive account
    pub async fn pools(&self) -> Result<Vec<PoolKind>, SettlementError> {
        if !self.record.active {
            return Ok(Vec::new());
        }
        let manager = self.manager().await?;
        let mut pools = Vec::with_capacity(2);
        if manager.profile.has_collateralized {
            pools.push(PoolKind::Collateralized);
        }
        if manager.profile.has_mutual_credit {
            pools.push(PoolKind::MutualCredit);
        }
        Ok(pools)
    }

    pub async fn has_mutual_credit(&self) -> Result<bool, SettlementError> {
        Ok(self.pools().await?.contains(&PoolKind::MutualCredit))
    }

    /// Whether the account can be topped up (has a collateralized pool)
    pub async fn is_creditable(&self) -> Result<bool, SettlementError> {
        Ok(self.pools().await?.contains(&PoolKind::Collateralized))
    }

    pub async fn balance(&self, pool: PoolKind, block: BlockRef) -> Result<Cents, SettlementError> {
        self.view.balance(pool, &self.address, block).await
    }

    /// Sum over every pool of the account
    pub async fn total_balance(&self, block: BlockRef) -> Result<Cents, SettlementError> {
        let pools = self.pools().await?;
        let balances = futures::future::try_join_all(
            pools.into_iter().map(|pool| self.balance(pool, block)),
        )
        .await?;
        Ok(balances.into_iter().sum())
    }

    /// [`Self::total_balance`] formatted with two fraction digits
    pub async fn formatted_total_balance(&self, block: BlockRef) -> Result<String, SettlementError> {
        Ok(cents_to_decimal(self.total_balance(block).await?))
    }

    pub async fn account_type(&self) -> Result<i64, SettlementError> {
        let value = self
            .account_type
            .get_or_try_init(|| async {
                let manager = self.manager().await?;
                self.view.check(manager.reader.account_type(&self.address).await)
            })
            .await?;
        Ok(*value)
    }

    pub async fn account_status(&self) -> Result<i64, SettlementError> {
        let value = self
            .account_status
            .get_or_try_init(|| async {
                let manager = self.manager().await?;
                self.view.check(manager.reader.account_status(&self.address).await)
            })
            .await?;
        Ok(*value)
    }

    pub async fn has_user_account_validation_rights(&self) -> Result<bool, SettlementError> {
        Ok(matches!(
            self.account_type().await?,
            account_type::CREDIT_MANAGER | account_type::USER_VALIDATOR
        ))
    }

    pub async fn has_credit_request_validation_rights(&self) -> Result<bool, SettlementError> {
        Ok(matches!(
            self.account_type().await?,
            account_type::CREDIT_MANAGER | account_type::CREDIT_REQUEST_VALIDATOR
        ))
    }

    pub async fn is_business_for_finance_backend(&self) -> Result<bool, SettlementError> {
        Ok(self.account_type().await? == account_type::BUSINESS)
    }

    pub async fn is_active_account(&self) -> Result<bool, SettlementError> {
        Ok(self.account_status().await? == STATUS_ACTIVE)
    }

    /// Message key from the wallet record, else from the ledger
    pub async fn message_key(&self) -> Result<Option<MessageKey>, SettlementError> {
        if let Some(key) = &self.record.message_key {
            return Ok(Some(key.clone()));
        }
        let manager = self.manager().await?;
        self.view.check(manager.reader.message_key(&self.address).await)
    }

    pub async fn symbol(&self) -> Result<String, SettlementError> {
        Ok(self.manager().await?.profile.symbol.clone())
    }

    pub async fn currency_name(&self) -> Result<String, SettlementError> {
        Ok(self.manager().await?.profile.name.clone())
    }

    pub async fn pool_currency_name(&self, pool: PoolKind) -> Result<String, SettlementError> {
        let manager = self.manager().await?;
        Ok(match pool {
            PoolKind::Collateralized => manager.profile.collateralized_name.clone(),
            PoolKind::MutualCredit => manager.profile.mutual_credit_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TTL_SECONDS;
    use crate::ledger::mock::{MockDiscovery, MockLedger};
    use crate::ledger::CurrencyProfile;

    fn record(address: &str, active: bool) -> WalletRecord {
        WalletRecord {
            address: address.into(),
            server: "lem".into(),
            active,
            message_key: None,
        }
    }

    fn account(ledger: Arc<MockLedger>, profile: Option<CurrencyProfile>) -> WalletAccount {
        let discovery = Arc::new(MockDiscovery::new(ledger));
        if let Some(profile) = profile {
            discovery.set_profile(profile);
        }
        let connections = Arc::new(ConnectionCache::new(discovery));
        WalletAccount::new(
            record("0xAAAA", true),
            connections,
            Arc::new(ReadCache::new(TTL_SECONDS)),
        )
    }

    #[tokio::test]
    async fn test_total_balance_sums_pools() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "12.50");
        ledger.set_balance(PoolKind::MutualCredit, "aaaa", "-2.25");
        let account = account(ledger, None);

        assert_eq!(account.address(), "aaaa");
        assert_eq!(account.total_balance(BlockRef::Pending).await.unwrap(), 1025);
        assert_eq!(
            account
                .formatted_total_balance(BlockRef::Pending)
                .await
                .unwrap(),
            "10.25"
        );
    }

    #[tokio::test]
    async fn test_pools_follow_profile() {
        let ledger = Arc::new(MockLedger::new());
        let mut profile = MockDiscovery::default_profile();
        profile.has_mutual_credit = false;
        let account = account(ledger, Some(profile));
        assert_eq!(account.pools().await.unwrap(), vec![PoolKind::Collateralized]);
        assert!(!account.has_mutual_credit().await.unwrap());
        assert!(account.is_creditable().await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_account_has_no_pools() {
        let ledger = Arc::new(MockLedger::new());
        let discovery = Arc::new(MockDiscovery::new(ledger));
        let connections = Arc::new(ConnectionCache::new(discovery));
        let account = WalletAccount::new(
            record("bbbb", false),
            connections,
            Arc::new(ReadCache::new(TTL_SECONDS)),
        );
        assert!(account.pools().await.unwrap().is_empty());
        assert!(!account.is_creditable().await.unwrap());
        assert_eq!(account.total_balance(BlockRef::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_limits_and_capacity() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_limits("aaaa", "-200.00", "1000.00");
        ledger.set_balance(PoolKind::MutualCredit, "aaaa", "250.00");
        let account = account(ledger, None);
        let view = account.view();

        assert_eq!(
            view.low_limit_room("aaaa", BlockRef::Pending).await.unwrap(),
            20_000
        );
        assert_eq!(
            view.receiver_capacity("aaaa", BlockRef::Pending)
                .await
                .unwrap(),
            75_000
        );
        let pools = view
            .sender_pools("aaaa", BlockRef::Pending, true)
            .await
            .unwrap();
        assert_eq!(
            pools.mutual_credit,
            Some(MutualCreditLine {
                balance: 25_000,
                low_limit_room: 20_000
            })
        );
    }

    #[tokio::test]
    async fn test_reads_are_cached_until_invalidated() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.00");
        let account = account(ledger.clone(), None);

        assert_eq!(
            account
                .balance(PoolKind::Collateralized, BlockRef::Pending)
                .await
                .unwrap(),
            100
        );
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "2.00");
        assert_eq!(
            account
                .balance(PoolKind::Collateralized, BlockRef::Pending)
                .await
                .unwrap(),
            100
        );
        account.view().invalidate();
        assert_eq!(
            account
                .balance(PoolKind::Collateralized, BlockRef::Pending)
                .await
                .unwrap(),
            200
        );
    }

    #[tokio::test]
    async fn test_malformed_balance() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.5");
        let account = account(ledger, None);
        let err = account
            .balance(PoolKind::Collateralized, BlockRef::Pending)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RESPONSE");
    }

    #[tokio::test]
    async fn test_malformed_limit() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_limits("aaaa", "lots", "1000.00");
        let account = account(ledger, None);
        let err = account
            .view()
            .low_limit_room("aaaa", BlockRef::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_rights_and_status() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_account_type("aaaa", account_type::CREDIT_MANAGER);
        ledger.set_account_status("aaaa", 0);
        let account = account(ledger.clone(), None);

        assert!(account.has_user_account_validation_rights().await.unwrap());
        assert!(account.has_credit_request_validation_rights().await.unwrap());
        assert!(!account.is_business_for_finance_backend().await.unwrap());
        assert!(!account.is_active_account().await.unwrap());

        // Memoized for the account lifetime
        ledger.set_account_status("aaaa", STATUS_ACTIVE);
        assert!(!account.is_active_account().await.unwrap());
    }

    #[tokio::test]
    async fn test_currency_names() {
        let ledger = Arc::new(MockLedger::new());
        let account = account(ledger, None);
        assert_eq!(account.symbol().await.unwrap(), "LEM");
        assert_eq!(account.currency_name().await.unwrap(), "Lemanique");
        assert_eq!(
            account
                .pool_currency_name(PoolKind::MutualCredit)
                .await
                .unwrap(),
            "Lemanique (credit)"
        );
    }

    #[tokio::test]
    async fn test_connection_is_established_on_first_use() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.00");
        let discovery = Arc::new(MockDiscovery::new(ledger));
        discovery.fail_with(Some(LedgerError::NoEndpointAvailable("all down".into())));
        let connections = Arc::new(ConnectionCache::new(discovery.clone()));
        let account = WalletAccount::new(
            record("aaaa", true),
            connections.clone(),
            Arc::new(ReadCache::new(TTL_SECONDS)),
        );
        assert_eq!(discovery.connect_count(), 0);

        let err = account.total_balance(BlockRef::Pending).await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_UNAVAILABLE_TRANSIENT");
        assert!(!connections.is_connected("lem"));

        // Outage at first use heals on the next call
        discovery.fail_with(None);
        assert_eq!(account.total_balance(BlockRef::Pending).await.unwrap(), 100);
        assert!(connections.is_connected("lem"));
        assert_eq!(discovery.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidated_connection_is_recreated() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.00");
        let discovery = Arc::new(MockDiscovery::new(ledger));
        let connections = Arc::new(ConnectionCache::new(discovery.clone()));
        let account = WalletAccount::new(
            record("aaaa", true),
            connections.clone(),
            Arc::new(ReadCache::new(TTL_SECONDS)),
        );

        let first = account.manager().await.unwrap();
        connections.invalidate("lem");
        assert!(!connections.is_connected("lem"));

        assert_eq!(account.total_balance(BlockRef::Pending).await.unwrap(), 100);
        assert!(connections.is_connected("lem"));
        assert_eq!(discovery.connect_count(), 2);
        assert!(!Arc::ptr_eq(&first, &account.manager().await.unwrap()));
    }

    #[tokio::test]
    async fn test_lost_endpoint_drops_connection() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_balance(PoolKind::Collateralized, "aaaa", "1.00");
        let discovery = Arc::new(MockDiscovery::new(ledger.clone()));
        let connections = Arc::new(ConnectionCache::new(discovery.clone()));
        let account = WalletAccount::new(
            record("aaaa", true),
            connections.clone(),
            Arc::new(ReadCache::new(TTL_SECONDS)),
        );
        account.manager().await.unwrap();

        ledger.fail_reads(Some(LedgerError::NoEndpointAvailable("gone".into())));
        let err = account
            .balance(PoolKind::Collateralized, BlockRef::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Ledger(LedgerError::NoEndpointAvailable(_))
        ));
        assert!(!connections.is_connected("lem"));

        ledger.fail_reads(None);
        assert_eq!(
            account
                .balance(PoolKind::Collateralized, BlockRef::Pending)
                .await
                .unwrap(),
            100
        );
        assert_eq!(discovery.connect_count(), 2);
    }

    #[test]
    fn test_wallet_record_defaults() {
        let record: WalletRecord =
            serde_json::from_str(r#"{"address": "0xab", "server": "lem"}"#).unwrap();
        assert!(record.active);
        assert!(record.message_key.is_none());
    }
}
