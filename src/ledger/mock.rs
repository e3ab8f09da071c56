//! In-memory collaborators for tests and local development
//!
//! Compiled for unit tests and with the `mock-api` feature.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::{
    AccountActivation, AccountParams, BlockRef, Contact, CreationDiscard, CurrencyDiscovery,
    CurrencyProfile, IdentityError, IdentityService, LedgerError, LedgerReader, LedgerWriter,
    MemoCipher, MessageKey, PendingTopUp, PoolKind, RawTransaction, SigningHandle, WalletError,
    WalletUnlocker, normalize_address, prefixed_address,
};
use crate::cache::ReadOp;
use crate::connection::CurrencyManager;
use crate::money::Cents;

/// A transfer accepted by [`MockLedger`]
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub pool: PoolKind,
    pub from: String,
    pub dest: String,
    pub amount: Cents,
    pub memo: String,
    pub tx_hash: String,
}

#[derive(Default)]
struct LedgerState {
    pending: HashMap<(ReadOp, String), String>,
    confirmed: HashMap<(ReadOp, String), String>,
    types: HashMap<String, i64>,
    statuses: HashMap<String, i64>,
    histories: HashMap<String, Vec<RawTransaction>>,
    message_keys: HashMap<String, MessageKey>,
    submissions: Vec<Submission>,
    submitted: HashMap<String, (RawTransaction, Instant)>,
    transfer_failure: Option<(Option<PoolKind>, LedgerError)>,
    read_failure: Option<LedgerError>,
    transfer_response: Option<String>,
    confirm_after: Option<Duration>,
    ignore_account_params: bool,
    account_params: Vec<(String, AccountParams)>,
    list_calls: Vec<(String, usize, usize)>,
    export_calls: Vec<(String, i64, i64)>,
}

/// In-memory ledger node (read and write side)
///
/// Reads against [`BlockRef::Pending`] use the pending values; reads at a
/// block number use the confirmed values, falling back to pending ones when
/// none were set.
pub struct MockLedger {
    state: Mutex<LedgerState>,
    block: AtomicU64,
    next_tx: AtomicU64,
    info_calls: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                confirm_after: Some(Duration::ZERO),
                ..LedgerState::default()
            }),
            block: AtomicU64::new(100),
            next_tx: AtomicU64::new(1),
            info_calls: AtomicUsize::new(0),
        }
    }

    fn pool_op(pool: PoolKind) -> ReadOp {
        match pool {
            PoolKind::Collateralized => ReadOp::CollateralizedBalance,
            PoolKind::MutualCredit => ReadOp::MutualCreditBalance,
        }
    }

    /// Same balance in the pending and the confirmed view
    pub fn set_balance(&self, pool: PoolKind, address: &str, value: &str) {
        self.set_pending_balance(pool, address, value);
        self.set_confirmed_balance(pool, address, value);
    }

    pub fn set_pending_balance(&self, pool: PoolKind, address: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state.pending.insert(
            (Self::pool_op(pool), normalize_address(address)),
            value.to_string(),
        );
    }

    pub fn set_confirmed_balance(&self, pool: PoolKind, address: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state.confirmed.insert(
            (Self::pool_op(pool), normalize_address(address)),
            value.to_string(),
        );
    }

    /// Mutual-credit limits, same in both views
    pub fn set_limits(&self, address: &str, below: &str, above: &str) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let address = normalize_address(address);
        for map in [&mut state.pending, &mut state.confirmed] {
            map.insert((ReadOp::LimitBelow, address.clone()), below.to_string());
            map.insert((ReadOp::LimitAbove, address.clone()), above.to_string());
        }
    }

    pub fn set_account_type(&self, address: &str, account_type: i64) {
        let mut state = self.state.lock().unwrap();
        state.types.insert(normalize_address(address), account_type);
    }

    pub fn set_account_status(&self, address: &str, status: i64) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(normalize_address(address), status);
    }

    pub fn set_history(&self, address: &str, entries: Vec<RawTransaction>) {
        let mut state = self.state.lock().unwrap();
        state.histories.insert(normalize_address(address), entries);
    }

    pub fn set_message_key(&self, address: &str, key: MessageKey) {
        let mut state = self.state.lock().unwrap();
        state.message_keys.insert(normalize_address(address), key);
    }

    pub fn set_current_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    /// Make every transfer fail with `err` (None restores success)
    /// Fail every balance and limit read with `err`
    pub fn fail_reads(&self, err: Option<LedgerError>) {
        self.state.lock().unwrap().read_failure = err;
    }

    pub fn fail_transfers(&self, err: Option<LedgerError>) {
        self.state.lock().unwrap().transfer_failure = err.map(|e| (None, e));
    }

    /// Make transfers in `pool` fail with `err`, the other pool still works
    pub fn fail_transfers_in(&self, pool: PoolKind, err: LedgerError) {
        self.state.lock().unwrap().transfer_failure = Some((Some(pool), err));
    }

    /// Return `id` instead of a generated transaction hash
    pub fn respond_with(&self, id: Option<String>) {
        self.state.lock().unwrap().transfer_response = id;
    }

    /// Delay before submitted transactions become visible (None = never)
    pub fn confirm_after(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().confirm_after = delay;
    }

    /// Accept `set_account_param` without changing the status
    pub fn ignore_account_params(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_account_params = ignore;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn account_params(&self) -> Vec<(String, AccountParams)> {
        self.state.lock().unwrap().account_params.clone()
    }

    pub fn list_calls(&self) -> Vec<(String, usize, usize)> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn export_calls(&self) -> Vec<(String, i64, i64)> {
        self.state.lock().unwrap().export_calls.clone()
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    fn read(&self, op: ReadOp, address: &str, block: BlockRef) -> Result<String, LedgerError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.read_failure {
            return Err(err.clone());
        }
        let key = (op, normalize_address(address));
        let confirmed = match block {
            BlockRef::Pending => None,
            BlockRef::Number(_) => state.confirmed.get(&key),
        };
        Ok(confirmed
            .or_else(|| state.pending.get(&key))
            .cloned()
            .unwrap_or_else(|| "0.00".to_string()))
    }

    fn submit(
        &self,
        pool: PoolKind,
        wallet: &SigningHandle,
        dest_address: &str,
        amount: Cents,
        memo: &str,
    ) -> Result<String, LedgerError> {
        let mut state = self.state.lock().unwrap();
        if let Some((scope, err)) = &state.transfer_failure
            && scope.is_none_or(|p| p == pool)
        {
            return Err(err.clone());
        }
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let tx_hash = state
            .transfer_response
            .clone()
            .unwrap_or_else(|| format!("0x{:064x}", n));

        let mut extra = serde_json::Map::new();
        extra.insert("memo".into(), serde_json::Value::String(memo.to_string()));
        let raw = RawTransaction {
            hash: tx_hash.clone(),
            block: Some(self.block.load(Ordering::SeqCst) + 1),
            time: chrono::Utc::now().timestamp(),
            status: 0,
            direction: 1,
            addr_from: prefixed_address(&wallet.address),
            addr_to: prefixed_address(dest_address),
            sent: amount,
            received: amount,
            kind: Some(
                match pool {
                    PoolKind::Collateralized => "Transfer",
                    PoolKind::MutualCredit => "TransferCredit",
                }
                .to_string(),
            ),
            extra,
        };
        state
            .submitted
            .insert(tx_hash.clone(), (raw, Instant::now()));
        state.submissions.push(Submission {
            pool,
            from: normalize_address(&wallet.address),
            dest: normalize_address(dest_address),
            amount,
            memo: memo.to_string(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn collateralized_balance(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<String, LedgerError> {
        self.read(ReadOp::CollateralizedBalance, address, block)
    }

    async fn mutual_credit_balance(
        &self,
        address: &str,
        block: BlockRef,
    ) -> Result<String, LedgerError> {
        self.read(ReadOp::MutualCreditBalance, address, block)
    }

    async fn limit_below(&self, address: &str, block: BlockRef) -> Result<String, LedgerError> {
        self.read(ReadOp::LimitBelow, address, block)
    }

    async fn limit_above(&self, address: &str, block: BlockRef) -> Result<String, LedgerError> {
        self.read(ReadOp::LimitAbove, address, block)
    }

    async fn account_type(&self, address: &str) -> Result<i64, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(*state.types.get(&normalize_address(address)).unwrap_or(&0))
    }

    async fn account_status(&self, address: &str) -> Result<i64, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(*state.statuses.get(&normalize_address(address)).unwrap_or(&1))
    }

    async fn transaction_list(
        &self,
        address: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawTransaction>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push((address.to_string(), limit, offset));
        let history = state
            .histories
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default();
        Ok(history.into_iter().skip(offset).take(limit).collect())
    }

    async fn export_transaction_list(
        &self,
        address: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<RawTransaction>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state
            .export_calls
            .push((address.to_string(), from_epoch, to_epoch));
        let history = state
            .histories
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default();
        Ok(history
            .into_iter()
            .filter(|t| t.time >= from_epoch && t.time <= to_epoch)
            .collect())
    }

    async fn transaction_info(&self, tx_id: &str) -> Result<RawTransaction, LedgerError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let not_found = || LedgerError::NotFound(tx_id.to_string());
        let (raw, submitted_at) = state.submitted.get(tx_id).ok_or_else(not_found)?;
        match state.confirm_after {
            Some(delay) if submitted_at.elapsed() >= delay => Ok(raw.clone()),
            _ => Err(not_found()),
        }
    }

    async fn current_block(&self) -> Result<u64, LedgerError> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn message_key(&self, address: &str) -> Result<Option<MessageKey>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.message_keys.get(&normalize_address(address)).cloned())
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    async fn transfer_collateralized(
        &self,
        wallet: &SigningHandle,
        dest_address: &str,
        amount: Cents,
        memo: &str,
    ) -> Result<String, LedgerError> {
        self.submit(PoolKind::Collateralized, wallet, dest_address, amount, memo)
    }

    async fn transfer_mutual_credit(
        &self,
        wallet: &SigningHandle,
        dest_address: &str,
        amount: Cents,
        memo: &str,
    ) -> Result<String, LedgerError> {
        self.submit(PoolKind::MutualCredit, wallet, dest_address, amount, memo)
    }

    async fn set_account_param(
        &self,
        _wallet: &SigningHandle,
        address: &str,
        params: AccountParams,
    ) -> Result<String, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state
            .account_params
            .push((normalize_address(address), params));
        if !state.ignore_account_params {
            state
                .statuses
                .insert(normalize_address(address), params.status);
        }
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(format!("0x{:064x}", n))
    }
}

/// Plain-text "cipher": `sender_memo|recipient_memo` stored under `memo`
#[derive(Debug, Default)]
pub struct MockMemoCipher;

impl MemoCipher for MockMemoCipher {
    fn encrypt(
        &self,
        _sender_key: Option<&str>,
        _recipient_key: Option<&str>,
        sender_memo: &str,
        recipient_memo: &str,
    ) -> Result<String, LedgerError> {
        Ok(format!("{}|{}", sender_memo, recipient_memo))
    }

    fn decrypt(
        &self,
        raw: &RawTransaction,
        address: &str,
        _message_key: &MessageKey,
    ) -> Result<String, LedgerError> {
        let memo = raw
            .extra
            .get("memo")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::Memo("no memo".into()))?;
        let (sender, recipient) = memo
            .split_once('|')
            .ok_or_else(|| LedgerError::Memo("undecipherable memo".into()))?;
        if normalize_address(&raw.addr_from) == normalize_address(address) {
            Ok(sender.to_string())
        } else {
            Ok(recipient.to_string())
        }
    }
}

/// Currency discovery returning managers backed by one [`MockLedger`]
pub struct MockDiscovery {
    ledger: Arc<MockLedger>,
    profile: Mutex<CurrencyProfile>,
    delay: Mutex<Option<Duration>>,
    failure: Mutex<Option<LedgerError>>,
    connects: AtomicUsize,
}

impl MockDiscovery {
    pub fn new(ledger: Arc<MockLedger>) -> Self {
        Self {
            ledger,
            profile: Mutex::new(Self::default_profile()),
            delay: Mutex::new(None),
            failure: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn default_profile() -> CurrencyProfile {
        CurrencyProfile {
            symbol: "LEM".into(),
            name: "Lemanique".into(),
            collateralized_name: "Lemanique (backed)".into(),
            mutual_credit_name: "Lemanique (credit)".into(),
            has_collateralized: true,
            has_mutual_credit: true,
        }
    }

    pub fn set_profile(&self, profile: CurrencyProfile) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_with(&self, err: Option<LedgerError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CurrencyDiscovery for MockDiscovery {
    async fn connect(&self, server: &str) -> Result<CurrencyManager, LedgerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(CurrencyManager {
            server: server.to_string(),
            profile: self.profile.lock().unwrap().clone(),
            reader: self.ledger.clone(),
            writer: self.ledger.clone(),
            memo: Arc::new(MockMemoCipher),
        })
    }
}

/// Identity service with canned answers and call recording
#[derive(Default)]
pub struct MockIdentity {
    contacts: Mutex<HashMap<String, Contact>>,
    reconversions: Mutex<HashMap<String, bool>>,
    reconversion_endpoint_missing: Mutex<bool>,
    contact_calls: Mutex<Vec<Vec<String>>>,
    reconversion_calls: Mutex<Vec<Vec<String>>>,
    activations: Mutex<Vec<AccountActivation>>,
    discards: Mutex<Vec<CreationDiscard>>,
    top_ups: Mutex<HashMap<String, Vec<PendingTopUp>>>,
    top_up_calls: Mutex<Vec<String>>,
    credit_calls: Mutex<Vec<(String, Cents)>>,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contact(&self, address: &str, public_name: &str) {
        self.contacts.lock().unwrap().insert(
            normalize_address(address),
            Contact {
                id: None,
                public_name: Some(public_name.to_string()),
            },
        );
    }

    pub fn set_reconversion(&self, tx_id: &str, pending: bool) {
        self.reconversions
            .lock()
            .unwrap()
            .insert(tx_id.to_string(), pending);
    }

    /// Simulate a host that does not expose the reconversion endpoint
    pub fn set_reconversion_endpoint_missing(&self, missing: bool) {
        *self.reconversion_endpoint_missing.lock().unwrap() = missing;
    }

    pub fn contact_calls(&self) -> Vec<Vec<String>> {
        self.contact_calls.lock().unwrap().clone()
    }

    pub fn reconversion_calls(&self) -> Vec<Vec<String>> {
        self.reconversion_calls.lock().unwrap().clone()
    }

    pub fn activations(&self) -> Vec<AccountActivation> {
        self.activations.lock().unwrap().clone()
    }

    pub fn discards(&self) -> Vec<CreationDiscard> {
        self.discards.lock().unwrap().clone()
    }

    pub fn set_pending_top_ups(&self, address: &str, top_ups: Vec<PendingTopUp>) {
        self.top_ups
            .lock()
            .unwrap()
            .insert(normalize_address(address), top_ups);
    }

    pub fn top_up_calls(&self) -> Vec<String> {
        self.top_up_calls.lock().unwrap().clone()
    }

    pub fn credit_calls(&self) -> Vec<(String, Cents)> {
        self.credit_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityService for MockIdentity {
    async fn resolve_contacts(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, Contact>, IdentityError> {
        self.contact_calls.lock().unwrap().push(addresses.to_vec());
        let contacts = self.contacts.lock().unwrap();
        Ok(addresses
            .iter()
            .filter_map(|a| contacts.get(a).map(|c| (a.clone(), c.clone())))
            .collect())
    }

    async fn reconversion_status(
        &self,
        tx_ids: &[String],
    ) -> Result<HashMap<String, bool>, IdentityError> {
        self.reconversion_calls.lock().unwrap().push(tx_ids.to_vec());
        if *self.reconversion_endpoint_missing.lock().unwrap() {
            return Err(IdentityError::NotFound("/partner/reconversions".into()));
        }
        let known = self.reconversions.lock().unwrap();
        Ok(tx_ids
            .iter()
            .filter_map(|id| known.get(id).map(|s| (id.clone(), *s)))
            .collect())
    }

    async fn activate_account(&self, activation: &AccountActivation) -> Result<(), IdentityError> {
        self.activations.lock().unwrap().push(activation.clone());
        Ok(())
    }

    async fn discard_creations(&self, discards: &[CreationDiscard]) -> Result<(), IdentityError> {
        self.discards.lock().unwrap().extend_from_slice(discards);
        Ok(())
    }

    async fn credit_url(&self, address: &str, amount: Cents) -> Result<String, IdentityError> {
        self.credit_calls
            .lock()
            .unwrap()
            .push((address.to_string(), amount));
        Ok(format!(
            "https://pay.example/credit?address={}&amount={}",
            address, amount
        ))
    }

    async fn pending_top_ups(&self, address: &str) -> Result<Vec<PendingTopUp>, IdentityError> {
        self.top_up_calls.lock().unwrap().push(address.to_string());
        Ok(self
            .top_ups
            .lock()
            .unwrap()
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default())
    }
}

/// Wallet unlocker that always succeeds unless locked
#[derive(Default)]
pub struct MockWallet {
    locked: Mutex<bool>,
    unlocks: AtomicUsize,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_locked(&self, locked: bool) {
        *self.locked.lock().unwrap() = locked;
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletUnlocker for MockWallet {
    async fn unlock(&self, address: &str) -> Result<SigningHandle, WalletError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if *self.locked.lock().unwrap() {
            return Err(WalletError::Locked("wrong password".into()));
        }
        Ok(SigningHandle {
            address: normalize_address(address),
            secret: b"mock-secret".to_vec(),
        })
    }
}

/// Build a raw history entry for `owner`
///
/// `outbound` entries are sent by `owner` to `counterparty`, the others are
/// received from it.
pub fn raw_entry(
    hash: &str,
    owner: &str,
    counterparty: &str,
    outbound: bool,
    amount: Cents,
    time: i64,
) -> RawTransaction {
    let owner = prefixed_address(owner);
    let counterparty = if counterparty.starts_with("0x") || counterparty == "Admin" {
        counterparty.to_string()
    } else {
        prefixed_address(counterparty)
    };
    let (addr_from, addr_to, direction) = if outbound {
        (owner, counterparty, 1)
    } else {
        (counterparty, owner, 2)
    };
    RawTransaction {
        hash: hash.to_string(),
        block: Some(1),
        time,
        status: 0,
        direction,
        addr_from,
        addr_to,
        sent: amount,
        received: amount,
        kind: Some("Transfer".into()),
        extra: serde_json::Map::new(),
    }
}
