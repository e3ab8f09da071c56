//! TTL cache for ledger reads
//!
//! Balances, limits and account flags change with every confirmed
//! transaction, so they are only kept for a short lifetime. The cache is an
//! explicit component keyed by `(operation, args)` and injected where reads
//! happen.

use cached::{Cached, TimedCache};
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use crate::ledger::BlockRef;

/// Default lifetime in seconds
pub const TTL_SECONDS: u64 = 5;

/// Remote read operations that go through the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOp {
    CollateralizedBalance,
    MutualCreditBalance,
    LimitBelow,
    LimitAbove,
}

/// Cache key: the operation and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadKey {
    pub op: ReadOp,
    pub address: String,
    pub block: BlockRef,
}

impl ReadKey {
    pub fn new(op: ReadOp, address: &str, block: BlockRef) -> Self {
        Self {
            op,
            address: address.to_string(),
            block,
        }
    }
}

/// Thread-safe wrapper around `cached::TimedCache`
///
/// The lock is never held across an `.await`.
pub struct TtlCache<K, V> {
    inner: Mutex<TimedCache<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl_seconds)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache_get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache_set(key, value);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cache_clear();
    }

    /// Return the cached value or run `load` and cache a successful result.
    ///
    /// Errors are never cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

/// Cache used for balance and limit reads (raw decimal strings)
pub type ReadCache = TtlCache<ReadKey, String>;
