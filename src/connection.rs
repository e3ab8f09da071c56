//! Currency Manager Connection Cache
//!
//! One live ledger connection ("currency manager") per currency server,
//! shared by every account and recipient of the process.
//!
//! # Single-flight
//!
//! The first caller for a key starts server discovery and stores the
//! in-flight attempt as a shared future. Concurrent callers for the same key
//! await that same attempt instead of starting their own.
//!
//! # Failure handling
//!
//! A failed attempt is removed so the next call re-discovers from scratch.
//! `NoEndpointAvailable` is wrapped into
//! [`SettlementError::BackendUnavailableTransient`]; the wrapper is memoized
//! per `(key, attempt)` so every observer of one failed attempt gets the same
//! `Arc<BackendOutage>`.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{BackendOutage, SettlementError};
use crate::ledger::{
    CurrencyDiscovery, CurrencyProfile, LedgerError, LedgerReader, LedgerWriter, MemoCipher,
};

/// Live connection to one currency server
pub struct CurrencyManager {
    pub server: String,
    pub profile: CurrencyProfile,
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub memo: Arc<dyn MemoCipher>,
}

impl fmt::Debug for CurrencyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrencyManager")
            .field("server", &self.server)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

type ConnectResult = Result<Arc<CurrencyManager>, Arc<LedgerError>>;
type ConnectFuture = Shared<BoxFuture<'static, ConnectResult>>;

enum Slot {
    Connecting { attempt: u64, future: ConnectFuture },
    Ready(Arc<CurrencyManager>),
}

/// Per-key connection cache with single-flight acquisition
pub struct ConnectionCache {
    discovery: Arc<dyn CurrencyDiscovery>,
    slots: Mutex<HashMap<String, Slot>>,
    outages: Mutex<HashMap<(String, u64), Arc<BackendOutage>>>,
    next_attempt: AtomicU64,
}

impl ConnectionCache {
    pub fn new(discovery: Arc<dyn CurrencyDiscovery>) -> Self {
        Self {
            discovery,
            slots: Mutex::new(HashMap::new()),
            outages: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Get the connection for `key`, connecting on first use.
    pub async fn get(&self, key: &str) -> Result<Arc<CurrencyManager>, SettlementError> {
        let (attempt, future) = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(key) {
                Some(Slot::Ready(manager)) => return Ok(manager.clone()),
                Some(Slot::Connecting { attempt, future }) => {
                    debug!(key = %key, attempt = *attempt, "Joining in-flight connection attempt");
                    (*attempt, future.clone())
                }
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    let future = self.connect_future(key);
                    slots.insert(
                        key.to_string(),
                        Slot::Connecting {
                            attempt,
                            future: future.clone(),
                        },
                    );
                    info!(key = %key, attempt, "Discovering currency server");
                    (attempt, future)
                }
            }
        };

        match future.await {
            Ok(manager) => {
                self.promote(key, attempt, &manager);
                Ok(manager)
            }
            Err(err) => {
                self.forget_attempt(key, attempt);
                match err.as_ref() {
                    LedgerError::NoEndpointAvailable(reason) => Err(
                        SettlementError::BackendUnavailableTransient(self.outage(key, attempt, reason)),
                    ),
                    other => {
                        warn!(key = %key, attempt, error = %other, "Currency server connection failed");
                        Err(SettlementError::Ledger(other.clone()))
                    }
                }
            }
        }
    }

    /// Drop a resolved connection so the next call reconnects
    pub fn invalidate(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Slot::Ready(_)) = slots.get(key) {
            slots.remove(key);
            info!(key = %key, "Currency server connection invalidated");
        }
    }

    /// Whether a resolved connection is cached for `key`
    pub fn is_connected(&self, key: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        matches!(slots.get(key), Some(Slot::Ready(_)))
    }

    fn connect_future(&self, key: &str) -> ConnectFuture {
        let discovery = self.discovery.clone();
        let server = key.to_string();
        async move {
            discovery
                .connect(&server)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    fn promote(&self, key: &str, attempt: u64, manager: &Arc<CurrencyManager>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Slot::Connecting { attempt: current, .. }) = slots.get(key)
            && *current == attempt
        {
            slots.insert(key.to_string(), Slot::Ready(manager.clone()));
            info!(key = %key, attempt, "Currency server connected");
        }
    }

    fn forget_attempt(&self, key: &str, attempt: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Slot::Connecting { attempt: current, .. }) = slots.get(key)
            && *current == attempt
        {
            slots.remove(key);
        }
    }

    fn outage(&self, key: &str, attempt: u64, reason: &str) -> Arc<BackendOutage> {
        let mut outages = self.outages.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = outages.get(&(key.to_string(), attempt)) {
            return existing.clone();
        }
        // Older attempts for this key can no longer be observed by new callers
        outages.retain(|(k, a), _| k != key || *a > attempt);
        let outage = Arc::new(BackendOutage {
            key: key.to_string(),
            attempt,
            reason: reason.to_string(),
        });
        warn!(key = %key, attempt, reason = %reason, "Backend unavailable, connection cleared");
        outages.insert((key.to_string(), attempt), outage.clone());
        outage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::{MockDiscovery, MockLedger};
    use futures::future::join_all;
    use std::time::Duration;

    fn discovery() -> Arc<MockDiscovery> {
        Arc::new(MockDiscovery::new(Arc::new(MockLedger::new())))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_discovery() {
        let discovery = discovery();
        discovery.set_delay(Duration::from_millis(50));
        let cache = ConnectionCache::new(discovery.clone());

        let results = join_all((0..10).map(|_| cache.get("lem"))).await;

        let managers: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(discovery.connect_count(), 1);
        assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));
        assert!(cache.is_connected("lem"));
    }

    #[tokio::test]
    async fn test_resolved_connection_is_reused() {
        let discovery = discovery();
        let cache = ConnectionCache::new(discovery.clone());

        let first = cache.get("lem").await.unwrap();
        let second = cache.get("lem").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(discovery.connect_count(), 1);

        // Distinct keys get distinct connections
        cache.get("other").await.unwrap();
        assert_eq!(discovery.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_memoized_per_attempt() {
        let discovery = discovery();
        discovery.set_delay(Duration::from_millis(20));
        discovery.fail_with(Some(LedgerError::NoEndpointAvailable("all down".into())));
        let cache = ConnectionCache::new(discovery.clone());

        let results = join_all((0..3).map(|_| cache.get("lem"))).await;
        let outages: Vec<Arc<BackendOutage>> = results
            .into_iter()
            .map(|r| match r {
                Err(SettlementError::BackendUnavailableTransient(o)) => o,
                other => panic!("unexpected result: {:?}", other),
            })
            .collect();
        assert_eq!(discovery.connect_count(), 1);
        assert!(outages.iter().all(|o| Arc::ptr_eq(o, &outages[0])));
        assert!(!cache.is_connected("lem"));

        // Next call retries discovery and reports a new outage
        let retry = cache.get("lem").await;
        assert_eq!(discovery.connect_count(), 2);
        match retry {
            Err(SettlementError::BackendUnavailableTransient(o)) => {
                assert!(!Arc::ptr_eq(&o, &outages[0]));
                assert!(o.attempt > outages[0].attempt);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Recovery after the backend comes back
        discovery.fail_with(None);
        assert!(cache.get("lem").await.is_ok());
        assert_eq!(discovery.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_other_failures_propagate_unchanged() {
        let discovery = discovery();
        discovery.fail_with(Some(LedgerError::Network("reset".into())));
        let cache = ConnectionCache::new(discovery.clone());

        let err = cache.get("lem").await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Ledger(LedgerError::Network(ref m)) if m == "reset"
        ));

        discovery.fail_with(None);
        assert!(cache.get("lem").await.is_ok());
        assert_eq!(discovery.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let discovery = discovery();
        let cache = ConnectionCache::new(discovery.clone());

        let first = cache.get("lem").await.unwrap();
        cache.invalidate("lem");
        assert!(!cache.is_connected("lem"));
        let second = cache.get("lem").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(discovery.connect_count(), 2);
    }
}
