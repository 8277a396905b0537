//! Time-bounded connection cache.
//!
//! Maps tenant id → live pooled connection handle, avoiding repeated
//! connection setup and registry lookups. Entries expire a fixed TTL after
//! insertion (not last use): tenants are numerous and connections are
//! comparatively expensive, and a short TTL keeps credential rotations from
//! going stale for long.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{TenancyError, TenancyResult};
use crate::pool::PoolProvider;
use crate::registry::TenantRegistry;
use crate::vault::CredentialVault;

struct CacheEntry<T> {
    pool: T,
    inserted_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Tenant-id-keyed cache of pooled connection handles.
///
/// Safe under concurrent calls for different tenants and for the same
/// tenant: a miss takes a per-tenant build lock so only one pool is built
/// per tenant, while hits for other tenants proceed without blocking.
pub struct ConnectionCache<P: PoolProvider> {
    provider: Arc<P>,
    registry: Arc<dyn TenantRegistry>,
    vault: Arc<CredentialVault>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<P::Pool>>>,
    build_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P: PoolProvider> ConnectionCache<P> {
    /// Create a cache over the given provider, registry, and vault.
    pub fn new(
        provider: Arc<P>,
        registry: Arc<dyn TenantRegistry>,
        vault: Arc<CredentialVault>,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            registry,
            vault,
            ttl,
            entries: RwLock::new(HashMap::new()),
            build_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Get the pooled handle for a tenant, building it on a miss.
    ///
    /// On a miss: resolve the tenant via the registry (must be `Active`),
    /// decrypt its connection string, connect, and run one health-check
    /// round trip. Only a healthy pool is cached. Failures are
    /// non-retryable by the cache itself; retry policy belongs to callers.
    pub async fn get(&self, tenant_id: &str) -> TenancyResult<P::Pool> {
        if let Some(pool) = self.get_fresh(tenant_id).await {
            debug!(tenant_id, "connection cache hit");
            return Ok(pool);
        }

        // Single-flight: one build per tenant id. Entries for other tenants
        // stay readable while this lock is held.
        let build_lock = {
            let mut locks = self.build_locks.lock();
            Arc::clone(locks.entry(tenant_id.to_string()).or_default())
        };

        let result = {
            let _guard = build_lock.lock().await;

            // A concurrent caller may have finished the build while we
            // waited.
            if let Some(pool) = self.get_fresh(tenant_id).await {
                debug!(tenant_id, "connection cache hit after build wait");
                Ok(pool)
            } else {
                debug!(tenant_id, "connection cache miss");
                match self.build(tenant_id).await {
                    Ok(pool) => {
                        let mut entries = self.entries.write().await;
                        if let Some(old) = entries.insert(
                            tenant_id.to_string(),
                            CacheEntry {
                                pool: pool.clone(),
                                inserted_at: Instant::now(),
                            },
                        ) {
                            self.provider.close(&old.pool).await;
                        }
                        Ok(pool)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        drop(build_lock);
        self.prune_build_lock(tenant_id);

        result
    }

    /// Drop a tenant's build lock once nobody is waiting on it, so the lock
    /// map does not accumulate an entry per tenant id ever requested.
    fn prune_build_lock(&self, tenant_id: &str) {
        let mut locks = self.build_locks.lock();
        if let Some(lock) = locks.get(tenant_id)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(tenant_id);
        }
    }

    /// Return a fresh cached handle, lazily evicting an expired one.
    async fn get_fresh(&self, tenant_id: &str) -> Option<P::Pool> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(tenant_id) {
                Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.pool.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let removed = {
                let mut entries = self.entries.write().await;
                match entries.get(tenant_id) {
                    Some(entry) if entry.is_expired(self.ttl) => entries.remove(tenant_id),
                    // Rebuilt by another caller between our locks.
                    Some(entry) => return Some(entry.pool.clone()),
                    None => None,
                }
            };
            if let Some(entry) = removed {
                debug!(tenant_id, "evicting expired connection pool");
                self.provider.close(&entry.pool).await;
            }
        }

        None
    }

    async fn build(&self, tenant_id: &str) -> TenancyResult<P::Pool> {
        let tenant = self.registry.find_active_tenant(tenant_id).await?;

        let ciphertext = tenant.encrypted_connection_string.as_deref().ok_or_else(|| {
            // An Active tenant always has a connection string; a missing one
            // means the registry row was tampered with or mis-migrated.
            TenancyError::Registry(format!(
                "active tenant {tenant_id} has no connection string"
            ))
        })?;
        let connection_string = self.vault.decrypt(ciphertext)?;

        let pool = self.provider.connect(&connection_string).await?;
        if let Err(e) = self.provider.health_check(&pool).await {
            self.provider.close(&pool).await;
            return Err(e);
        }

        info!(tenant_id, "built connection pool");
        Ok(pool)
    }

    /// Close and remove one tenant's cached handle.
    pub async fn invalidate(&self, tenant_id: &str) {
        let removed = self.entries.write().await.remove(tenant_id);
        if let Some(entry) = removed {
            debug!(tenant_id, "invalidating connection pool");
            self.provider.close(&entry.pool).await;
        }
    }

    /// Remove and close all expired entries. Optional periodic pass; the
    /// cache also evicts lazily on access.
    pub async fn sweep(&self) {
        let expired: Vec<(String, CacheEntry<P::Pool>)> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.is_expired(self.ttl))
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e)))
                .collect()
        };
        for (tenant_id, entry) in expired {
            debug!(tenant_id = %tenant_id, "sweeping expired connection pool");
            self.provider.close(&entry.pool).await;
        }
    }

    /// Close and remove every cached handle.
    pub async fn clear(&self) {
        let drained: Vec<CacheEntry<P::Pool>> = {
            let mut entries = self.entries.write().await;
            entries.drain().map(|(_, e)| e).collect()
        };
        for entry in drained {
            self.provider.close(&entry.pool).await;
        }
    }

    /// Number of cached entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{QueryParam, QueryRow};
    use crate::registry::{new_placeholder, InMemoryTenantRegistry};
    use crate::tenant::TenantStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock pool: each `connect` yields a pool with a distinct serial.
    #[derive(Clone, Debug, PartialEq)]
    struct MockPool {
        serial: usize,
    }

    struct MockPoolProvider {
        connects: AtomicUsize,
        closes: AtomicUsize,
        fail_health_check: bool,
    }

    impl MockPoolProvider {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_health_check: false,
            }
        }

        fn failing_health_check() -> Self {
            Self {
                fail_health_check: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl PoolProvider for MockPoolProvider {
        type Pool = MockPool;

        async fn connect(&self, _connection_string: &str) -> TenancyResult<Self::Pool> {
            let serial = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(MockPool { serial })
        }

        async fn health_check(&self, _pool: &Self::Pool) -> TenancyResult<()> {
            if self.fail_health_check {
                Err(TenancyError::DatabaseUnavailable(
                    "health check failed".to_string(),
                ))
            } else {
                Ok(())
            }
        }

        async fn close(&self, _pool: &Self::Pool) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        async fn fetch(
            &self,
            _pool: &Self::Pool,
            _statement: &str,
            _params: &[QueryParam],
        ) -> TenancyResult<Vec<QueryRow>> {
            Ok(Vec::new())
        }

        async fn execute(
            &self,
            _pool: &Self::Pool,
            _statement: &str,
            _params: &[QueryParam],
        ) -> TenancyResult<u64> {
            Ok(0)
        }
    }

    fn vault() -> Arc<CredentialVault> {
        let key = CredentialVault::generate_key();
        Arc::new(CredentialVault::new(Some(&key)).unwrap())
    }

    async fn seeded_registry(vault: &CredentialVault) -> (Arc<InMemoryTenantRegistry>, String) {
        let registry = Arc::new(InMemoryTenantRegistry::new());
        let mut tenant = new_placeholder("Acme Corp");
        tenant.status = TenantStatus::Active;
        tenant.encrypted_connection_string =
            Some(vault.encrypt("postgres://localhost/tenant_acme").unwrap());
        tenant.database_name = Some("tenant_acme".to_string());
        let id = tenant.id.clone();
        registry.insert(tenant);
        (registry, id)
    }

    fn cache_with(
        provider: MockPoolProvider,
        registry: Arc<InMemoryTenantRegistry>,
        vault: Arc<CredentialVault>,
        ttl: Duration,
    ) -> ConnectionCache<MockPoolProvider> {
        ConnectionCache::new(Arc::new(provider), registry, vault, ttl)
    }

    #[tokio::test]
    async fn test_hit_returns_same_handle() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        );

        let first = cache.get(&id).await.unwrap();
        let second = cache.get(&id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.provider.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_rebuilds() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_millis(10),
        );

        let first = cache.get(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = cache.get(&id).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(cache.provider.connects.load(Ordering::SeqCst), 2);
        assert_eq!(cache.provider.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let vault = vault();
        let registry = Arc::new(InMemoryTenantRegistry::new());
        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        );

        let err = cache.get("does-not-exist").await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound(_)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_inactive_tenant_carries_status() {
        let vault = vault();
        let registry = Arc::new(InMemoryTenantRegistry::new());
        let tenant = new_placeholder("Acme Corp");
        let id = tenant.id.clone();
        registry.insert(tenant);

        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        );
        let err = cache.get(&id).await.unwrap_err();
        assert!(matches!(
            err,
            TenancyError::TenantUnavailable {
                status: TenantStatus::Creating,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_health_check_caches_nothing() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = cache_with(
            MockPoolProvider::failing_health_check(),
            registry,
            vault,
            Duration::from_secs(300),
        );

        let err = cache.get(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::DatabaseUnavailable(_)));
        assert!(cache.is_empty().await);
        // The unhealthy pool was released, not leaked.
        assert_eq!(cache.provider.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_configuration_error() {
        let vault = vault();
        let registry = Arc::new(InMemoryTenantRegistry::new());
        let mut tenant = new_placeholder("Acme Corp");
        tenant.status = TenantStatus::Active;
        tenant.encrypted_connection_string = Some("garbage".to_string());
        let id = tenant.id.clone();
        registry.insert(tenant);

        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        );
        let err = cache.get(&id).await.unwrap_err();
        assert!(matches!(err, TenancyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_concurrent_misses_build_once() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = Arc::new(cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            handles.push(tokio::spawn(async move { cache.get(&id).await }));
        }
        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(cache.provider.connects.load(Ordering::SeqCst), 1);
        assert!(pools.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_build_locks_do_not_accumulate() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_secs(300),
        );

        cache.get(&id).await.unwrap();
        cache.get(&id).await.unwrap();
        // Misses for unknown ids must not leave a lock behind either.
        for i in 0..16 {
            let _ = cache.get(&format!("unknown-{i}")).await;
        }

        assert!(cache.build_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_and_sweep() {
        let vault = vault();
        let (registry, id) = seeded_registry(&vault).await;
        let cache = cache_with(
            MockPoolProvider::new(),
            registry,
            vault,
            Duration::from_millis(10),
        );

        cache.get(&id).await.unwrap();
        assert_eq!(cache.len().await, 1);

        cache.invalidate(&id).await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.provider.closes.load(Ordering::SeqCst), 1);

        cache.get(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep().await;
        assert!(cache.is_empty().await);
    }
}
