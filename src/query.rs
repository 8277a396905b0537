//! Query facade: the only path through which business logic touches a
//! tenant's database.
//!
//! Hides tenant resolution and pool acquisition, enforces per-query
//! timeouts, and only accepts parameterized statements: parameters travel
//! out-of-band, never interpolated into SQL text.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::ConnectionCache;
use crate::error::{TenancyError, TenancyResult};
use crate::pool::{PoolProvider, QueryParam, QueryRow};

/// Facade for executing parameterized statements against tenant databases.
pub struct QueryFacade<P: PoolProvider> {
    provider: Arc<P>,
    cache: Arc<ConnectionCache<P>>,
    query_timeout: Duration,
}

impl<P: PoolProvider> QueryFacade<P> {
    /// Create a facade over a connection cache.
    pub fn new(provider: Arc<P>, cache: Arc<ConnectionCache<P>>, query_timeout: Duration) -> Self {
        Self {
            provider,
            cache,
            query_timeout,
        }
    }

    /// Execute a parameterized statement and return its result rows.
    ///
    /// `TenantNotFound` / `TenantUnavailable` / `DatabaseUnavailable`
    /// propagate from the cache unchanged. A `DatabaseUnavailable` caused
    /// by TTL eviction racing this query additionally drops the stale
    /// cache entry, so the caller's single retry rebuilds the pool.
    pub async fn query(
        &self,
        tenant_id: &str,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<Vec<QueryRow>> {
        let pool = self.cache.get(tenant_id).await?;
        let result = self
            .with_timeout(self.provider.fetch(&pool, statement, params))
            .await;
        self.surface(tenant_id, result).await
    }

    /// Execute a parameterized statement without result rows, returning the
    /// affected row count.
    pub async fn execute(
        &self,
        tenant_id: &str,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<u64> {
        let pool = self.cache.get(tenant_id).await?;
        let result = self
            .with_timeout(self.provider.execute(&pool, statement, params))
            .await;
        self.surface(tenant_id, result).await
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = TenancyResult<T>>,
    ) -> TenancyResult<T> {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::Query(format!(
                "statement timed out after {:?}",
                self.query_timeout
            ))),
        }
    }

    /// Map execution outcomes: on a pool that died under us, invalidate the
    /// cached entry before surfacing the retryable error.
    async fn surface<T>(&self, tenant_id: &str, result: TenancyResult<T>) -> TenancyResult<T> {
        if let Err(TenancyError::DatabaseUnavailable(_)) = &result {
            debug!(tenant_id, "pool unavailable mid-query, dropping cache entry");
            self.cache.invalidate(tenant_id).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{new_placeholder, InMemoryTenantRegistry};
    use crate::tenant::TenantStatus;
    use crate::vault::CredentialVault;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock provider whose pools serve canned rows keyed by connection
    /// string, with per-pool closed state.
    #[derive(Clone)]
    struct MockPool {
        connection_string: String,
        closed: Arc<Mutex<bool>>,
    }

    struct MockPoolProvider {
        rows: Mutex<HashMap<String, Vec<QueryRow>>>,
        connects: AtomicUsize,
        hang: bool,
    }

    impl MockPoolProvider {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                connects: AtomicUsize::new(0),
                hang: false,
            }
        }

        fn seed(&self, connection_string: &str, rows: Vec<QueryRow>) {
            self.rows.lock().insert(connection_string.to_string(), rows);
        }
    }

    #[async_trait]
    impl PoolProvider for MockPoolProvider {
        type Pool = MockPool;

        async fn connect(&self, connection_string: &str) -> TenancyResult<Self::Pool> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(MockPool {
                connection_string: connection_string.to_string(),
                closed: Arc::new(Mutex::new(false)),
            })
        }

        async fn health_check(&self, _pool: &Self::Pool) -> TenancyResult<()> {
            Ok(())
        }

        async fn close(&self, pool: &Self::Pool) {
            *pool.closed.lock() = true;
        }

        async fn fetch(
            &self,
            pool: &Self::Pool,
            _statement: &str,
            _params: &[QueryParam],
        ) -> TenancyResult<Vec<QueryRow>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if *pool.closed.lock() {
                return Err(TenancyError::DatabaseUnavailable("pool closed".to_string()));
            }
            Ok(self
                .rows
                .lock()
                .get(&pool.connection_string)
                .cloned()
                .unwrap_or_default())
        }

        async fn execute(
            &self,
            pool: &Self::Pool,
            _statement: &str,
            _params: &[QueryParam],
        ) -> TenancyResult<u64> {
            if *pool.closed.lock() {
                return Err(TenancyError::DatabaseUnavailable("pool closed".to_string()));
            }
            Ok(1)
        }
    }

    fn row(key: &str, value: &str) -> QueryRow {
        let mut map = QueryRow::new();
        map.insert(key.to_string(), json!(value));
        map
    }

    struct Fixture {
        provider: Arc<MockPoolProvider>,
        cache: Arc<ConnectionCache<MockPoolProvider>>,
        registry: Arc<InMemoryTenantRegistry>,
        vault: Arc<CredentialVault>,
    }

    fn fixture(provider: MockPoolProvider) -> Fixture {
        let key = CredentialVault::generate_key();
        let vault = Arc::new(CredentialVault::new(Some(&key)).unwrap());
        let registry = Arc::new(InMemoryTenantRegistry::new());
        let provider = Arc::new(provider);
        let cache = Arc::new(ConnectionCache::new(
            Arc::clone(&provider),
            Arc::clone(&registry) as Arc<dyn crate::registry::TenantRegistry>,
            Arc::clone(&vault),
            Duration::from_secs(300),
        ));
        Fixture {
            provider,
            cache,
            registry,
            vault,
        }
    }

    impl Fixture {
        fn add_tenant(&self, name: &str, connection_string: &str) -> String {
            let mut tenant = new_placeholder(name);
            tenant.status = TenantStatus::Active;
            tenant.encrypted_connection_string =
                Some(self.vault.encrypt(connection_string).unwrap());
            tenant.database_name = Some(format!("db_{}", tenant.slug));
            let id = tenant.id.clone();
            self.registry.insert(tenant);
            id
        }

        fn facade(&self) -> QueryFacade<MockPoolProvider> {
            QueryFacade::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.cache),
                Duration::from_secs(5),
            )
        }
    }

    #[tokio::test]
    async fn test_query_returns_tenant_rows() {
        let provider = MockPoolProvider::new();
        provider.seed("postgres://host/acme", vec![row("name", "acme-client")]);
        let fixture = fixture(provider);
        let id = fixture.add_tenant("Acme", "postgres://host/acme");

        let rows = fixture
            .facade()
            .query(&id, "SELECT name FROM clients", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("acme-client"));
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let provider = MockPoolProvider::new();
        provider.seed("postgres://host/acme", vec![row("name", "acme-client")]);
        provider.seed("postgres://host/globex", vec![row("name", "globex-client")]);
        let fixture = fixture(provider);
        let acme = fixture.add_tenant("Acme", "postgres://host/acme");
        let globex = fixture.add_tenant("Globex", "postgres://host/globex");

        let facade = fixture.facade();
        let acme_rows = facade.query(&acme, "SELECT name FROM clients", &[]).await.unwrap();
        let globex_rows = facade
            .query(&globex, "SELECT name FROM clients", &[])
            .await
            .unwrap();

        assert_eq!(acme_rows[0]["name"], json!("acme-client"));
        assert_eq!(globex_rows[0]["name"], json!("globex-client"));
    }

    #[tokio::test]
    async fn test_not_found_propagates() {
        let fixture = fixture(MockPoolProvider::new());
        let err = fixture
            .facade()
            .query("does-not-exist", "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn test_eviction_race_is_retryable() {
        let provider = MockPoolProvider::new();
        provider.seed("postgres://host/acme", vec![row("n", "1")]);
        let fixture = fixture(provider);
        let id = fixture.add_tenant("Acme", "postgres://host/acme");
        let facade = fixture.facade();

        // Prime the cache, then close the pooled handle out from under the
        // facade, as a TTL eviction would.
        let pool = fixture.cache.get(&id).await.unwrap();
        fixture.provider.close(&pool).await;

        let err = facade.query(&id, "SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_retryable());

        // The stale entry was dropped: one retry rebuilds and succeeds.
        let rows = facade.query(&id, "SELECT 1", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(fixture.provider.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_timeout_maps_to_query_error() {
        let provider = MockPoolProvider {
            hang: true,
            ..MockPoolProvider::new()
        };
        let fixture = fixture(provider);
        let id = fixture.add_tenant("Acme", "postgres://host/acme");

        let facade = QueryFacade::new(
            Arc::clone(&fixture.provider),
            Arc::clone(&fixture.cache),
            Duration::from_millis(20),
        );
        let err = facade.query(&id, "SELECT pg_sleep(60)", &[]).await.unwrap_err();
        assert!(matches!(err, TenancyError::Query(_)));
    }

    #[tokio::test]
    async fn test_execute_returns_affected_rows() {
        let fixture = fixture(MockPoolProvider::new());
        let id = fixture.add_tenant("Acme", "postgres://host/acme");

        let affected = fixture
            .facade()
            .execute(
                &id,
                "UPDATE clients SET is_active = $1",
                &[QueryParam::Bool(false)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
    }
}
