//! Top-level router service.
//!
//! Wires the vault, registry, cache, provisioner, and schema applier into
//! one object that owns the whole tenant lifecycle: provision new tenants,
//! route queries to the right database, and manage cached connections.

use std::sync::Arc;

use crate::cache::ConnectionCache;
use crate::config::TenancyConfig;
use crate::error::TenancyResult;
use crate::pool::{PoolProvider, QueryParam, QueryRow};
use crate::provisioner::DatabaseProvisioner;
use crate::provisioning::{ProvisionOptions, ProvisioningOrchestrator};
use crate::query::QueryFacade;
use crate::registry::TenantRegistry;
use crate::schema::{SchemaApplier, TenantSchemaApplier};
use crate::tenant::Tenant;
use crate::vault::CredentialVault;

/// Multi-tenant database router.
///
/// All methods take `&self`; the router is cheap to share behind an `Arc`
/// across request handlers.
pub struct TenantRouter<P: PoolProvider> {
    registry: Arc<dyn TenantRegistry>,
    cache: Arc<ConnectionCache<P>>,
    facade: QueryFacade<P>,
    orchestrator: ProvisioningOrchestrator,
}

impl<P: PoolProvider> TenantRouter<P> {
    /// Start building a router. `provider` opens tenant database pools,
    /// `registry` holds tenant metadata, `provisioner` creates databases.
    pub fn builder(
        config: TenancyConfig,
        provider: Arc<P>,
        registry: Arc<dyn TenantRegistry>,
        provisioner: Arc<dyn DatabaseProvisioner>,
    ) -> TenantRouterBuilder<P> {
        TenantRouterBuilder {
            config,
            provider,
            registry,
            provisioner,
            schema: None,
        }
    }

    /// Provision a new tenant end to end and return its `Active` record.
    pub async fn provision_new_tenant(
        &self,
        name: &str,
        options: ProvisionOptions,
    ) -> TenancyResult<Tenant> {
        self.orchestrator.provision_new_tenant(name, options).await
    }

    /// Run a parameterized query against a tenant's database.
    pub async fn query(
        &self,
        tenant_id: &str,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<Vec<QueryRow>> {
        self.facade.query(tenant_id, statement, params).await
    }

    /// Run a parameterized statement against a tenant's database, returning
    /// the affected row count.
    pub async fn execute(
        &self,
        tenant_id: &str,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<u64> {
        self.facade.execute(tenant_id, statement, params).await
    }

    /// Look up a tenant by id regardless of status.
    pub async fn find_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>> {
        self.registry.find_tenant(id).await
    }

    /// Look up a tenant by slug regardless of status.
    pub async fn find_tenant_by_slug(&self, slug: &str) -> TenancyResult<Option<Tenant>> {
        self.registry.find_tenant_by_slug(slug).await
    }

    /// Drop one tenant's cached connection pool. The next query rebuilds it
    /// from the registry, picking up rotated credentials.
    pub async fn invalidate_connection(&self, tenant_id: &str) {
        self.cache.invalidate(tenant_id).await;
    }

    /// Close and remove all expired cached pools.
    pub async fn sweep_connections(&self) {
        self.cache.sweep().await;
    }

    /// Number of currently cached connection pools.
    pub async fn cached_connections(&self) -> usize {
        self.cache.len().await
    }
}

/// Builder for [`TenantRouter`].
pub struct TenantRouterBuilder<P: PoolProvider> {
    config: TenancyConfig,
    provider: Arc<P>,
    registry: Arc<dyn TenantRegistry>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    schema: Option<Arc<dyn SchemaApplier>>,
}

impl<P: PoolProvider> TenantRouterBuilder<P> {
    /// Override the schema applier. Defaults to [`TenantSchemaApplier`]
    /// over the router's pool provider.
    pub fn with_schema_applier(mut self, schema: Arc<dyn SchemaApplier>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Build the router.
    ///
    /// Fails with a configuration error if the configured encryption key is
    /// present but not valid base64 of 32 bytes. An absent key builds a
    /// degraded router whose vault operations fail per call.
    pub fn build(self) -> TenancyResult<TenantRouter<P>> {
        let vault = Arc::new(CredentialVault::new(self.config.encryption_key.as_deref())?);

        let cache = Arc::new(ConnectionCache::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.registry),
            Arc::clone(&vault),
            self.config.cache_ttl,
        ));
        let facade = QueryFacade::new(
            Arc::clone(&self.provider),
            Arc::clone(&cache),
            self.config.query_timeout,
        );
        let schema = self.schema.unwrap_or_else(|| {
            Arc::new(
                TenantSchemaApplier::new(Arc::clone(&self.provider))
                    .with_timeout(self.config.schema_timeout),
            )
        });
        let orchestrator = ProvisioningOrchestrator::new(
            Arc::clone(&self.registry),
            self.provisioner,
            schema,
            vault,
        );

        Ok(TenantRouter {
            registry: self.registry,
            cache,
            facade,
            orchestrator,
        })
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::pool::PgPoolProvider;
    use crate::provisioner::HttpDatabaseProvisioner;
    use crate::registry::PgTenantRegistry;

    impl TenantRouter<PgPoolProvider> {
        /// Build a fully Postgres-backed router: sqlx pools for tenant
        /// databases, a Postgres registry over `registry_pool`, and the
        /// HTTP provisioning client from the config.
        ///
        /// Idempotently creates the registry table before returning.
        pub async fn postgres(
            config: TenancyConfig,
            registry_pool: sqlx::PgPool,
        ) -> TenancyResult<Self> {
            let registry =
                PgTenantRegistry::new(registry_pool).with_timeout(config.registry_timeout);
            registry.ensure_schema().await?;

            let provider = Arc::new(PgPoolProvider::from_config(&config));
            let provisioner = Arc::new(HttpDatabaseProvisioner::from_config(&config)?);

            TenantRouter::builder(config, provider, Arc::new(registry), provisioner).build()
        }
    }
}
