//! Tenant registry client.
//!
//! A thin client over the shared registry store that holds one row per
//! tenant. No business logic lives here, only mapping between registry rows
//! and [`Tenant`] records. Failures of the registry store itself surface as
//! `Registry` errors so callers can tell "the routing layer is down" apart
//! from "one tenant's database is down".

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{TenancyError, TenancyResult};
use crate::tenant::{Tenant, TenantStatus};

/// Registry of tenant metadata. All operations are single-row and
/// idempotent by tenant id.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Find a tenant by id regardless of status.
    async fn find_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>>;

    /// Find a tenant by slug regardless of status.
    async fn find_tenant_by_slug(&self, slug: &str) -> TenancyResult<Option<Tenant>>;

    /// Find a tenant by id, requiring `Active` status.
    ///
    /// Errors: `TenantNotFound` if absent, `TenantUnavailable` (carrying
    /// the current status) if present but not active.
    async fn find_active_tenant(&self, id: &str) -> TenancyResult<Tenant> {
        let tenant = self
            .find_tenant(id)
            .await?
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        if !tenant.is_active() {
            return Err(TenancyError::TenantUnavailable {
                id: tenant.id,
                status: tenant.status,
            });
        }
        Ok(tenant)
    }

    /// Insert a placeholder row in `Creating` status.
    ///
    /// Uniqueness of id and slug is enforced here; a collision fails fast
    /// with `TenantAlreadyExists`, which is what makes provisioning
    /// single-flight per tenant.
    async fn create_placeholder(&self, tenant: &Tenant) -> TenancyResult<()>;

    /// Update a tenant's lifecycle status.
    async fn update_status(&self, id: &str, status: TenantStatus) -> TenancyResult<()>;

    /// Persist the encrypted connection string and database name after
    /// external provisioning succeeds.
    async fn update_connection_info(
        &self,
        id: &str,
        encrypted_connection_string: &str,
        database_name: &str,
    ) -> TenancyResult<()>;
}

/// In-memory registry, used by tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryTenantRegistry {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl InMemoryTenantRegistry {
    /// Create an empty in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully-formed tenant row, bypassing the provisioning flow.
    pub fn insert(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.id.clone(), tenant);
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn find_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> TenancyResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn create_placeholder(&self, tenant: &Tenant) -> TenancyResult<()> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant.id)
            || tenants.values().any(|t| t.slug == tenant.slug)
        {
            return Err(TenancyError::TenantAlreadyExists(tenant.slug.clone()));
        }
        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, status: TenantStatus) -> TenancyResult<()> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        Ok(())
    }

    async fn update_connection_info(
        &self,
        id: &str,
        encrypted_connection_string: &str,
        database_name: &str,
    ) -> TenancyResult<()> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        tenant.encrypted_connection_string = Some(encrypted_connection_string.to_string());
        tenant.database_name = Some(database_name.to_string());
        tenant.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::PgTenantRegistry;

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use sqlx::postgres::PgPool;
    use sqlx::Row;
    use std::time::Duration;

    const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

    /// DDL for the registry's own `tenants` table. The registry database is
    /// already provisioned; this only ensures the table shape.
    const REGISTRY_SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id                            TEXT PRIMARY KEY,
            name                          TEXT NOT NULL,
            slug                          TEXT UNIQUE NOT NULL,
            status                        TEXT NOT NULL,
            encrypted_connection_string   TEXT,
            database_name                 TEXT,
            created_at                    TIMESTAMPTZ NOT NULL,
            updated_at                    TIMESTAMPTZ NOT NULL
        )
    "#;

    /// Postgres-backed registry over the shared registry database.
    ///
    /// Every operation runs under an execution timeout so a statement that
    /// hangs server-side cannot hang the routing layer; an elapsed timeout
    /// surfaces as a `Registry` error.
    pub struct PgTenantRegistry {
        pool: PgPool,
        op_timeout: Duration,
    }

    impl PgTenantRegistry {
        /// Wrap an existing pool to the registry database.
        pub fn new(pool: PgPool) -> Self {
            Self {
                pool,
                op_timeout: DEFAULT_OP_TIMEOUT,
            }
        }

        /// Set the per-operation execution timeout.
        pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
            self.op_timeout = op_timeout;
            self
        }

        /// Idempotently create the registry table.
        pub async fn ensure_schema(&self) -> TenancyResult<()> {
            timed(self.op_timeout, sqlx::query(REGISTRY_SCHEMA).execute(&self.pool))
                .await
                .map(|_| ())
        }

        fn row_to_tenant(row: &sqlx::postgres::PgRow) -> TenancyResult<Tenant> {
            let status_raw: String = row.try_get("status").map_err(registry_error)?;
            let status = TenantStatus::parse(&status_raw).ok_or_else(|| {
                TenancyError::Registry(format!("invalid tenant status in registry: {status_raw}"))
            })?;
            Ok(Tenant {
                id: row.try_get("id").map_err(registry_error)?,
                name: row.try_get("name").map_err(registry_error)?,
                slug: row.try_get("slug").map_err(registry_error)?,
                status,
                encrypted_connection_string: row
                    .try_get("encrypted_connection_string")
                    .map_err(registry_error)?,
                database_name: row.try_get("database_name").map_err(registry_error)?,
                created_at: row.try_get("created_at").map_err(registry_error)?,
                updated_at: row.try_get("updated_at").map_err(registry_error)?,
            })
        }
    }

    fn registry_error(e: impl std::fmt::Display) -> TenancyError {
        TenancyError::Registry(e.to_string())
    }

    /// Run one registry statement under a deadline, mapping both the
    /// elapsed timeout and the database error into `Registry`.
    pub(super) async fn timed<T>(
        op_timeout: Duration,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> TenancyResult<T> {
        match tokio::time::timeout(op_timeout, fut).await {
            Ok(result) => result.map_err(registry_error),
            Err(_) => Err(TenancyError::Registry(format!(
                "registry operation timed out after {op_timeout:?}"
            ))),
        }
    }

    /// Postgres unique-violation SQLSTATE.
    const UNIQUE_VIOLATION: &str = "23505";

    #[async_trait]
    impl TenantRegistry for PgTenantRegistry {
        async fn find_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>> {
            let query = sqlx::query(
                "SELECT id, name, slug, status, encrypted_connection_string, database_name, \
                 created_at, updated_at FROM tenants WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool);
            let row = timed(self.op_timeout, query).await?;

            row.as_ref().map(Self::row_to_tenant).transpose()
        }

        async fn find_tenant_by_slug(&self, slug: &str) -> TenancyResult<Option<Tenant>> {
            let query = sqlx::query(
                "SELECT id, name, slug, status, encrypted_connection_string, database_name, \
                 created_at, updated_at FROM tenants WHERE slug = $1",
            )
            .bind(slug)
            .fetch_optional(&self.pool);
            let row = timed(self.op_timeout, query).await?;

            row.as_ref().map(Self::row_to_tenant).transpose()
        }

        async fn create_placeholder(&self, tenant: &Tenant) -> TenancyResult<()> {
            let query = sqlx::query(
                "INSERT INTO tenants (id, name, slug, status, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&tenant.id)
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(tenant.status.as_str())
            .bind(tenant.created_at)
            .bind(tenant.updated_at)
            .execute(&self.pool);

            let result = match tokio::time::timeout(self.op_timeout, query).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(TenancyError::Registry(format!(
                        "registry operation timed out after {:?}",
                        self.op_timeout
                    )));
                }
            };
            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                    Err(TenancyError::TenantAlreadyExists(tenant.slug.clone()))
                }
                Err(e) => Err(registry_error(e)),
            }
        }

        async fn update_status(&self, id: &str, status: TenantStatus) -> TenancyResult<()> {
            let query = sqlx::query("UPDATE tenants SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool);
            let result = timed(self.op_timeout, query).await?;

            if result.rows_affected() == 0 {
                return Err(TenancyError::TenantNotFound(id.to_string()));
            }
            Ok(())
        }

        async fn update_connection_info(
            &self,
            id: &str,
            encrypted_connection_string: &str,
            database_name: &str,
        ) -> TenancyResult<()> {
            let query = sqlx::query(
                "UPDATE tenants SET encrypted_connection_string = $1, database_name = $2, \
                 updated_at = $3 WHERE id = $4",
            )
            .bind(encrypted_connection_string)
            .bind(database_name)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool);
            let result = timed(self.op_timeout, query).await?;

            if result.rows_affected() == 0 {
                return Err(TenancyError::TenantNotFound(id.to_string()));
            }
            Ok(())
        }
    }
}

/// Build a placeholder tenant record for a new signup.
pub fn new_placeholder(name: &str) -> Tenant {
    let id = uuid::Uuid::new_v4().to_string();
    let mut tenant = Tenant::placeholder(id, name);
    if tenant.slug.is_empty() {
        // Names with no ASCII alphanumerics still need a routable slug.
        tenant.slug = tenant.id.clone();
    }
    tenant
}
