//! Tenant schema application.
//!
//! Every tenant database carries the same fixed schema, applied once at
//! provisioning time. Structural uniformity across the fleet is a
//! functional requirement: any logic that reasons about tenant data
//! (including AI-assisted querying) depends on identical shapes everywhere.
//!
//! Every statement is idempotent (`IF NOT EXISTS`, `ON CONFLICT DO
//! NOTHING`, `DROP TRIGGER IF EXISTS` before `CREATE TRIGGER`) so a retried
//! provisioning attempt never fails on partial prior application.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{TenancyError, TenancyResult};
use crate::pool::PoolProvider;

const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// The fixed schema batch applied to every freshly provisioned tenant
/// database, in execution order.
pub const TENANT_SCHEMA: &[&str] = &[
    // --- Clients ---
    r#"CREATE TABLE IF NOT EXISTS clients (
        id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        name        TEXT NOT NULL,
        email       TEXT,
        phone       TEXT,
        address     TEXT,
        notes       TEXT,
        is_active   BOOLEAN NOT NULL DEFAULT TRUE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Matters ---
    r#"CREATE TABLE IF NOT EXISTS matters (
        id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        client_id   UUID NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
        title       TEXT NOT NULL,
        description TEXT,
        status      TEXT NOT NULL DEFAULT 'open',
        opened_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        closed_at   TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Documents ---
    r#"CREATE TABLE IF NOT EXISTS documents (
        id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        matter_id    UUID REFERENCES matters(id) ON DELETE SET NULL,
        title        TEXT NOT NULL,
        storage_key  TEXT NOT NULL,
        content_type TEXT,
        size_bytes   BIGINT,
        category_id  BIGINT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS document_categories (
        id    BIGINT PRIMARY KEY,
        name  TEXT UNIQUE NOT NULL
    )"#,
    // --- Billing ---
    r#"CREATE TABLE IF NOT EXISTS invoices (
        id           UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        client_id    UUID NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
        matter_id    UUID REFERENCES matters(id) ON DELETE SET NULL,
        number       TEXT UNIQUE NOT NULL,
        amount_cents BIGINT NOT NULL,
        currency     TEXT NOT NULL DEFAULT 'USD',
        status       TEXT NOT NULL DEFAULT 'draft',
        issued_at    TIMESTAMPTZ,
        due_at       TIMESTAMPTZ,
        paid_at      TIMESTAMPTZ,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Calendar ---
    r#"CREATE TABLE IF NOT EXISTS calendar_events (
        id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        matter_id   UUID REFERENCES matters(id) ON DELETE CASCADE,
        title       TEXT NOT NULL,
        location    TEXT,
        starts_at   TIMESTAMPTZ NOT NULL,
        ends_at     TIMESTAMPTZ,
        all_day     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Settings ---
    r#"CREATE TABLE IF NOT EXISTS app_settings (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    // --- Indexes ---
    r#"CREATE INDEX IF NOT EXISTS idx_matters_client ON matters(client_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_documents_matter ON documents(matter_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_invoices_client ON invoices(client_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_events_starts_at ON calendar_events(starts_at)"#,
    // --- updated_at trigger ---
    r#"CREATE OR REPLACE FUNCTION set_updated_at() RETURNS TRIGGER AS $$
       BEGIN
           NEW.updated_at = NOW();
           RETURN NEW;
       END;
       $$ LANGUAGE plpgsql"#,
    r#"DROP TRIGGER IF EXISTS trg_clients_updated_at ON clients"#,
    r#"CREATE TRIGGER trg_clients_updated_at BEFORE UPDATE ON clients
       FOR EACH ROW EXECUTE FUNCTION set_updated_at()"#,
    r#"DROP TRIGGER IF EXISTS trg_matters_updated_at ON matters"#,
    r#"CREATE TRIGGER trg_matters_updated_at BEFORE UPDATE ON matters
       FOR EACH ROW EXECUTE FUNCTION set_updated_at()"#,
    r#"DROP TRIGGER IF EXISTS trg_documents_updated_at ON documents"#,
    r#"CREATE TRIGGER trg_documents_updated_at BEFORE UPDATE ON documents
       FOR EACH ROW EXECUTE FUNCTION set_updated_at()"#,
    r#"DROP TRIGGER IF EXISTS trg_invoices_updated_at ON invoices"#,
    r#"CREATE TRIGGER trg_invoices_updated_at BEFORE UPDATE ON invoices
       FOR EACH ROW EXECUTE FUNCTION set_updated_at()"#,
    // --- Seed rows ---
    r#"INSERT INTO document_categories (id, name) VALUES
        (1, 'contract'),
        (2, 'correspondence'),
        (3, 'court-filing'),
        (4, 'invoice'),
        (5, 'other')
       ON CONFLICT (id) DO NOTHING"#,
    r#"INSERT INTO app_settings (key, value) VALUES
        ('invoice_prefix', 'INV'),
        ('default_currency', 'USD'),
        ('calendar_week_start', 'monday')
       ON CONFLICT (key) DO NOTHING"#,
];

/// Applies the fixed tenant schema to a database.
#[async_trait]
pub trait SchemaApplier: Send + Sync {
    /// Run the schema batch against the database behind `connection_string`.
    /// Safe to re-run.
    async fn apply(&self, connection_string: &str) -> TenancyResult<()>;
}

/// Schema applier that connects through a [`PoolProvider`], runs the batch,
/// and closes the pool again. Used once per tenant at provisioning time, so
/// the short-lived pool is not cached.
///
/// The whole batch runs under an execution timeout: a DDL statement stuck
/// behind a server-side lock fails the provisioning attempt instead of
/// hanging it.
pub struct TenantSchemaApplier<P: PoolProvider> {
    provider: Arc<P>,
    statements: Vec<String>,
    timeout: Duration,
}

impl<P: PoolProvider> TenantSchemaApplier<P> {
    /// Create an applier with the standard tenant schema.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            statements: TENANT_SCHEMA.iter().map(|s| s.to_string()).collect(),
            timeout: DEFAULT_APPLY_TIMEOUT,
        }
    }

    /// Create an applier with a custom statement batch. The batch must be
    /// idempotent; this is the caller's responsibility.
    pub fn with_statements(provider: Arc<P>, statements: Vec<String>) -> Self {
        Self {
            provider,
            statements,
            timeout: DEFAULT_APPLY_TIMEOUT,
        }
    }

    /// Set the execution timeout for the full batch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<P: PoolProvider> SchemaApplier for TenantSchemaApplier<P> {
    async fn apply(&self, connection_string: &str) -> TenancyResult<()> {
        let pool = self.provider.connect(connection_string).await?;
        let batch = self.provider.execute_batch(&pool, &self.statements);
        let result = match tokio::time::timeout(self.timeout, batch).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::Query(format!(
                "schema application timed out after {:?}",
                self.timeout
            ))),
        };
        self.provider.close(&pool).await;
        result?;
        info!(statements = self.statements.len(), "applied tenant schema");
        Ok(())
    }
}
