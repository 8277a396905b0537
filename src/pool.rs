//! Connection pool provider seam.
//!
//! The rest of the crate talks to tenant databases exclusively through
//! [`PoolProvider`], so the concrete backend is injectable: production
//! wiring uses the sqlx-backed [`PgPoolProvider`], tests inject mocks.
//!
//! Statements are always parameterized; parameters travel out-of-band as
//! [`QueryParam`] values and are bound positionally by the provider, never
//! interpolated into SQL text.

use async_trait::async_trait;

use crate::error::TenancyResult;

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Uuid(uuid::Uuid),
    Null,
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<uuid::Uuid> for QueryParam {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// A result row as a column-name → JSON-value map.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

/// Provider of pooled connections to tenant databases.
///
/// One pool serves exactly one tenant database; pools are never shared
/// across tenants. Implementations map backend failures into the crate
/// error taxonomy: connection/pool failures become `DatabaseUnavailable`,
/// statement failures become `Query`.
#[async_trait]
pub trait PoolProvider: Send + Sync + 'static {
    /// The pooled handle type (e.g. `sqlx::PgPool`). Cloning yields another
    /// handle to the same underlying pool.
    type Pool: Clone + Send + Sync + 'static;

    /// Create a new pool for the given connection string.
    async fn connect(&self, connection_string: &str) -> TenancyResult<Self::Pool>;

    /// Single round-trip health check against the pool.
    async fn health_check(&self, pool: &Self::Pool) -> TenancyResult<()>;

    /// Close all underlying connections.
    async fn close(&self, pool: &Self::Pool);

    /// Execute a parameterized statement and return its result rows.
    async fn fetch(
        &self,
        pool: &Self::Pool,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<Vec<QueryRow>>;

    /// Execute a parameterized statement, returning the affected row count.
    async fn execute(
        &self,
        pool: &Self::Pool,
        statement: &str,
        params: &[QueryParam],
    ) -> TenancyResult<u64>;

    /// Execute a batch of parameterless statements in order. Used by the
    /// schema applier.
    async fn execute_batch(&self, pool: &Self::Pool, statements: &[String]) -> TenancyResult<()> {
        for statement in statements {
            self.execute(pool, statement, &[]).await?;
        }
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::PgPoolProvider;

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::config::TenancyConfig;
    use crate::error::TenancyError;
    use serde_json::Value;
    use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
    use sqlx::{Column, Row};
    use std::time::Duration;

    /// sqlx-backed Postgres pool provider.
    pub struct PgPoolProvider {
        max_connections: u32,
        acquire_timeout: Duration,
    }

    impl PgPoolProvider {
        /// Create a provider with explicit pool settings.
        pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
            Self {
                max_connections,
                acquire_timeout,
            }
        }

        /// Create a provider from the router configuration.
        pub fn from_config(config: &TenancyConfig) -> Self {
            Self::new(config.max_pool_connections, config.acquire_timeout)
        }
    }

    fn map_sqlx_error(e: sqlx::Error) -> TenancyError {
        match e {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                TenancyError::DatabaseUnavailable(e.to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Configuration(_) => {
                TenancyError::DatabaseUnavailable(e.to_string())
            }
            other => TenancyError::Query(other.to_string()),
        }
    }

    fn bind_params<'q>(
        statement: &'q str,
        params: &'q [QueryParam],
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(statement);
        for param in params {
            query = match param {
                QueryParam::Text(v) => query.bind(v),
                QueryParam::Int(v) => query.bind(v),
                QueryParam::Float(v) => query.bind(v),
                QueryParam::Bool(v) => query.bind(v),
                QueryParam::Uuid(v) => query.bind(v),
                QueryParam::Null => query.bind(Option::<String>::None),
            };
        }
        query
    }

    /// Best-effort decode of a column into a JSON value. Unrecognized
    /// Postgres types come back as null rather than failing the row.
    fn decode_column(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v.map(|u| Value::from(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|t| Value::from(t.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Value>, _>(idx) {
            return v.unwrap_or(Value::Null);
        }
        Value::Null
    }

    fn row_to_json(row: &PgRow) -> QueryRow {
        let mut map = QueryRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            map.insert(column.name().to_string(), decode_column(row, idx));
        }
        map
    }

    #[async_trait]
    impl PoolProvider for PgPoolProvider {
        type Pool = PgPool;

        async fn connect(&self, connection_string: &str) -> TenancyResult<Self::Pool> {
            PgPoolOptions::new()
                .max_connections(self.max_connections)
                .acquire_timeout(self.acquire_timeout)
                .connect(connection_string)
                .await
                .map_err(|e| TenancyError::DatabaseUnavailable(e.to_string()))
        }

        async fn health_check(&self, pool: &Self::Pool) -> TenancyResult<()> {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(|e| TenancyError::DatabaseUnavailable(e.to_string()))
        }

        async fn close(&self, pool: &Self::Pool) {
            pool.close().await;
        }

        async fn fetch(
            &self,
            pool: &Self::Pool,
            statement: &str,
            params: &[QueryParam],
        ) -> TenancyResult<Vec<QueryRow>> {
            let rows = bind_params(statement, params)
                .fetch_all(pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(rows.iter().map(row_to_json).collect())
        }

        async fn execute(
            &self,
            pool: &Self::Pool,
            statement: &str,
            params: &[QueryParam],
        ) -> TenancyResult<u64> {
            bind_params(statement, params)
                .execute(pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(map_sqlx_error)
        }
    }
}
