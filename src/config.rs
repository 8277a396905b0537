//! Configuration for the tenant router.

use std::env;
use std::time::Duration;

/// Environment variable prefix for [`TenancyConfig::from_env`].
const ENV_PREFIX: &str = "TENANT";

/// Configuration for the tenant router.
///
/// The encryption key and provisioning credentials are both optional at
/// construction time: their absence degrades the corresponding operations
/// to per-call configuration errors instead of preventing the process from
/// starting.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Base64-encoded 32-byte key for credential encryption.
    pub encryption_key: Option<String>,

    /// Base URL of the database-hosting provisioning API.
    pub provisioner_url: String,

    /// Bearer token for the provisioning API.
    pub provisioner_token: Option<String>,

    /// Region/placement hint passed on provisioning requests.
    pub provisioner_region: String,

    /// Timeout for a single provisioning API call.
    pub provisioner_timeout: Duration,

    /// Timeout for a single registry read or write.
    pub registry_timeout: Duration,

    /// Timeout for applying the full schema batch to a tenant database.
    pub schema_timeout: Duration,

    /// Time-to-live for cached tenant connection pools, measured from
    /// insertion.
    pub cache_ttl: Duration,

    /// Maximum physical connections per tenant pool.
    pub max_pool_connections: u32,

    /// Timeout for acquiring a connection from a pool (covers initial
    /// connection setup as well).
    pub acquire_timeout: Duration,

    /// Timeout for a single query execution.
    pub query_timeout: Duration,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            provisioner_url: "http://localhost:9000".to_string(),
            provisioner_token: None,
            provisioner_region: "us-east-1".to_string(),
            provisioner_timeout: Duration::from_secs(30),
            registry_timeout: Duration::from_secs(10),
            schema_timeout: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(300),
            max_pool_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl TenancyConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `TENANT_*` environment variables.
    ///
    /// Recognized variables: `TENANT_ENCRYPTION_KEY`,
    /// `TENANT_PROVISIONER_URL`, `TENANT_PROVISIONER_TOKEN`,
    /// `TENANT_PROVISIONER_REGION`, `TENANT_PROVISIONER_TIMEOUT_SECS`,
    /// `TENANT_REGISTRY_TIMEOUT_SECS`, `TENANT_SCHEMA_TIMEOUT_SECS`,
    /// `TENANT_CACHE_TTL_SECS`, `TENANT_MAX_POOL_CONNECTIONS`,
    /// `TENANT_ACQUIRE_TIMEOUT_SECS`, `TENANT_QUERY_TIMEOUT_SECS`.
    /// Unset variables fall back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(key) = env::var(format!("{ENV_PREFIX}_ENCRYPTION_KEY")) {
            config.encryption_key = Some(key);
        }
        if let Ok(url) = env::var(format!("{ENV_PREFIX}_PROVISIONER_URL")) {
            config.provisioner_url = url;
        }
        if let Ok(token) = env::var(format!("{ENV_PREFIX}_PROVISIONER_TOKEN")) {
            config.provisioner_token = Some(token);
        }
        if let Ok(region) = env::var(format!("{ENV_PREFIX}_PROVISIONER_REGION")) {
            config.provisioner_region = region;
        }
        if let Some(secs) = env_secs("PROVISIONER_TIMEOUT_SECS") {
            config.provisioner_timeout = secs;
        }
        if let Some(secs) = env_secs("REGISTRY_TIMEOUT_SECS") {
            config.registry_timeout = secs;
        }
        if let Some(secs) = env_secs("SCHEMA_TIMEOUT_SECS") {
            config.schema_timeout = secs;
        }
        if let Some(secs) = env_secs("CACHE_TTL_SECS") {
            config.cache_ttl = secs;
        }
        if let Ok(max) = env::var(format!("{ENV_PREFIX}_MAX_POOL_CONNECTIONS"))
            && let Ok(max) = max.parse()
        {
            config.max_pool_connections = max;
        }
        if let Some(secs) = env_secs("ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = secs;
        }
        if let Some(secs) = env_secs("QUERY_TIMEOUT_SECS") {
            config.query_timeout = secs;
        }

        config
    }

    /// Set the encryption key (base64 of 32 bytes).
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Set the provisioning API base URL.
    pub fn with_provisioner_url(mut self, url: impl Into<String>) -> Self {
        self.provisioner_url = url.into();
        self
    }

    /// Set the provisioning API bearer token.
    pub fn with_provisioner_token(mut self, token: impl Into<String>) -> Self {
        self.provisioner_token = Some(token.into());
        self
    }

    /// Set the region/placement hint for provisioning requests.
    pub fn with_provisioner_region(mut self, region: impl Into<String>) -> Self {
        self.provisioner_region = region.into();
        self
    }

    /// Set the per-operation registry timeout.
    pub fn with_registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    /// Set the schema application timeout.
    pub fn with_schema_timeout(mut self, timeout: Duration) -> Self {
        self.schema_timeout = timeout;
        self
    }

    /// Set the connection cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the maximum connections per tenant pool.
    pub fn with_max_pool_connections(mut self, max: u32) -> Self {
        self.max_pool_connections = max;
        self
    }

    /// Set the per-query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(format!("{ENV_PREFIX}_{key}"))
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}
