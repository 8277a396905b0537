//! External database provisioning client.
//!
//! One creation call per tenant against the database-hosting provider's
//! API. Transient failures surface to the provisioning orchestrator, which
//! owns retry/rollback policy; this client performs no internal retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::TenancyConfig;
use crate::error::{TenancyError, TenancyResult};

/// A freshly provisioned external database.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionedDatabase {
    /// Plaintext connection string. Encrypted by the vault before it is
    /// persisted anywhere.
    pub connection_string: String,
    /// The provider's handle for the database instance.
    pub database_name: String,
}

/// Provisioner of isolated per-tenant databases.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// Create a new, independent database instance for a tenant. `region`
    /// overrides the configured default placement when set.
    async fn provision(
        &self,
        tenant_id: &str,
        display_name: &str,
        region: Option<&str>,
    ) -> TenancyResult<ProvisionedDatabase>;
}

#[derive(Debug, Serialize)]
struct ProvisionRequest<'a> {
    name: &'a str,
    region: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProvisionErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the external provisioning API.
pub struct HttpDatabaseProvisioner {
    client: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
    region: String,
}

impl HttpDatabaseProvisioner {
    /// Build a provisioner from the router configuration.
    ///
    /// A missing API token does not fail construction; provisioning calls
    /// themselves fail with a configuration error.
    pub fn from_config(config: &TenancyConfig) -> TenancyResult<Self> {
        Self::new(
            &config.provisioner_url,
            config.provisioner_token.clone(),
            &config.provisioner_region,
            config.provisioner_timeout,
        )
    }

    /// Build a provisioner with explicit settings.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        region: &str,
        timeout: Duration,
    ) -> TenancyResult<Self> {
        let mut base_url = url::Url::parse(base_url)
            .map_err(|e| TenancyError::Configuration(format!("invalid provisioner URL: {e}")))?;
        // Relative joins drop the last path segment unless the base ends
        // with a slash; normalize so a path-bearing base URL is kept.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tenant-router/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TenancyError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
            region: region.to_string(),
        })
    }

    fn endpoint(&self) -> TenancyResult<url::Url> {
        self.base_url
            .join("v1/databases")
            .map_err(|e| TenancyError::Configuration(format!("invalid provisioner URL: {e}")))
    }
}

#[async_trait]
impl DatabaseProvisioner for HttpDatabaseProvisioner {
    async fn provision(
        &self,
        tenant_id: &str,
        display_name: &str,
        region: Option<&str>,
    ) -> TenancyResult<ProvisionedDatabase> {
        let token = self.token.as_deref().ok_or_else(|| {
            TenancyError::Configuration("provisioning API token not configured".to_string())
        })?;

        debug!(tenant_id, "requesting external database");
        let response = self
            .client
            .post(self.endpoint()?)
            .bearer_auth(token)
            .json(&ProvisionRequest {
                name: display_name,
                region: region.unwrap_or(&self.region),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TenancyError::Provisioning("provisioning request timed out".to_string())
                } else {
                    TenancyError::Provisioning(format!("provisioning request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ProvisionErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.or(b.message))
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(TenancyError::Provisioning(format!(
                "provider returned {status}: {detail}"
            )));
        }

        response.json::<ProvisionedDatabase>().await.map_err(|e| {
            TenancyError::Provisioning(format!("malformed provisioning response: {e}"))
        })
    }
}
