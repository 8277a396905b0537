//! Tenant provisioning orchestration.
//!
//! One-time flow per tenant: registry placeholder → external database →
//! encrypted credentials persisted → schema applied → `Active`. Any step
//! failure marks the tenant `Error` before the original error propagates,
//! so the state machine never leaves a tenant silently stuck mid-flow.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{TenancyError, TenancyResult};
use crate::provisioner::DatabaseProvisioner;
use crate::registry::{new_placeholder, TenantRegistry};
use crate::schema::SchemaApplier;
use crate::tenant::{Tenant, TenantStatus};
use crate::vault::CredentialVault;

/// Options for provisioning a new tenant.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// Region/placement hint forwarded to the provisioning API. `None`
    /// uses the configured default region.
    pub region: Option<String>,
}

/// Orchestrates the `creating → provisioning → active` state machine.
///
/// Not designed to run twice concurrently for the same tenant: the
/// registry's uniqueness constraint on the placeholder insert makes a
/// racing second caller fail fast with `TenantAlreadyExists` instead of
/// double-provisioning.
pub struct ProvisioningOrchestrator {
    registry: Arc<dyn TenantRegistry>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    schema: Arc<dyn SchemaApplier>,
    vault: Arc<CredentialVault>,
}

impl ProvisioningOrchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        schema: Arc<dyn SchemaApplier>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            schema,
            vault,
        }
    }

    /// Provision a new tenant end to end.
    ///
    /// On success the returned tenant is `Active` and its database carries
    /// the full fixed schema. On failure the tenant is left in `Error`
    /// status and the triggering error is returned; a partially created
    /// external database is not deleted (manual remediation).
    pub async fn provision_new_tenant(
        &self,
        name: &str,
        options: ProvisionOptions,
    ) -> TenancyResult<Tenant> {
        let mut tenant = new_placeholder(name);
        self.registry.create_placeholder(&tenant).await?;
        info!(tenant_id = %tenant.id, slug = %tenant.slug, "tenant placeholder created");

        match self.run_provisioning(&mut tenant, &options).await {
            Ok(()) => {
                info!(tenant_id = %tenant.id, "tenant provisioning complete");
                Ok(tenant)
            }
            Err(e) => {
                // Best-effort: the triggering error matters more than a
                // failure to record the error status.
                if let Err(status_err) = self
                    .registry
                    .update_status(&tenant.id, TenantStatus::Error)
                    .await
                {
                    warn!(
                        tenant_id = %tenant.id,
                        error = %status_err,
                        "failed to record error status"
                    );
                }
                if let Some(database_name) = &tenant.database_name {
                    // The external database exists but the tenant is dead;
                    // operators need the handle to clean it up.
                    warn!(
                        tenant_id = %tenant.id,
                        database_name = %database_name,
                        "provisioning failed after external database creation"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_provisioning(
        &self,
        tenant: &mut Tenant,
        options: &ProvisionOptions,
    ) -> TenancyResult<()> {
        let provisioned = self
            .provisioner
            .provision(&tenant.id, &tenant.name, options.region.as_deref())
            .await?;
        tenant.database_name = Some(provisioned.database_name.clone());

        let encrypted = self.vault.encrypt(&provisioned.connection_string)?;
        self.registry
            .update_connection_info(&tenant.id, &encrypted, &provisioned.database_name)
            .await?;
        self.registry
            .update_status(&tenant.id, TenantStatus::Provisioning)
            .await?;
        tenant.encrypted_connection_string = Some(encrypted);
        tenant.status = TenantStatus::Provisioning;
        info!(tenant_id = %tenant.id, "external database provisioned");

        self.schema.apply(&provisioned.connection_string).await?;

        self.registry
            .update_status(&tenant.id, TenantStatus::Active)
            .await?;
        tenant.status = TenantStatus::Active;
        Ok(())
    }
}
