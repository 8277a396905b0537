//! Multi-Tenant Database Router
//!
//! Database-per-tenant routing and provisioning: every tenant gets its own
//! isolated database, and this crate owns the plumbing between "a tenant id
//! arrives with a request" and "a query runs against that tenant's
//! database".
//!
//! # Features
//!
//! - 🔐 **Credential Vault** - AES-256-GCM encryption for connection strings
//! - 💾 **Connection Cache** - TTL-bounded pools, one per tenant, built once
//! - 📇 **Tenant Registry** - Lifecycle metadata with status state machine
//! - 🚀 **Provisioning** - Placeholder → external database → schema → active
//! - 📊 **Query Facade** - Parameterized queries routed by tenant id
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tenant_router::prelude::*;
//!
//! let config = TenancyConfig::from_env();
//! let registry_pool = sqlx::PgPool::connect(&registry_url).await?;
//! let router = TenantRouter::postgres(config, registry_pool).await?;
//!
//! // Provision a new tenant end to end.
//! let tenant = router
//!     .provision_new_tenant("Acme Corp", ProvisionOptions::default())
//!     .await?;
//!
//! // Route queries by tenant id.
//! let rows = router
//!     .query(
//!         &tenant.id,
//!         "SELECT id, name FROM clients WHERE is_active = $1",
//!         &[QueryParam::Bool(true)],
//!     )
//!     .await?;
//! ```
//!
//! # Custom Backends
//!
//! Every seam is a trait: implement [`PoolProvider`] for a different
//! database client, [`TenantRegistry`] for a different metadata store,
//! [`DatabaseProvisioner`] for a different hosting provider, and
//! [`SchemaApplier`] for a different migration strategy, then wire them
//! through [`TenantRouter::builder`].

pub mod cache;
pub mod config;
pub mod error;
pub mod pool;
pub mod provisioner;
pub mod provisioning;
pub mod query;
pub mod registry;
pub mod router;
pub mod schema;
pub mod tenant;
pub mod vault;

pub use cache::ConnectionCache;
pub use config::TenancyConfig;
pub use error::{TenancyError, TenancyResult};
pub use pool::{PoolProvider, QueryParam, QueryRow};
pub use provisioner::{DatabaseProvisioner, HttpDatabaseProvisioner, ProvisionedDatabase};
pub use provisioning::{ProvisionOptions, ProvisioningOrchestrator};
pub use query::QueryFacade;
pub use registry::{InMemoryTenantRegistry, TenantRegistry, new_placeholder};
pub use router::{TenantRouter, TenantRouterBuilder};
pub use schema::{SchemaApplier, TENANT_SCHEMA, TenantSchemaApplier};
pub use tenant::{Tenant, TenantStatus, slugify};
pub use vault::CredentialVault;

#[cfg(feature = "postgres")]
pub use pool::PgPoolProvider;
#[cfg(feature = "postgres")]
pub use registry::PgTenantRegistry;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::ConnectionCache;
    pub use crate::config::TenancyConfig;
    pub use crate::error::{TenancyError, TenancyResult};
    pub use crate::pool::{PoolProvider, QueryParam, QueryRow};
    pub use crate::provisioner::{DatabaseProvisioner, ProvisionedDatabase};
    pub use crate::provisioning::{ProvisionOptions, ProvisioningOrchestrator};
    pub use crate::query::QueryFacade;
    pub use crate::registry::TenantRegistry;
    pub use crate::router::TenantRouter;
    pub use crate::schema::SchemaApplier;
    pub use crate::tenant::{Tenant, TenantStatus};
    pub use crate::vault::CredentialVault;
}
