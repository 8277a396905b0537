//! Error types for tenant routing and provisioning.

use crate::tenant::TenantStatus;
use thiserror::Error;

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Tenancy errors.
///
/// Each layer wraps its underlying cause into its own category so callers
/// can distinguish "this tenant is broken" from "the routing layer itself
/// is down" from "this one statement was malformed".
#[derive(Debug, Error)]
pub enum TenancyError {
    /// Missing or invalid encryption key or provisioning credentials.
    /// Operator-fixable; not surfaced to end users.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Tenant does not exist in the registry.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// Tenant exists but is not in `active` status.
    #[error("tenant {id} is not active (status: {status})")]
    TenantUnavailable { id: String, status: TenantStatus },

    /// Placeholder insert collided with an existing tenant id or slug.
    #[error("tenant already exists: {0}")]
    TenantAlreadyExists(String),

    /// The shared registry store itself is unreachable or rejected an
    /// operation. Distinct from any single tenant's database being down.
    #[error("registry error: {0}")]
    Registry(String),

    /// External provisioning API failure.
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// A specific tenant's database is unreachable, failed its health
    /// check, or its pool was evicted mid-use. Retryable: one retry will
    /// repopulate the connection cache.
    #[error("tenant database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// A statement failed after a successful connection.
    #[error("query failed: {0}")]
    Query(String),
}

impl TenancyError {
    /// Whether a single caller-side retry is expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TenancyError::DatabaseUnavailable(_))
    }
}
