//! Tenant records and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant lifecycle status.
///
/// Transitions are monotonic (`Creating → Provisioning → Active`), with
/// `Error` reachable from any non-terminal state. Recovery from `Error`
/// is manual remediation, not modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Registry placeholder exists; no external resources yet.
    Creating,
    /// External database provisioned; schema not yet applied.
    Provisioning,
    /// Fully provisioned and serving connections.
    Active,
    /// A provisioning step failed; manual remediation required.
    Error,
}

impl TenantStatus {
    /// Parse a status stored in the registry. Invalid values are rejected
    /// at the registry-client boundary so bad states cannot be constructed.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "provisioning" => Some(Self::Provisioning),
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Status name as stored in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single customer with its own isolated database.
///
/// The `encrypted_connection_string` is opaque ciphertext produced by the
/// credential vault; it is never logged and only decrypted inside the
/// connection cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    /// Opaque stable identifier, immutable once assigned.
    pub id: String,

    /// Human-facing display name.
    pub name: String,

    /// URL-safe identifier derived from the name, unique across tenants.
    pub slug: String,

    /// Lifecycle status.
    pub status: TenantStatus,

    /// Ciphertext of the tenant database connection string, once
    /// provisioned.
    pub encrypted_connection_string: Option<String>,

    /// The hosting provider's handle for the underlying database.
    pub database_name: Option<String>,

    /// Created timestamp.
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new placeholder tenant in `Creating` status.
    pub fn placeholder(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        let now = Utc::now();
        Self {
            id: id.into(),
            name,
            slug,
            status: TenantStatus::Creating,
            encrypted_connection_string: None,
            database_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this tenant may serve live connections to business logic.
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Derive a URL-safe slug from a display name.
///
/// Lowercases, maps runs of non-alphanumeric characters to single hyphens,
/// and trims leading/trailing hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
