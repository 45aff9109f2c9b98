//! # Tenant Manager
//!
//! Client boundary to the tenant manager running next to each registry
//! deployment. Creating a tenant is the side effect that turns a scheduled
//! registry into a reachable one.
//!
//! Both operations are idempotent: creating an existing tenant returns it, and
//! deleting an absent tenant reports `false` instead of failing.

pub mod http;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpTenantManagerClient;
pub use memory::InMemoryTenantManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRequest {
    pub tenant_id: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub tenant_id: String,
    pub organization_id: String,
}

impl From<&TenantRequest> for Tenant {
    fn from(request: &TenantRequest) -> Self {
        Self {
            tenant_id: request.tenant_id.clone(),
            organization_id: request.organization_id.clone(),
        }
    }
}

#[async_trait]
pub trait TenantManagerClient: Send + Sync {
    /// Create the tenant, or return it unchanged when it already exists
    async fn create_tenant(&self, tenant_manager_url: &str, request: &TenantRequest)
        -> Result<Tenant>;

    /// Delete the tenant; `Ok(false)` when it did not exist
    async fn delete_tenant(&self, tenant_manager_url: &str, tenant_id: &str) -> Result<bool>;
}
