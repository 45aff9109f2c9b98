//! In-process [`TenantManagerClient`] keyed by tenant manager URL.

use super::{Tenant, TenantManagerClient, TenantRequest};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryTenantManager {
    tenants: Arc<DashMap<(String, String), Tenant>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryTenantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with an external error until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, tenant_manager_url: &str, tenant_id: &str) -> Option<Tenant> {
        self.tenants
            .get(&(tenant_manager_url.to_string(), tenant_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FleetError::External(
                "Tenant manager is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantManagerClient for InMemoryTenantManager {
    async fn create_tenant(
        &self,
        tenant_manager_url: &str,
        request: &TenantRequest,
    ) -> Result<Tenant> {
        self.check_available()?;
        let tenant = self
            .tenants
            .entry((tenant_manager_url.to_string(), request.tenant_id.clone()))
            .or_insert_with(|| Tenant::from(request))
            .value()
            .clone();
        Ok(tenant)
    }

    async fn delete_tenant(&self, tenant_manager_url: &str, tenant_id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .tenants
            .remove(&(tenant_manager_url.to_string(), tenant_id.to_string()))
            .is_some())
    }
}
