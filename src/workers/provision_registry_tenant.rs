//! # Provision Registry Tenant Worker
//!
//! Follow-up of scheduling: creates the registry's tenant on the tenant manager
//! of its assigned deployment and marks the registry `Available`.
//!
//! Tenant creation is an external effect the attempt's transaction cannot roll
//! back. The tenant id is the registry id, so a replayed attempt finds the same
//! tenant, and `finally_execute` deletes the tenant again when the attempt failed
//! to record it.
//!
//! Compensation reads the registry outside the attempt's transaction, so it
//! assumes no second provisioning attempt for the same registry overlaps this
//! one. The task queue keeps at most one live provisioning task per registry by
//! dropping follow-ups whose kind is already pending. A lease that expires
//! mid-attempt can still break the assumption.

use crate::config::SchedulingConfig;
use crate::error::{FleetError, Result, StorageError};
use crate::execution::{ExecuteResult, Task, TaskKind, TaskType, Worker, WorkerContext};
use crate::models::{Registry, RegistryDeployment, RegistryStatus};
use crate::storage::{ResourceAccess, ResourceStorage};
use crate::tenant_manager::{TenantManagerClient, TenantRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ProvisionRegistryTenantWorker {
    storage: Arc<dyn ResourceStorage>,
    tenants: Arc<dyn TenantManagerClient>,
    config: SchedulingConfig,
}

impl ProvisionRegistryTenantWorker {
    pub fn new(
        storage: Arc<dyn ResourceStorage>,
        tenants: Arc<dyn TenantManagerClient>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            storage,
            tenants,
            config,
        }
    }

    fn registry_id(task: &Task) -> Result<Uuid> {
        match task.kind() {
            TaskKind::ProvisionRegistryTenant { registry_id } => Ok(*registry_id),
            other => Err(FleetError::Validation(format!(
                "Provision registry tenant worker cannot handle {} tasks",
                other.task_type()
            ))),
        }
    }

    fn tenant_request(registry: &Registry) -> TenantRequest {
        TenantRequest {
            tenant_id: registry.id.to_string(),
            organization_id: registry.owner.clone(),
        }
    }
}

fn registry_url(deployment: &RegistryDeployment, tenant_id: &str) -> String {
    format!(
        "{}/t/{tenant_id}",
        deployment.registry_deployment_url.trim_end_matches('/')
    )
}

#[async_trait]
impl Worker for ProvisionRegistryTenantWorker {
    fn name(&self) -> &'static str {
        "provision_registry_tenant_worker"
    }

    fn supports(&self, task_type: TaskType) -> bool {
        task_type == TaskType::ProvisionRegistryTenant
    }

    async fn execute(&self, task: &Task, ctx: &mut WorkerContext) -> ExecuteResult {
        let registry_id = Self::registry_id(task)?;

        let Some(mut registry) = ctx.storage().get_registry_by_id(registry_id).await? else {
            let attempt = task.schedule().retries() + 1;
            if attempt >= self.config.registry_lookup_attempts {
                warn!(
                    registry_id = %registry_id,
                    attempts = attempt,
                    "Registry disappeared, abandoning provisioning"
                );
                return Ok(());
            }
            return Err(ctx.retry());
        };

        if registry.status == RegistryStatus::Available {
            debug!(registry_id = %registry_id, "Registry already provisioned");
            return Ok(());
        }

        let Some(deployment_id) = registry.deployment_id else {
            return Err(FleetError::Validation(format!(
                "Registry {registry_id} has no deployment to provision on"
            ))
            .into());
        };

        let deployment = ctx
            .storage()
            .get_registry_deployment_by_id(deployment_id)
            .await?
            .ok_or_else(|| StorageError::not_found("registry deployment", deployment_id))?;

        let tenant = self
            .tenants
            .create_tenant(
                &deployment.tenant_manager_url,
                &Self::tenant_request(&registry),
            )
            .await?;

        registry.registry_url = Some(registry_url(&deployment, &tenant.tenant_id));
        registry.tenant_id = Some(tenant.tenant_id);
        registry.status = RegistryStatus::Available;
        let stored = ctx.storage().create_or_update_registry(registry).await?;

        info!(
            registry_id = %registry_id,
            deployment = %deployment.name,
            registry_url = ?stored.registry_url,
            "✅ Registry tenant provisioned"
        );
        Ok(())
    }

    async fn finally_execute(&self, task: &Task, error: Option<&FleetError>) -> Result<()> {
        if error.is_none() {
            return Ok(());
        }
        let registry_id = Self::registry_id(task)?;

        let Some(registry) = self.storage.get_registry_by_id(registry_id).await? else {
            return Ok(());
        };
        if registry.status == RegistryStatus::Available {
            return Ok(());
        }
        let Some(deployment_id) = registry.deployment_id else {
            return Ok(());
        };
        let Some(deployment) = self
            .storage
            .get_registry_deployment_by_id(deployment_id)
            .await?
        else {
            return Ok(());
        };

        let tenant_id = registry.id.to_string();
        if self
            .tenants
            .delete_tenant(&deployment.tenant_manager_url, &tenant_id)
            .await?
        {
            warn!(
                registry_id = %registry_id,
                tenant_id = %tenant_id,
                "Removed tenant of a failed provisioning attempt"
            );
        }
        Ok(())
    }
}
