//! # Workers
//!
//! Concrete [`Worker`](crate::execution::Worker) implementations, one per task type.
//!
//! Workers hold only shared, thread-safe collaborators. Use
//! [`default_registry`] to register the complete set.

pub mod provision_registry_tenant;
pub mod schedule_registry;
pub mod selector;

pub use provision_registry_tenant::ProvisionRegistryTenantWorker;
pub use schedule_registry::ScheduleRegistryWorker;
pub use selector::{DeploymentSelector, FirstDeploymentSelector, RandomDeploymentSelector};

use crate::config::SchedulingConfig;
use crate::error::Result;
use crate::execution::WorkerRegistry;
use crate::storage::ResourceStorage;
use crate::tenant_manager::TenantManagerClient;
use std::sync::Arc;

/// Registry with every built-in worker, validated for totality
pub fn default_registry(
    storage: Arc<dyn ResourceStorage>,
    tenants: Arc<dyn TenantManagerClient>,
    config: &SchedulingConfig,
) -> Result<WorkerRegistry> {
    WorkerRegistry::builder()
        .register(ScheduleRegistryWorker::new(
            Arc::clone(&storage),
            config.clone(),
        ))
        .register(ProvisionRegistryTenantWorker::new(
            storage,
            tenants,
            config.clone(),
        ))
        .build()
}
