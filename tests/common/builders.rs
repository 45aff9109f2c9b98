//! Test fixtures wiring a task manager over in-memory collaborators.

use super::faulty_storage::FaultyStorage;
use fleet_core::config::FleetConfig;
use fleet_core::execution::{InMemoryTaskQueue, Task, TaskManager, WorkerRegistry};
use fleet_core::models::{DeploymentStatus, Registry, RegistryDeployment};
use fleet_core::storage::{InMemoryStorage, ResourceStorage};
use fleet_core::tenant_manager::InMemoryTenantManager;
use fleet_core::workers::{
    FirstDeploymentSelector, ProvisionRegistryTenantWorker, ScheduleRegistryWorker,
};
use std::sync::Arc;
use uuid::Uuid;

/// Deterministic configuration: no backoff jitter, fixed instance id
pub fn test_config(instance_id: &str) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.backoff.jitter_enabled = false;
    config.task_manager.instance_id = Some(instance_id.to_string());
    config.task_manager.poll_interval_ms = 10;
    config
}

pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Built-in workers with first-candidate placement
pub fn fleet_workers(
    storage: Arc<dyn ResourceStorage>,
    tenants: Arc<InMemoryTenantManager>,
    config: &FleetConfig,
) -> WorkerRegistry {
    WorkerRegistry::builder()
        .register(ScheduleRegistryWorker::with_selector(
            Arc::clone(&storage),
            Arc::new(FirstDeploymentSelector),
            config.scheduling.clone(),
        ))
        .register(ProvisionRegistryTenantWorker::new(
            storage,
            tenants,
            config.scheduling.clone(),
        ))
        .build()
        .expect("built-in workers cover every task type")
}

/// One task manager with the built-in workers over shared in-memory state
pub struct TestFleet {
    pub storage: FaultyStorage,
    pub queue: InMemoryTaskQueue,
    pub tenants: Arc<InMemoryTenantManager>,
    pub config: FleetConfig,
    pub manager: TaskManager,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_instance("test-instance")
    }

    pub fn with_instance(instance_id: &str) -> Self {
        let storage = FaultyStorage::new(InMemoryStorage::new());
        let queue = InMemoryTaskQueue::default();
        let tenants = Arc::new(InMemoryTenantManager::new());
        let config = test_config(instance_id);
        let manager = Self::build_manager(&storage, &queue, &tenants, &config);
        Self {
            storage,
            queue,
            tenants,
            config,
            manager,
        }
    }

    /// Another dispatcher instance sharing this fleet's storage and queue
    pub fn peer(&self, instance_id: &str) -> TaskManager {
        Self::build_manager(
            &self.storage,
            &self.queue,
            &self.tenants,
            &test_config(instance_id),
        )
    }

    fn build_manager(
        storage: &FaultyStorage,
        queue: &InMemoryTaskQueue,
        tenants: &Arc<InMemoryTenantManager>,
        config: &FleetConfig,
    ) -> TaskManager {
        let storage: Arc<dyn ResourceStorage> = Arc::new(storage.clone());
        let workers = fleet_workers(Arc::clone(&storage), Arc::clone(tenants), config);
        TaskManager::new(Arc::new(queue.clone()), storage, workers, config)
    }

    pub async fn add_deployment(&self, name: &str) -> RegistryDeployment {
        self.add_deployment_with_status(name, DeploymentStatus::Available)
            .await
    }

    pub async fn add_deployment_with_status(
        &self,
        name: &str,
        status: DeploymentStatus,
    ) -> RegistryDeployment {
        self.storage
            .create_or_update_registry_deployment(
                RegistryDeployment::new(
                    name,
                    format!("http://{name}.tenant-manager"),
                    format!("https://{name}.registry.example"),
                )
                .with_status(status),
            )
            .await
            .expect("Failed to create test registry deployment")
    }

    pub async fn add_registry(&self) -> Registry {
        self.storage
            .create_or_update_registry(Registry::new(unique_name("registry"), "acme"))
            .await
            .expect("Failed to create test registry")
    }

    pub async fn registry(&self, id: Uuid) -> Option<Registry> {
        self.storage
            .get_registry_by_id(id)
            .await
            .expect("Failed to read test registry")
    }

    /// Submit a scheduling task for `registry`
    pub async fn schedule(&self, registry: &Registry) -> Task {
        let task = Task::schedule_registry(registry.id);
        self.manager
            .submit(task.clone())
            .await
            .expect("Failed to submit task");
        task
    }
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}
