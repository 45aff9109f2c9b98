//! # Schedule Registry Worker
//!
//! Places a `Requested` registry onto one eligible registry deployment.
//!
//! ```text
//! requested ──(eligible deployment, write committed)──▶ provisioning ──▶ ProvisionRegistryTenant
//!     │
//!     ├─ registry not visible yet ──▶ retry()
//!     ├─ no eligible deployment   ──▶ retry_after(no_capacity_retry_delay)
//!     └─ conflicting writer       ──▶ Failed(Conflict), rescheduled with backoff
//! ```
//!
//! The assignment is one conditional write over the registry as it was read in
//! this attempt, so two instances racing on the same registry can never both
//! succeed.

use crate::config::SchedulingConfig;
use crate::error::{FleetError, Result, StorageError};
use crate::execution::{ExecuteResult, Task, TaskKind, TaskType, Worker, WorkerContext};
use crate::models::{RegistryDeployment, RegistryStatus};
use crate::storage::{ResourceAccess, ResourceStorage};
use crate::workers::selector::{DeploymentSelector, RandomDeploymentSelector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ScheduleRegistryWorker {
    storage: Arc<dyn ResourceStorage>,
    selector: Arc<dyn DeploymentSelector>,
    config: SchedulingConfig,
}

impl ScheduleRegistryWorker {
    pub fn new(storage: Arc<dyn ResourceStorage>, config: SchedulingConfig) -> Self {
        Self::with_selector(storage, Arc::new(RandomDeploymentSelector), config)
    }

    pub fn with_selector(
        storage: Arc<dyn ResourceStorage>,
        selector: Arc<dyn DeploymentSelector>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            storage,
            selector,
            config,
        }
    }

    fn registry_id(task: &Task) -> Result<Uuid> {
        match task.kind() {
            TaskKind::ScheduleRegistry { registry_id } => Ok(*registry_id),
            other => Err(FleetError::Validation(format!(
                "Schedule registry worker cannot handle {} tasks",
                other.task_type()
            ))),
        }
    }
}

/// Non-conflict write failures are tagged so compensation can tell them apart
fn assignment_error(registry_id: Uuid, err: StorageError) -> FleetError {
    match err {
        StorageError::Conflict { .. } => err.into(),
        other => FleetError::Persistence {
            entity: "registry",
            id: registry_id.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Worker for ScheduleRegistryWorker {
    fn name(&self) -> &'static str {
        "schedule_registry_worker"
    }

    fn supports(&self, task_type: TaskType) -> bool {
        task_type == TaskType::ScheduleRegistry
    }

    async fn execute(&self, task: &Task, ctx: &mut WorkerContext) -> ExecuteResult {
        let registry_id = Self::registry_id(task)?;

        let Some(mut registry) = ctx.storage().get_registry_by_id(registry_id).await? else {
            let attempt = task.schedule().retries() + 1;
            if attempt >= self.config.registry_lookup_attempts {
                warn!(
                    registry_id = %registry_id,
                    attempts = attempt,
                    "Registry never became visible, abandoning scheduling"
                );
                return Ok(());
            }
            debug!(registry_id = %registry_id, "Registry not visible yet");
            return Err(ctx.retry());
        };

        if registry.is_scheduled() {
            // A previous attempt committed but its follow-up never reached the queue
            if registry.status == RegistryStatus::Provisioning {
                info!(
                    registry_id = %registry_id,
                    deployment_id = ?registry.deployment_id,
                    "Registry already scheduled, requesting provisioning again"
                );
                ctx.delay(Task::provision_registry_tenant(registry_id));
            }
            return Ok(());
        }

        if registry.status != RegistryStatus::Requested {
            info!(
                registry_id = %registry_id,
                status = %registry.status,
                "Registry is not awaiting scheduling"
            );
            return Ok(());
        }

        let eligible: Vec<RegistryDeployment> = ctx
            .storage()
            .get_all_registry_deployments()
            .await?
            .into_iter()
            .filter(|deployment| deployment.is_eligible())
            .collect();

        let Some(deployment) = self.selector.select(&eligible) else {
            warn!(
                registry_id = %registry_id,
                "Could not schedule registry with ID {}. No deployments are available",
                registry_id
            );
            return Err(ctx.retry_after(self.config.no_capacity_retry_delay()));
        };

        info!(
            registry_id = %registry_id,
            registry = %registry.name,
            deployment_id = %deployment.id,
            deployment = %deployment.name,
            "📦 Scheduling registry"
        );
        registry.assign_deployment(deployment.id);

        let stored = ctx
            .storage()
            .create_or_update_registry(registry)
            .await
            .map_err(|e| assignment_error(registry_id, e))?;

        ctx.delay(Task::provision_registry_tenant(stored.id));
        Ok(())
    }

    async fn finally_execute(&self, task: &Task, error: Option<&FleetError>) -> Result<()> {
        let registry_id = Self::registry_id(task)?;

        let Some(registry) = self.storage.get_registry_by_id(registry_id).await? else {
            return Ok(());
        };
        if registry.is_scheduled() {
            return Ok(());
        }

        // Only a failed assignment write leaves nothing recoverable at this layer
        if !matches!(error, Some(FleetError::Persistence { .. })) {
            return Ok(());
        }

        warn!(
            registry_id = %registry_id,
            "Registry assignment could not be persisted, deleting registry"
        );
        match self.storage.delete_registry(registry_id).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Interrupt;
    use crate::models::{DeploymentStatus, Registry};
    use crate::storage::{InMemoryStorage, StorageTransaction};
    use crate::workers::selector::FirstDeploymentSelector;
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        storage: InMemoryStorage,
        worker: ScheduleRegistryWorker,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = InMemoryStorage::new();
            let worker = ScheduleRegistryWorker::with_selector(
                Arc::new(storage.clone()),
                Arc::new(FirstDeploymentSelector),
                SchedulingConfig::default(),
            );
            Self { storage, worker }
        }

        async fn context(&self) -> WorkerContext {
            WorkerContext::new(
                self.storage.begin().await.unwrap(),
                Duration::from_millis(1000),
                Utc::now(),
            )
        }

        async fn run(&self, task: &Task) -> (ExecuteResult, Vec<Task>) {
            let mut ctx = self.context().await;
            let result = self.worker.execute(task, &mut ctx).await;
            let (tx, follow_ups) = ctx.into_parts();
            if result.is_ok() {
                tx.commit().await.unwrap();
            } else {
                tx.rollback().await.unwrap();
            }
            (result, follow_ups)
        }
    }

    #[tokio::test]
    async fn test_assigns_eligible_deployment_and_requests_provisioning() {
        let fixture = Fixture::new();
        let deployment = fixture
            .storage
            .create_or_update_registry_deployment(RegistryDeployment::new(
                "eu-1",
                "http://tm",
                "http://registry",
            ))
            .await
            .unwrap();
        let registry = fixture
            .storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();

        let task = Task::schedule_registry(registry.id);
        let (result, follow_ups) = fixture.run(&task).await;

        assert!(result.is_ok());
        let stored = fixture
            .storage
            .get_registry_by_id(registry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RegistryStatus::Provisioning);
        assert_eq!(stored.deployment_id, Some(deployment.id));
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(
            follow_ups[0].kind(),
            &TaskKind::ProvisionRegistryTenant {
                registry_id: registry.id
            }
        );
    }

    #[tokio::test]
    async fn test_no_eligible_deployment_waits_for_capacity() {
        let fixture = Fixture::new();
        fixture
            .storage
            .create_or_update_registry_deployment(
                RegistryDeployment::new("eu-1", "http://tm", "http://registry")
                    .with_status(DeploymentStatus::Full),
            )
            .await
            .unwrap();
        let registry = fixture
            .storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();

        let (result, follow_ups) = fixture.run(&Task::schedule_registry(registry.id)).await;

        assert!(matches!(result, Err(Interrupt::Retry(d)) if d == Duration::from_secs(30)));
        assert!(follow_ups.is_empty());
        let stored = fixture
            .storage
            .get_registry_by_id(registry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, registry);
    }

    #[tokio::test]
    async fn test_missing_registry_retries_then_gives_up() {
        let fixture = Fixture::new();
        let mut task = Task::schedule_registry(Uuid::new_v4());

        let (result, _) = fixture.run(&task).await;
        assert!(matches!(result, Err(Interrupt::Retry(d)) if d == Duration::from_millis(1000)));

        let limit = SchedulingConfig::default().registry_lookup_attempts;
        let mut schedule = *task.schedule();
        for _ in 1..limit {
            schedule = schedule.next_attempt(Utc::now(), Duration::ZERO);
        }
        task.set_schedule(schedule);

        let (result, follow_ups) = fixture.run(&task).await;
        assert!(result.is_ok());
        assert!(follow_ups.is_empty());
    }

    #[tokio::test]
    async fn test_failed_attempts_do_not_count_as_lookups() {
        let fixture = Fixture::new();
        let mut task = Task::schedule_registry(Uuid::new_v4());

        let limit = SchedulingConfig::default().registry_lookup_attempts;
        let mut schedule = *task.schedule();
        for _ in 0..limit {
            schedule = schedule.next_after_failure(Utc::now(), Duration::ZERO);
        }
        task.set_schedule(schedule);

        let (result, _) = fixture.run(&task).await;
        assert!(matches!(result, Err(Interrupt::Retry(_))));
    }

    #[tokio::test]
    async fn test_already_scheduled_registry_re_requests_provisioning() {
        let fixture = Fixture::new();
        let mut registry = Registry::new("payments", "alice");
        registry.assign_deployment(Uuid::new_v4());
        let registry = fixture
            .storage
            .create_or_update_registry(registry)
            .await
            .unwrap();

        let (result, follow_ups) = fixture.run(&Task::schedule_registry(registry.id)).await;

        assert!(result.is_ok());
        assert_eq!(follow_ups.len(), 1);
        let stored = fixture
            .storage
            .get_registry_by_id(registry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, registry.version);
    }

    #[tokio::test]
    async fn test_compensation_ignores_conflicts_and_assigned_registries() {
        let fixture = Fixture::new();
        let registry = fixture
            .storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();
        let task = Task::schedule_registry(registry.id);

        let conflict: FleetError = StorageError::conflict("registry", registry.id, "stale").into();
        fixture
            .worker
            .finally_execute(&task, Some(&conflict))
            .await
            .unwrap();
        fixture.worker.finally_execute(&task, None).await.unwrap();

        assert!(fixture
            .storage
            .get_registry_by_id(registry.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_compensation_deletes_unassigned_registry_after_persistence_failure() {
        let fixture = Fixture::new();
        let registry = fixture
            .storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();
        let task = Task::schedule_registry(registry.id);
        let failure = assignment_error(registry.id, StorageError::Database("down".to_string()));

        fixture
            .worker
            .finally_execute(&task, Some(&failure))
            .await
            .unwrap();
        // Second run finds nothing left to delete
        fixture
            .worker
            .finally_execute(&task, Some(&failure))
            .await
            .unwrap();

        assert!(fixture
            .storage
            .get_registry_by_id(registry.id)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_supports_only_scheduling() {
        let fixture = Fixture::new();
        assert!(fixture.worker.supports(TaskType::ScheduleRegistry));
        assert!(!fixture.worker.supports(TaskType::ProvisionRegistryTenant));
    }
}
