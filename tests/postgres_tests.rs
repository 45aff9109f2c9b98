//! PostgreSQL storage and queue behavior.
//!
//! Needs a reachable database in `DATABASE_URL`; run with `cargo test -- --ignored`.

use chrono::Utc;
use fleet_core::error::StorageError;
use fleet_core::execution::{DispatchResult, PgTaskQueue, Task, TaskManager, TaskQueue};
use fleet_core::models::{Registry, RegistryDeployment, RegistryStatus};
use fleet_core::storage::{PgResourceStorage, ResourceAccess, ResourceStorage, StorageTransaction};
use fleet_core::tenant_manager::InMemoryTenantManager;
use fleet_core::FleetConfig;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

fn deployment(name: &str) -> RegistryDeployment {
    RegistryDeployment::new(
        name,
        format!("http://{name}.tenant-manager"),
        format!("https://{name}.registry.example"),
    )
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_conditional_update_detects_stale_version(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = PgResourceStorage::new(pool);
    let created = storage
        .create_or_update_registry(Registry::new("payments", "acme"))
        .await?;
    assert_eq!(created.version, 1);

    let mut first = created.clone();
    first.status = RegistryStatus::Failed;
    let updated = storage.create_or_update_registry(first).await?;
    assert_eq!(updated.version, 2);

    let mut stale = created;
    stale.status = RegistryStatus::Deleting;
    let err = storage.create_or_update_registry(stale).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { entity: "registry", .. }));

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_name_is_a_conflict(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let storage = PgResourceStorage::new(pool);
    storage
        .create_or_update_registry(Registry::new("payments", "acme"))
        .await?;

    let err = storage
        .create_or_update_registry(Registry::new("payments", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_delete_missing_registry_is_not_found(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = PgResourceStorage::new(pool);
    let registry = storage
        .create_or_update_registry(Registry::new("payments", "acme"))
        .await?;

    storage.delete_registry(registry.id).await?;
    let err = storage.delete_registry(registry.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_rolled_back_transaction_leaves_no_trace(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = PgResourceStorage::new(pool);

    let mut tx = storage.begin().await?;
    let registry = tx
        .create_or_update_registry(Registry::new("payments", "acme"))
        .await?;
    tx.rollback().await?;

    assert!(storage.get_registry_by_id(registry.id).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_claims_are_exclusive_until_lease_expires(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = PgTaskQueue::new(pool, Duration::from_secs(10));
    let task = Task::schedule_registry(uuid::Uuid::new_v4());
    queue.enqueue(&task).await?;
    queue.enqueue(&task).await?;

    let now = Utc::now() + chrono::Duration::seconds(1);
    let claimed = queue.claim_due("a", 10, now).await?;
    assert_eq!(claimed, vec![task.clone()]);
    assert!(queue.claim_due("b", 10, now).await?.is_empty());

    let after_lease = now + chrono::Duration::seconds(11);
    assert_eq!(queue.claim_due("b", 10, after_lease).await?.len(), 1);
    assert!(!queue.complete(task.id(), "a", &[]).await?);

    let follow_up = Task::provision_registry_tenant(uuid::Uuid::new_v4());
    assert!(queue.complete(task.id(), "b", &[follow_up.clone()]).await?);
    assert_eq!(queue.pending().await?, vec![follow_up]);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_schedules_registry_end_to_end(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = FleetConfig::default();
    config.backoff.jitter_enabled = false;
    config.task_manager.instance_id = Some("pg-test".to_string());

    let storage = Arc::new(PgResourceStorage::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(pool, config.task_manager.claim_timeout()));
    let tenants = Arc::new(InMemoryTenantManager::new());
    let workers =
        fleet_core::workers::default_registry(storage.clone(), tenants.clone(), &config.scheduling)?;
    let manager = TaskManager::new(queue.clone(), storage.clone(), workers, &config);

    let deployment = storage
        .create_or_update_registry_deployment(deployment("eu-1"))
        .await?;
    let registry = storage
        .create_or_update_registry(Registry::new("payments", "acme"))
        .await?;
    manager.submit(Task::schedule_registry(registry.id)).await?;

    let now = Utc::now() + chrono::Duration::seconds(1);
    let mut results = Vec::new();
    for task in queue.claim_due("pg-test", 10, now).await? {
        results.push(manager.dispatch(task).await?);
    }
    for task in queue.claim_due("pg-test", 10, now).await? {
        results.push(manager.dispatch(task).await?);
    }

    assert_eq!(
        results,
        vec![
            DispatchResult::Completed { follow_ups: 1 },
            DispatchResult::Completed { follow_ups: 0 },
        ]
    );
    let stored = storage
        .get_registry_by_id(registry.id)
        .await?
        .expect("registry exists");
    assert_eq!(stored.status, RegistryStatus::Available);
    assert_eq!(stored.deployment_id, Some(deployment.id));
    assert_eq!(tenants.len(), 1);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_follow_up_already_pending_is_not_inserted_twice(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = PgTaskQueue::new(pool, Duration::from_secs(10));
    let registry_id = uuid::Uuid::new_v4();
    let scheduling = Task::schedule_registry(registry_id);
    let provisioning = Task::provision_registry_tenant(registry_id);
    queue.enqueue(&scheduling).await?;
    queue.enqueue(&provisioning).await?;

    let now = Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(queue.claim_due("a", 10, now).await?.len(), 2);
    let replayed = Task::provision_registry_tenant(registry_id);
    assert!(queue.complete(scheduling.id(), "a", &[replayed.clone()]).await?);

    assert_eq!(queue.pending().await?, vec![provisioning]);
    assert!(queue.get(replayed.id()).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_reschedule_persists_failure_count(
    pool: PgPool,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = PgTaskQueue::new(pool, Duration::from_secs(10));
    queue
        .enqueue(&Task::schedule_registry(uuid::Uuid::new_v4()))
        .await?;

    let now = Utc::now() + chrono::Duration::seconds(1);
    let task = queue.claim_due("a", 1, now).await?.remove(0);
    let schedule = task
        .schedule()
        .next_attempt(now, Duration::from_secs(30))
        .next_after_failure(now, Duration::ZERO);
    let rescheduled = Task::restore(task.id(), task.kind().clone(), schedule);
    assert!(queue.reschedule(&rescheduled, "a").await?);

    let stored = queue.get(task.id()).await?.expect("task still pending");
    assert_eq!(stored.schedule().attempts, 2);
    assert_eq!(stored.schedule().failures, 1);
    assert_eq!(stored.schedule().retries(), 1);
    Ok(())
}
