//! # In-Memory Storage
//!
//! Process-local [`ResourceStorage`] with the same optimistic-concurrency contract
//! as the Postgres backend. Used for embedding the engine and for tests.
//!
//! Transactions buffer their writes. Every write is checked against the state the
//! transaction can see, and all of them are re-validated against the committed
//! state when the transaction commits, so of two transactions that read the same
//! version and both write, only the first to commit succeeds.

use super::{ResourceAccess, ResourceStorage, StorageTransaction};
use crate::error::{StorageError, StorageResult};
use crate::models::{Registry, RegistryDeployment};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Entities the in-memory tables can hold
trait Versioned: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);
    fn touch(&mut self) {}
}

impl Versioned for Registry {
    const ENTITY: &'static str = "registry";

    fn id(&self) -> Uuid {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> i64 {
        self.version
    }
    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Versioned for RegistryDeployment {
    const ENTITY: &'static str = "registry deployment";

    fn id(&self) -> Uuid {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> i64 {
        self.version
    }
    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

/// A buffered write; `value == None` is a delete
#[derive(Debug, Clone)]
struct Change<T> {
    /// Committed version when the transaction first touched the row, `None` if absent
    base_version: Option<i64>,
    value: Option<T>,
}

struct Changes<T>(HashMap<Uuid, Change<T>>);

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<T: Versioned> Changes<T> {
    fn get(&self, committed: &HashMap<Uuid, T>, id: Uuid) -> Option<T> {
        match self.0.get(&id) {
            Some(change) => change.value.clone(),
            None => committed.get(&id).cloned(),
        }
    }

    fn all(&self, committed: &HashMap<Uuid, T>) -> Vec<T> {
        let mut merged: HashMap<Uuid, T> = committed.clone();
        for (id, change) in &self.0 {
            match &change.value {
                Some(value) => {
                    merged.insert(*id, value.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        let mut values: Vec<T> = merged.into_values().collect();
        values.sort_by(|a, b| a.name().cmp(b.name()));
        values
    }

    fn upsert(&mut self, committed: &HashMap<Uuid, T>, mut entity: T) -> StorageResult<T> {
        let id = entity.id();
        let current = self.get(committed, id);

        match &current {
            Some(stored) if stored.version() != entity.version() => {
                return Err(StorageError::conflict(
                    T::ENTITY,
                    id,
                    format!(
                        "stored version {} does not match expected version {}",
                        stored.version(),
                        entity.version()
                    ),
                ));
            }
            None if entity.version() != 0 => {
                return Err(StorageError::conflict(
                    T::ENTITY,
                    id,
                    format!(
                        "entity was removed concurrently (expected version {})",
                        entity.version()
                    ),
                ));
            }
            _ => {}
        }

        let duplicate = self
            .all(committed)
            .into_iter()
            .any(|other| other.id() != id && other.name() == entity.name());
        if duplicate {
            return Err(StorageError::conflict(
                T::ENTITY,
                id,
                format!("name '{}' is already in use", entity.name()),
            ));
        }

        entity.set_version(entity.version() + 1);
        entity.touch();

        let base_version = self.base_version(committed, id);
        self.0.insert(
            id,
            Change {
                base_version,
                value: Some(entity.clone()),
            },
        );
        Ok(entity)
    }

    fn delete(&mut self, committed: &HashMap<Uuid, T>, id: Uuid) -> StorageResult<()> {
        if self.get(committed, id).is_none() {
            return Err(StorageError::not_found(T::ENTITY, id));
        }
        let base_version = self.base_version(committed, id);
        self.0.insert(
            id,
            Change {
                base_version,
                value: None,
            },
        );
        Ok(())
    }

    fn base_version(&self, committed: &HashMap<Uuid, T>, id: Uuid) -> Option<i64> {
        match self.0.get(&id) {
            Some(change) => change.base_version,
            None => committed.get(&id).map(Versioned::version),
        }
    }

    /// Check that nothing this transaction depends on changed since it was read
    fn validate(&self, committed: &HashMap<Uuid, T>) -> StorageResult<()> {
        for (id, change) in &self.0 {
            let current = committed.get(id).map(Versioned::version);
            if current != change.base_version {
                return Err(StorageError::conflict(
                    T::ENTITY,
                    id,
                    "modified concurrently since it was read",
                ));
            }
        }

        let merged = self.all(committed);
        for (id, change) in &self.0 {
            if let Some(value) = &change.value {
                if merged
                    .iter()
                    .any(|other| other.id() != *id && other.name() == value.name())
                {
                    return Err(StorageError::conflict(
                        T::ENTITY,
                        id,
                        format!("name '{}' is already in use", value.name()),
                    ));
                }
            }
        }
        Ok(())
    }

    fn apply(self, committed: &mut HashMap<Uuid, T>) {
        for (id, change) in self.0 {
            match change.value {
                Some(value) => {
                    committed.insert(id, value);
                }
                None => {
                    committed.remove(&id);
                }
            }
        }
    }
}

#[derive(Default)]
struct Tables {
    registries: HashMap<Uuid, Registry>,
    deployments: HashMap<Uuid, RegistryDeployment>,
}

/// Cloneable handle; clones share the same tables
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStorage for InMemoryStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            registries: Changes::default(),
            deployments: Changes::default(),
        }))
    }
}

pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    registries: Changes<Registry>,
    deployments: Changes<RegistryDeployment>,
}

#[async_trait]
impl ResourceAccess for InMemoryTransaction {
    async fn get_registry_by_id(&mut self, id: Uuid) -> StorageResult<Option<Registry>> {
        let tables = self.tables.read();
        Ok(self.registries.get(&tables.registries, id))
    }

    async fn get_all_registries(&mut self) -> StorageResult<Vec<Registry>> {
        let tables = self.tables.read();
        Ok(self.registries.all(&tables.registries))
    }

    async fn create_or_update_registry(&mut self, registry: Registry) -> StorageResult<Registry> {
        let tables = self.tables.read();
        self.registries.upsert(&tables.registries, registry)
    }

    async fn delete_registry(&mut self, id: Uuid) -> StorageResult<()> {
        let tables = self.tables.read();
        self.registries.delete(&tables.registries, id)
    }

    async fn get_registry_deployment_by_id(
        &mut self,
        id: Uuid,
    ) -> StorageResult<Option<RegistryDeployment>> {
        let tables = self.tables.read();
        Ok(self.deployments.get(&tables.deployments, id))
    }

    async fn get_all_registry_deployments(&mut self) -> StorageResult<Vec<RegistryDeployment>> {
        let tables = self.tables.read();
        Ok(self.deployments.all(&tables.deployments))
    }

    async fn create_or_update_registry_deployment(
        &mut self,
        deployment: RegistryDeployment,
    ) -> StorageResult<RegistryDeployment> {
        let tables = self.tables.read();
        self.deployments.upsert(&tables.deployments, deployment)
    }
}

#[async_trait]
impl StorageTransaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let InMemoryTransaction {
            tables,
            registries,
            deployments,
        } = *self;

        let mut tables = tables.write();
        registries.validate(&tables.registries)?;
        deployments.validate(&tables.deployments)?;
        registries.apply(&mut tables.registries);
        deployments.apply(&mut tables.deployments);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentStatus, RegistryStatus};

    #[tokio::test]
    async fn test_create_then_update_bumps_version() {
        let storage = InMemoryStorage::new();
        let created = storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let mut update = created.clone();
        update.status = RegistryStatus::Failed;
        let updated = storage.create_or_update_registry(update).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_stale_write_is_a_conflict() {
        let storage = InMemoryStorage::new();
        let created = storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();

        storage
            .create_or_update_registry(created.clone())
            .await
            .unwrap();

        let err = storage.create_or_update_registry(created).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_a_conflict() {
        let storage = InMemoryStorage::new();
        storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();

        let err = storage
            .create_or_update_registry(Registry::new("payments", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.delete_registry(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_and_discarded() {
        let storage = InMemoryStorage::new();
        let registry = Registry::new("payments", "alice");
        let id = registry.id;

        let mut tx = storage.begin().await.unwrap();
        tx.create_or_update_registry(registry).await.unwrap();
        assert!(tx.get_registry_by_id(id).await.unwrap().is_some());
        assert!(storage.get_registry_by_id(id).await.unwrap().is_none());

        tx.rollback().await.unwrap();
        assert!(storage.get_registry_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_committer_loses_the_race() {
        let storage = InMemoryStorage::new();
        let registry = storage
            .create_or_update_registry(Registry::new("payments", "alice"))
            .await
            .unwrap();
        let first_target = storage
            .create_or_update_registry_deployment(RegistryDeployment::new("eu-1", "tm1", "r1"))
            .await
            .unwrap();
        let second_target = storage
            .create_or_update_registry_deployment(
                RegistryDeployment::new("eu-2", "tm2", "r2").with_status(DeploymentStatus::Available),
            )
            .await
            .unwrap();

        let mut tx1 = storage.begin().await.unwrap();
        let mut tx2 = storage.begin().await.unwrap();

        let mut r1 = tx1.get_registry_by_id(registry.id).await.unwrap().unwrap();
        let mut r2 = tx2.get_registry_by_id(registry.id).await.unwrap().unwrap();
        r1.assign_deployment(first_target.id);
        r2.assign_deployment(second_target.id);
        tx1.create_or_update_registry(r1).await.unwrap();
        tx2.create_or_update_registry(r2).await.unwrap();

        tx1.commit().await.unwrap();
        let err = tx2.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let stored = storage.get_registry_by_id(registry.id).await.unwrap().unwrap();
        assert_eq!(stored.deployment_id, Some(first_target.id));
        assert_eq!(stored.version, 2);
    }
}
