//! Storage wrapper that injects one-shot failures into the next registry write
//! or commit.

use async_trait::async_trait;
use fleet_core::error::{StorageError, StorageResult};
use fleet_core::models::{Registry, RegistryDeployment};
use fleet_core::storage::{InMemoryStorage, ResourceAccess, ResourceStorage, StorageTransaction};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Another writer commits a change to the same registry just before the write
    ConcurrentRegistryWrite,
    /// The registry write fails with a database error
    RegistryWriteFails,
    /// The transaction fails to commit
    CommitFails,
}

#[derive(Clone, Default)]
pub struct FaultyStorage {
    inner: InMemoryStorage,
    pending: Arc<Mutex<Option<Fault>>>,
}

impl FaultyStorage {
    pub fn new(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            pending: Arc::default(),
        }
    }

    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    /// Arm a fault for the next matching operation
    pub fn inject(&self, fault: Fault) {
        *self.pending.lock() = Some(fault);
    }

    pub fn is_armed(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[async_trait]
impl ResourceStorage for FaultyStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            storage: self.inner.clone(),
            pending: Arc::clone(&self.pending),
        }))
    }
}

pub struct FaultyTransaction {
    inner: Box<dyn StorageTransaction>,
    storage: InMemoryStorage,
    pending: Arc<Mutex<Option<Fault>>>,
}

impl FaultyTransaction {
    fn take_if(&self, wanted: &[Fault]) -> Option<Fault> {
        let mut pending = self.pending.lock();
        if pending.is_some_and(|fault| wanted.contains(&fault)) {
            pending.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl ResourceAccess for FaultyTransaction {
    async fn get_registry_by_id(&mut self, id: Uuid) -> StorageResult<Option<Registry>> {
        self.inner.get_registry_by_id(id).await
    }

    async fn get_all_registries(&mut self) -> StorageResult<Vec<Registry>> {
        self.inner.get_all_registries().await
    }

    async fn create_or_update_registry(&mut self, registry: Registry) -> StorageResult<Registry> {
        match self.take_if(&[Fault::ConcurrentRegistryWrite, Fault::RegistryWriteFails]) {
            Some(Fault::ConcurrentRegistryWrite) => {
                // Committed outside this transaction, bumping the stored version
                if let Some(current) = self.storage.get_registry_by_id(registry.id).await? {
                    self.storage.create_or_update_registry(current).await?;
                }
            }
            Some(_) => {
                return Err(StorageError::Database(
                    "connection reset by peer".to_string(),
                ));
            }
            None => {}
        }
        self.inner.create_or_update_registry(registry).await
    }

    async fn delete_registry(&mut self, id: Uuid) -> StorageResult<()> {
        self.inner.delete_registry(id).await
    }

    async fn get_registry_deployment_by_id(
        &mut self,
        id: Uuid,
    ) -> StorageResult<Option<RegistryDeployment>> {
        self.inner.get_registry_deployment_by_id(id).await
    }

    async fn get_all_registry_deployments(&mut self) -> StorageResult<Vec<RegistryDeployment>> {
        self.inner.get_all_registry_deployments().await
    }

    async fn create_or_update_registry_deployment(
        &mut self,
        deployment: RegistryDeployment,
    ) -> StorageResult<RegistryDeployment> {
        self.inner.create_or_update_registry_deployment(deployment).await
    }
}

#[async_trait]
impl StorageTransaction for FaultyTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.take_if(&[Fault::CommitFails]).is_some() {
            self.inner.rollback().await?;
            return Err(StorageError::Database("commit failed".to_string()));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.inner.rollback().await
    }
}
