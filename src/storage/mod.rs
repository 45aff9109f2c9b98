//! # Resource Storage
//!
//! The persistence boundary the task engine depends on.
//!
//! ## Consistency Contract
//!
//! - `create_or_update_*` is a conditional write: the stored `version` must equal the
//!   version carried by the entity (version `0` means the entity must not exist yet).
//!   Any mismatch, and any uniqueness violation, fails with [`StorageError::Conflict`]
//!   instead of overwriting a concurrent modification.
//! - `delete_*` fails with [`StorageError::NotFound`] when the entity is absent.
//! - A [`StorageTransaction`] is the isolation unit of one task attempt. Nothing it
//!   wrote is visible to others before `commit`, and `rollback` (or dropping it)
//!   discards everything.
//!
//! [`StorageError::Conflict`]: crate::error::StorageError::Conflict
//! [`StorageError::NotFound`]: crate::error::StorageError::NotFound

pub mod memory;
pub mod postgres;

use crate::error::StorageResult;
use crate::models::{Registry, RegistryDeployment};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::InMemoryStorage;
pub use postgres::PgResourceStorage;

/// Entity operations shared by the storage handle and its transactions
#[async_trait]
pub trait ResourceAccess: Send {
    async fn get_registry_by_id(&mut self, id: Uuid) -> StorageResult<Option<Registry>>;

    async fn get_all_registries(&mut self) -> StorageResult<Vec<Registry>>;

    /// Conditional create-or-update; returns the stored entity with its new version
    async fn create_or_update_registry(&mut self, registry: Registry) -> StorageResult<Registry>;

    async fn delete_registry(&mut self, id: Uuid) -> StorageResult<()>;

    async fn get_registry_deployment_by_id(
        &mut self,
        id: Uuid,
    ) -> StorageResult<Option<RegistryDeployment>>;

    async fn get_all_registry_deployments(&mut self) -> StorageResult<Vec<RegistryDeployment>>;

    async fn create_or_update_registry_deployment(
        &mut self,
        deployment: RegistryDeployment,
    ) -> StorageResult<RegistryDeployment>;
}

/// One attempt's transactional scope
#[async_trait]
pub trait StorageTransaction: ResourceAccess {
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Shared storage handle; every call outside a transaction commits on its own
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>>;

    async fn get_registry_by_id(&self, id: Uuid) -> StorageResult<Option<Registry>> {
        let mut tx = self.begin().await?;
        let registry = tx.get_registry_by_id(id).await?;
        tx.commit().await?;
        Ok(registry)
    }

    async fn get_all_registries(&self) -> StorageResult<Vec<Registry>> {
        let mut tx = self.begin().await?;
        let registries = tx.get_all_registries().await?;
        tx.commit().await?;
        Ok(registries)
    }

    async fn create_or_update_registry(&self, registry: Registry) -> StorageResult<Registry> {
        let mut tx = self.begin().await?;
        let stored = tx.create_or_update_registry(registry).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_registry(&self, id: Uuid) -> StorageResult<()> {
        let mut tx = self.begin().await?;
        tx.delete_registry(id).await?;
        tx.commit().await
    }

    async fn get_registry_deployment_by_id(
        &self,
        id: Uuid,
    ) -> StorageResult<Option<RegistryDeployment>> {
        let mut tx = self.begin().await?;
        let deployment = tx.get_registry_deployment_by_id(id).await?;
        tx.commit().await?;
        Ok(deployment)
    }

    async fn get_all_registry_deployments(&self) -> StorageResult<Vec<RegistryDeployment>> {
        let mut tx = self.begin().await?;
        let deployments = tx.get_all_registry_deployments().await?;
        tx.commit().await?;
        Ok(deployments)
    }

    async fn create_or_update_registry_deployment(
        &self,
        deployment: RegistryDeployment,
    ) -> StorageResult<RegistryDeployment> {
        let mut tx = self.begin().await?;
        let stored = tx.create_or_update_registry_deployment(deployment).await?;
        tx.commit().await?;
        Ok(stored)
    }
}
