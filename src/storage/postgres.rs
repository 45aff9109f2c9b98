//! # Postgres Storage
//!
//! [`ResourceStorage`] backed by PostgreSQL through SQLx.
//!
//! Conditional writes are version-guarded statements:
//!
//! ```sql
//! UPDATE registries SET ..., version = version + 1
//! WHERE id = $1 AND version = $expected
//! ```
//!
//! Zero affected rows means somebody else committed first and is reported as
//! `Conflict`. Inserts (version 0) rely on the primary key and the unique name
//! constraints, whose violations are mapped to `Conflict` as well.

use super::{ResourceAccess, ResourceStorage, StorageTransaction};
use crate::error::{StorageError, StorageResult};
use crate::models::{DeploymentStatus, Registry, RegistryDeployment, RegistryStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

const REGISTRY_COLUMNS: &str = "id, name, owner, status, deployment_id, tenant_id, \
                                registry_url, version, created_at, updated_at";

const DEPLOYMENT_COLUMNS: &str =
    "id, name, status, tenant_manager_url, registry_deployment_url, version";

#[derive(Clone)]
pub struct PgResourceStorage {
    pool: PgPool,
}

impl PgResourceStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResourceStorage for PgResourceStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin storage transaction: {}", e);
            StorageError::from(e)
        })?;
        Ok(Box::new(PgStorageTransaction { tx }))
    }
}

pub struct PgStorageTransaction {
    tx: Transaction<'static, Postgres>,
}

/// Attach entity context to write failures
fn write_error(entity: &'static str, id: Uuid, err: sqlx::Error) -> StorageError {
    match StorageError::from(err) {
        StorageError::Conflict { reason, .. } => StorageError::conflict(entity, id, reason),
        other => other,
    }
}

#[async_trait]
impl ResourceAccess for PgStorageTransaction {
    async fn get_registry_by_id(&mut self, id: Uuid) -> StorageResult<Option<Registry>> {
        let row = sqlx::query_as::<_, RegistryRow>(&format!(
            "SELECT {REGISTRY_COLUMNS} FROM registries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Registry::try_from).transpose()
    }

    async fn get_all_registries(&mut self) -> StorageResult<Vec<Registry>> {
        let rows = sqlx::query_as::<_, RegistryRow>(&format!(
            "SELECT {REGISTRY_COLUMNS} FROM registries ORDER BY name"
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(Registry::try_from).collect()
    }

    async fn create_or_update_registry(&mut self, registry: Registry) -> StorageResult<Registry> {
        let id = registry.id;

        let row = if registry.version == 0 {
            sqlx::query_as::<_, RegistryRow>(&format!(
                "INSERT INTO registries ({REGISTRY_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, NOW()) \
                 RETURNING {REGISTRY_COLUMNS}"
            ))
            .bind(id)
            .bind(&registry.name)
            .bind(&registry.owner)
            .bind(registry.status.to_string())
            .bind(registry.deployment_id)
            .bind(&registry.tenant_id)
            .bind(&registry.registry_url)
            .bind(registry.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| write_error("registry", id, e))?
        } else {
            sqlx::query_as::<_, RegistryRow>(&format!(
                "UPDATE registries SET name = $2, owner = $3, status = $4, deployment_id = $5, \
                 tenant_id = $6, registry_url = $7, version = version + 1, updated_at = NOW() \
                 WHERE id = $1 AND version = $8 \
                 RETURNING {REGISTRY_COLUMNS}"
            ))
            .bind(id)
            .bind(&registry.name)
            .bind(&registry.owner)
            .bind(registry.status.to_string())
            .bind(registry.deployment_id)
            .bind(&registry.tenant_id)
            .bind(&registry.registry_url)
            .bind(registry.version)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| write_error("registry", id, e))?
            .ok_or_else(|| {
                StorageError::conflict(
                    "registry",
                    id,
                    format!("stored version no longer matches {}", registry.version),
                )
            })?
        };

        debug!(registry_id = %id, version = row.version, "Registry stored");
        Registry::try_from(row)
    }

    async fn delete_registry(&mut self, id: Uuid) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM registries WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| write_error("registry", id, e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("registry", id));
        }
        Ok(())
    }

    async fn get_registry_deployment_by_id(
        &mut self,
        id: Uuid,
    ) -> StorageResult<Option<RegistryDeployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM registry_deployments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(RegistryDeployment::try_from).transpose()
    }

    async fn get_all_registry_deployments(&mut self) -> StorageResult<Vec<RegistryDeployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM registry_deployments ORDER BY name"
        ))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(RegistryDeployment::try_from).collect()
    }

    async fn create_or_update_registry_deployment(
        &mut self,
        deployment: RegistryDeployment,
    ) -> StorageResult<RegistryDeployment> {
        let id = deployment.id;

        let row = if deployment.version == 0 {
            sqlx::query_as::<_, DeploymentRow>(&format!(
                "INSERT INTO registry_deployments ({DEPLOYMENT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, 1) \
                 RETURNING {DEPLOYMENT_COLUMNS}"
            ))
            .bind(id)
            .bind(&deployment.name)
            .bind(deployment.status.to_string())
            .bind(&deployment.tenant_manager_url)
            .bind(&deployment.registry_deployment_url)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| write_error("registry deployment", id, e))?
        } else {
            sqlx::query_as::<_, DeploymentRow>(&format!(
                "UPDATE registry_deployments SET name = $2, status = $3, \
                 tenant_manager_url = $4, registry_deployment_url = $5, version = version + 1 \
                 WHERE id = $1 AND version = $6 \
                 RETURNING {DEPLOYMENT_COLUMNS}"
            ))
            .bind(id)
            .bind(&deployment.name)
            .bind(deployment.status.to_string())
            .bind(&deployment.tenant_manager_url)
            .bind(&deployment.registry_deployment_url)
            .bind(deployment.version)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| write_error("registry deployment", id, e))?
            .ok_or_else(|| {
                StorageError::conflict(
                    "registry deployment",
                    id,
                    format!("stored version no longer matches {}", deployment.version),
                )
            })?
        };

        RegistryDeployment::try_from(row)
    }
}

#[async_trait]
impl StorageTransaction for PgStorageTransaction {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await.map_err(StorageError::from)
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx.rollback().await.map_err(StorageError::from)
    }
}

#[derive(FromRow)]
struct RegistryRow {
    id: Uuid,
    name: String,
    owner: String,
    status: String,
    deployment_id: Option<Uuid>,
    tenant_id: Option<String>,
    registry_url: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegistryRow> for Registry {
    type Error = StorageError;

    fn try_from(row: RegistryRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RegistryStatus>()
            .map_err(StorageError::Database)?;
        Ok(Registry {
            id: row.id,
            name: row.name,
            owner: row.owner,
            status,
            deployment_id: row.deployment_id,
            tenant_id: row.tenant_id,
            registry_url: row.registry_url,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DeploymentRow {
    id: Uuid,
    name: String,
    status: String,
    tenant_manager_url: String,
    registry_deployment_url: String,
    version: i64,
}

impl TryFrom<DeploymentRow> for RegistryDeployment {
    type Error = StorageError;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<DeploymentStatus>()
            .map_err(StorageError::Database)?;
        Ok(RegistryDeployment {
            id: row.id,
            name: row.name,
            status,
            tenant_manager_url: row.tenant_manager_url,
            registry_deployment_url: row.registry_deployment_url,
            version: row.version,
        })
    }
}
