//! # Registry Model
//!
//! A logical service registry requested by a customer. The scheduling worker
//! assigns it to exactly one [`RegistryDeployment`](super::RegistryDeployment)
//! and the provisioning worker turns it into a reachable tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStatus {
    /// Accepted from the API, not yet placed on a deployment
    Requested,
    /// Placed on a deployment, tenant not yet created
    Provisioning,
    /// Tenant exists and the registry URL is reachable
    Available,
    Failed,
    Deleting,
}

impl fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Available => write!(f, "available"),
            Self::Failed => write!(f, "failed"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

impl std::str::FromStr for RegistryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "provisioning" => Ok(Self::Provisioning),
            "available" => Ok(Self::Available),
            "failed" => Ok(Self::Failed),
            "deleting" => Ok(Self::Deleting),
            _ => Err(format!("Invalid registry status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub id: Uuid,
    /// Unique across all registries
    pub name: String,
    pub owner: String,
    pub status: RegistryStatus,
    /// Assigned deployment, set once by the scheduling worker
    pub deployment_id: Option<Uuid>,
    pub tenant_id: Option<String>,
    pub registry_url: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registry {
    /// A new, never-stored registry in `Requested` status
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner: owner.into(),
            status: RegistryStatus::Requested,
            deployment_id: None,
            tenant_id: None,
            registry_url: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.deployment_id.is_some()
    }

    /// Place the registry on a deployment and move it to `Provisioning`
    pub fn assign_deployment(&mut self, deployment_id: Uuid) {
        self.deployment_id = Some(deployment_id);
        self.status = RegistryStatus::Provisioning;
    }
}
