//! # Registry Deployment Model
//!
//! A running deployment of the registry software that can host many tenants.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Available,
    Unavailable,
    /// Reachable, but accepts no new tenants
    Full,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "unavailable" => Ok(Self::Unavailable),
            "full" => Ok(Self::Full),
            _ => Err(format!("Invalid registry deployment status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDeployment {
    pub id: Uuid,
    /// Unique across all deployments
    pub name: String,
    pub status: DeploymentStatus,
    pub tenant_manager_url: String,
    pub registry_deployment_url: String,
    pub version: i64,
}

impl RegistryDeployment {
    pub fn new(
        name: impl Into<String>,
        tenant_manager_url: impl Into<String>,
        registry_deployment_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: DeploymentStatus::Available,
            tenant_manager_url: tenant_manager_url.into(),
            registry_deployment_url: registry_deployment_url.into(),
            version: 0,
        }
    }

    pub fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = status;
        self
    }

    /// Only available deployments may receive new registries
    pub fn is_eligible(&self) -> bool {
        self.status == DeploymentStatus::Available
    }
}
