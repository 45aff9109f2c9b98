//! # Domain Models
//!
//! Entities owned by the storage collaborator and read or written by workers.
//!
//! Both entities carry a `version` column used as the optimistic-concurrency
//! token: a conditional write succeeds only when the stored version still
//! equals the version the caller read. Version `0` means "never stored".

pub mod registry;
pub mod registry_deployment;

pub use registry::{Registry, RegistryStatus};
pub use registry_deployment::{DeploymentStatus, RegistryDeployment};
