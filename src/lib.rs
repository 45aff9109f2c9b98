#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleet Core
//!
//! Asynchronous task execution engine for a service-registry fleet manager.
//!
//! ## Overview
//!
//! Customers request registries; the engine places each requested registry onto
//! one of several registry deployments and drives it through provisioning. The
//! work is expressed as persisted tasks dispatched by a [`TaskManager`], which
//! may run in several processes at once against shared storage.
//!
//! ## Architecture
//!
//! - Every task kind is handled by exactly one [`Worker`], validated when the
//!   [`WorkerRegistry`] is built
//! - Each attempt runs inside one storage transaction; a worker ends it early
//!   with `retry()`/`retry_after()` or asks for follow-up work with `delay()`
//! - Follow-up tasks are enqueued only after the attempt's transaction commits
//! - Entity writes are conditional on the version read earlier, so concurrent
//!   attempts lose with a conflict instead of overwriting each other
//!
//! ## Module Organization
//!
//! - [`execution`] - Task model, worker contract, queue and dispatcher
//! - [`workers`] - Registry scheduling and tenant provisioning workers
//! - [`storage`] - Resource storage boundary (PostgreSQL and in-memory)
//! - [`models`] - Registry and registry deployment entities
//! - [`tenant_manager`] - Tenant manager client boundary
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleet_core::config::FleetConfig;
//! use fleet_core::execution::{InMemoryTaskQueue, Task, TaskManager};
//! use fleet_core::models::{Registry, RegistryDeployment};
//! use fleet_core::storage::{InMemoryStorage, ResourceStorage};
//! use fleet_core::tenant_manager::InMemoryTenantManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> fleet_core::Result<()> {
//! let config = FleetConfig::default();
//! let storage = Arc::new(InMemoryStorage::new());
//! let workers = fleet_core::workers::default_registry(
//!     storage.clone(),
//!     Arc::new(InMemoryTenantManager::new()),
//!     &config.scheduling,
//! )?;
//! let manager = TaskManager::new(Arc::new(InMemoryTaskQueue::default()), storage.clone(), workers, &config);
//!
//! storage
//!     .create_or_update_registry_deployment(RegistryDeployment::new("eu-1", "http://tm", "http://registry"))
//!     .await?;
//! let registry = storage.create_or_update_registry(Registry::new("payments", "acme")).await?;
//! manager.submit(Task::schedule_registry(registry.id)).await?;
//! manager.process_due_tasks().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod storage;
pub mod tenant_manager;
pub mod workers;

pub use config::{ConfigManager, FleetConfig};
pub use error::{ErrorCategory, FleetError, Result, StorageError};
pub use execution::{
    DispatchResult, Task, TaskKind, TaskManager, TaskSchedule, TaskType, Worker, WorkerContext,
    WorkerRegistry,
};
pub use models::{DeploymentStatus, Registry, RegistryDeployment, RegistryStatus};
pub use storage::{ResourceStorage, StorageTransaction};
