//! # Fleet Configuration System
//!
//! Layered configuration for the task engine and its service process.
//!
//! ## Architecture
//!
//! - **Defaults first**: every field has a safe default so an empty environment still boots
//! - **Environment awareness**: `config/fleet.toml` is overlaid by `config/fleet.<env>.toml`
//! - **Env var overrides**: `FLEET__TASK_MANAGER__BATCH_SIZE=20` style keys win last
//! - **Explicit validation**: nonsensical values are rejected at load time, not at dispatch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll_interval = manager.config().task_manager.poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/fleet.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Dispatch loop configuration
    pub task_manager: TaskManagerConfig,

    /// Backoff applied to attempts that fail with an error
    pub backoff: BackoffConfig,

    /// Registry scheduling worker settings
    pub scheduling: SchedulingConfig,

    /// Structured logging settings
    pub logging: LoggingConfig,
}

impl FleetConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.task_manager.validate()?;
        self.backoff.validate()?;
        self.scheduling.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply `migrations/` on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/fleet_manager_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(FleetError::Configuration(
                "database.url must not be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(FleetError::Configuration(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dispatch loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Sleep between polls when no task was due
    pub poll_interval_ms: u64,
    /// Maximum number of tasks claimed per poll
    pub batch_size: usize,
    /// Maximum number of attempts running at once in this process
    pub max_concurrent_tasks: usize,
    /// Delay used by `WorkerContext::retry()`
    pub default_retry_delay_ms: u64,
    /// Lease length of a task claim; an expired lease makes the task claimable again
    pub claim_timeout_seconds: u64,
    /// Claim owner identity, generated when absent
    pub instance_id: Option<String>,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 10,
            max_concurrent_tasks: 4,
            default_retry_delay_ms: 1000,
            claim_timeout_seconds: 300, // 5 minutes
            instance_id: None,
        }
    }
}

impl TaskManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_seconds)
    }

    /// Configured instance id, or a fresh `hostname-uuid` style identifier
    pub fn resolve_instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "fleet".to_string());
            format!("{host}-{}", uuid::Uuid::new_v4())
        })
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FleetError::Configuration(
                "task_manager.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(FleetError::Configuration(
                "task_manager.max_concurrent_tasks must be greater than zero".to_string(),
            ));
        }
        if self.default_retry_delay_ms == 0 {
            return Err(FleetError::Configuration(
                "task_manager.default_retry_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.claim_timeout_seconds == 0 {
            return Err(FleetError::Configuration(
                "task_manager.claim_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff for failed attempts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Maximum jitter as a fraction of the computed delay (0.0 to 1.0)
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(FleetError::Configuration(
                "backoff.base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(FleetError::Configuration(format!(
                "backoff.max_delay_ms ({}) must not be below backoff.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.multiplier < 1.0 {
            return Err(FleetError::Configuration(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_jitter) {
            return Err(FleetError::Configuration(
                "backoff.max_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Registry scheduling worker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Retry delay while no deployment is eligible; capacity is added by operators, so wait longer
    pub no_capacity_retry_delay_ms: u64,
    /// Not-found attempts tolerated before a scheduling task is abandoned
    pub registry_lookup_attempts: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            no_capacity_retry_delay_ms: 30_000,
            registry_lookup_attempts: 10,
        }
    }
}

impl SchedulingConfig {
    pub fn no_capacity_retry_delay(&self) -> Duration {
        Duration::from_millis(self.no_capacity_retry_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.no_capacity_retry_delay_ms == 0 {
            return Err(FleetError::Configuration(
                "scheduling.no_capacity_retry_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.registry_lookup_attempts == 0 {
            return Err(FleetError::Configuration(
                "scheduling.registry_lookup_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; defaults by environment when absent
    pub level: Option<String>,
    pub json: bool,
    /// Also write JSON logs to files in this directory
    pub log_dir: Option<String>,
}
