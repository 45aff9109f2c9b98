//! # Error Types
//!
//! Error taxonomy for the fleet task engine.
//!
//! Storage failures are kept in their own [`StorageError`] type because the
//! engine and its workers branch on them: `NotFound` is usually an expected
//! outcome, `Conflict` is the optimistic-concurrency signal and `Database`
//! covers everything else the backend can report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A conditional write lost a race, or a uniqueness constraint was violated
    #[error(
        "Could not create, update or delete {entity} {id}: {reason}. \
         Make sure the data is valid and does not conflict with other stored entities"
    )]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Postgres SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound {
                entity: "row",
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StorageError::Conflict {
                    entity: "row",
                    id: db_err.constraint().unwrap_or("unknown").to_string(),
                    reason: db_err.message().to_string(),
                }
            }
            _ => StorageError::Database(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Queue error: {0}")]
    Queue(String),
    /// A worker's own write failed for a reason other than a conflict
    #[error("Failed to persist {entity} {id}: {reason}")]
    Persistence {
        entity: &'static str,
        id: String,
        reason: String,
    },
    #[error("External service error: {0}")]
    External(String),
}

impl FleetError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, FleetError::Storage(StorageError::Conflict { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::Storage(StorageError::NotFound { .. }))
    }

    /// Coarse classification; `Permanent` failures are dead-lettered instead of retried
    pub fn category(&self) -> ErrorCategory {
        match self {
            FleetError::Storage(StorageError::Conflict { .. }) => ErrorCategory::Conflict,
            FleetError::Storage(_)
            | FleetError::Queue(_)
            | FleetError::External(_)
            | FleetError::Persistence { .. } => ErrorCategory::Transient,
            FleetError::Configuration(_) => ErrorCategory::Configuration,
            FleetError::Validation(_) => ErrorCategory::Permanent,
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(error: serde_json::Error) -> Self {
        FleetError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(err: sqlx::Error) -> Self {
        FleetError::Storage(err.into())
    }
}

impl From<config::ConfigError> for FleetError {
    fn from(err: config::ConfigError) -> Self {
        FleetError::Configuration(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for FleetError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        FleetError::Storage(StorageError::Database(format!("Migration failed: {err}")))
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Primary error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// May succeed on a later attempt
    Transient,
    /// Optimistic-concurrency violation, retry against fresh state
    Conflict,
    /// Requires operator intervention
    Configuration,
    /// Will never succeed if retried unchanged
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}
