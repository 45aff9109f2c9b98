//! # Worker Context
//!
//! The control-flow handle a worker receives for one attempt.
//!
//! `retry()` and `retry_after()` build an [`Interrupt`] that the worker returns
//! through `Err(..)`, which ends the attempt immediately and rolls back its
//! transaction. `delay()` queues a follow-up task that is submitted only after the
//! attempt's transaction commits, so a rolled-back attempt never leaks follow-ups.
//!
//! ```rust,ignore
//! let Some(registry) = ctx.storage().get_registry_by_id(id).await? else {
//!     return Err(ctx.retry());
//! };
//! ```

use super::task::Task;
use crate::error::{FleetError, StorageError};
use crate::storage::StorageTransaction;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Early exit from `Worker::execute`
#[derive(Debug)]
pub enum Interrupt {
    /// Not actionable yet; run again after the delay without counting as a failure
    Retry(Duration),
    /// Unhandled error; the attempt is rolled back and rescheduled with backoff
    Failed(FleetError),
}

impl From<FleetError> for Interrupt {
    fn from(error: FleetError) -> Self {
        Interrupt::Failed(error)
    }
}

impl From<StorageError> for Interrupt {
    fn from(error: StorageError) -> Self {
        Interrupt::Failed(error.into())
    }
}

pub type ExecuteResult = std::result::Result<(), Interrupt>;

/// Terminal result of one attempt as seen by the dispatcher
#[derive(Debug)]
pub enum Outcome {
    /// Transaction committed; follow-ups are due for submission
    Completed { follow_ups: Vec<Task> },
    RetryAfter(Duration),
    Failed(FleetError),
}

impl Outcome {
    pub fn error(&self) -> Option<&FleetError> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

pub struct WorkerContext {
    transaction: Box<dyn StorageTransaction>,
    follow_ups: Vec<Task>,
    default_retry_delay: Duration,
    started_at: DateTime<Utc>,
}

impl WorkerContext {
    pub fn new(
        transaction: Box<dyn StorageTransaction>,
        default_retry_delay: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction,
            follow_ups: Vec::new(),
            default_retry_delay,
            started_at,
        }
    }

    /// Storage access inside this attempt's transaction
    pub fn storage(&mut self) -> &mut dyn StorageTransaction {
        self.transaction.as_mut()
    }

    /// Re-attempt after the default short delay
    pub fn retry(&self) -> Interrupt {
        Interrupt::Retry(self.default_retry_delay)
    }

    /// Re-attempt after `delay`, for conditions expected to resolve slowly
    pub fn retry_after(&self, delay: Duration) -> Interrupt {
        Interrupt::Retry(delay)
    }

    /// Submit `task` once this attempt has committed
    pub fn delay(&mut self, task: Task) {
        self.follow_ups.push(task);
    }

    /// When the dispatcher started this attempt; retry delays count from here
    pub fn attempt_started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The attempt's transaction and the follow-ups it requested
    pub fn into_parts(self) -> (Box<dyn StorageTransaction>, Vec<Task>) {
        (self.transaction, self.follow_ups)
    }
}
