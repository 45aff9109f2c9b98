//! # Task Queue
//!
//! Persistent set of pending tasks with lease-based claiming.
//!
//! ## Claiming
//!
//! `claim_due` atomically marks due, unclaimed tasks as owned by one dispatcher
//! instance until the lease expires. At most one instance therefore runs a given
//! attempt. A crashed instance never releases its claims, its leases simply expire
//! and the tasks become claimable again.
//!
//! Every state change after a claim (`reschedule`, `complete`, `dead_letter`) is
//! conditional on still owning the claim and returns `false` when the lease was
//! lost to another instance.

pub mod memory;
pub mod postgres;

use super::task::Task;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryTaskQueue;
pub use postgres::PgTaskQueue;

/// A task the engine gave up on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task; enqueueing an id that is already pending is a no-op
    async fn enqueue(&self, task: &Task) -> Result<()>;

    /// Claim up to `limit` tasks due at `now`, oldest eligibility first
    async fn claim_due(&self, owner: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Store the task's new schedule and release the claim
    async fn reschedule(&self, task: &Task, owner: &str) -> Result<bool>;

    /// Remove the task and enqueue its follow-ups in one step
    ///
    /// A follow-up whose kind equals a task still pending (claimed or not) is
    /// dropped, so a replayed attempt cannot start a second run of work that is
    /// already queued or in flight.
    async fn complete(&self, task_id: Uuid, owner: &str, follow_ups: &[Task]) -> Result<bool>;

    /// Park the task permanently with a reason
    async fn dead_letter(&self, task_id: Uuid, owner: &str, reason: &str) -> Result<bool>;

    /// A pending (not dead-lettered) task
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// All pending tasks, soonest eligible first
    async fn pending(&self) -> Result<Vec<Task>>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}
