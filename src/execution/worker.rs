//! # Worker Contract
//!
//! One implementation per task type. Workers are immutable value-holders over
//! thread-safe collaborators (`Arc<dyn ResourceStorage>`, clients); all per-attempt
//! state lives in the [`WorkerContext`].

use super::context::{ExecuteResult, WorkerContext};
use super::task::{Task, TaskType};
use crate::error::{FleetError, Result};
use async_trait::async_trait;

#[async_trait]
pub trait Worker: Send + Sync {
    /// Name used in logs and registry validation messages
    fn name(&self) -> &'static str;

    /// Pure predicate on the task type
    fn supports(&self, task_type: TaskType) -> bool;

    /// Side-effecting work, run inside the attempt's transaction
    ///
    /// Returning `Err` rolls the transaction back. Effects that cannot be rolled
    /// back do not belong here unless `finally_execute` compensates for them.
    async fn execute(&self, task: &Task, ctx: &mut WorkerContext) -> ExecuteResult;

    /// Best-effort compensation, always run after `execute`
    ///
    /// Must be idempotent and must not assume `execute` ran to completion; `error`
    /// is the failure the attempt ended with, if any. Errors are logged by the
    /// dispatcher and never rethrown.
    async fn finally_execute(&self, task: &Task, error: Option<&FleetError>) -> Result<()>;
}
