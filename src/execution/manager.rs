//! # Task Manager
//!
//! Submits tasks and drives due ones through their workers.
//!
//! ## Attempt Lifecycle
//!
//! ```text
//! claim_due ─▶ worker_for(type) ─▶ begin tx ─▶ execute ─┬─ Ok        ─▶ commit ─▶ Completed
//!                    │                                  ├─ Retry(d)  ─▶ rollback ─▶ RetryAfter(d)
//!                    │                                  └─ Failed(e) ─▶ rollback ─▶ Failed(e)
//!                    ▼
//!              dead_letter                   finally_execute (always, errors logged)
//!                                                      │
//!   Completed          ─▶ complete + follow-ups
//!   RetryAfter         ─▶ reschedule after d
//!   Failed, transient  ─▶ reschedule with backoff over prior failures
//!   Failed, permanent  ─▶ dead_letter
//! ```
//!
//! Several processes may run this loop against the same queue; the queue's claim
//! leases keep any one attempt on a single instance. Follow-up tasks requested with
//! `WorkerContext::delay` are enqueued together with the completion, and only
//! once the attempt's storage transaction has committed.

use super::backoff::BackoffCalculator;
use super::context::{Interrupt, Outcome, WorkerContext};
use super::queue::TaskQueue;
use super::registry::WorkerRegistry;
use super::task::Task;
use super::worker::Worker;
use crate::config::{FleetConfig, TaskManagerConfig};
use crate::error::{ErrorCategory, Result};
use crate::logging::log_task_operation;
use crate::storage::ResourceStorage;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What happened to a task after one dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Completed { follow_ups: usize },
    Retried { next_eligible_at: DateTime<Utc> },
    Failed { next_eligible_at: DateTime<Utc> },
    DeadLettered,
    /// The claim expired and another instance now owns the task
    ClaimLost,
}

/// Counters for one `process_due_tasks` poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub claims_lost: usize,
    /// Dispatches that could not record their result in the queue
    pub errors: usize,
}

impl DispatchSummary {
    fn record(&mut self, result: &Result<DispatchResult>) {
        match result {
            Ok(DispatchResult::Completed { .. }) => self.completed += 1,
            Ok(DispatchResult::Retried { .. }) => self.retried += 1,
            Ok(DispatchResult::Failed { .. }) => self.failed += 1,
            Ok(DispatchResult::DeadLettered) => self.dead_lettered += 1,
            Ok(DispatchResult::ClaimLost) => self.claims_lost += 1,
            Err(_) => self.errors += 1,
        }
    }
}

#[derive(Clone)]
pub struct TaskManager {
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn ResourceStorage>,
    workers: Arc<WorkerRegistry>,
    backoff: BackoffCalculator,
    config: TaskManagerConfig,
    instance_id: String,
}

impl TaskManager {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn ResourceStorage>,
        workers: WorkerRegistry,
        config: &FleetConfig,
    ) -> Self {
        let instance_id = config.task_manager.resolve_instance_id();
        info!(instance_id = %instance_id, "🚀 Task manager created");

        Self {
            queue,
            storage,
            workers: Arc::new(workers),
            backoff: BackoffCalculator::new(config.backoff.clone()),
            config: config.task_manager.clone(),
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Enqueue a new task for future dispatch
    ///
    /// Workers must not call this for follow-up work; they use
    /// `WorkerContext::delay` so the follow-up waits for their commit.
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.queue.enqueue(&task).await?;
        log_task_operation(
            "submit",
            &task.id().to_string(),
            task.task_type().as_str(),
            "queued",
            None,
        );
        Ok(())
    }

    /// Claim one batch of due tasks and dispatch them concurrently
    pub async fn process_due_tasks(&self) -> Result<DispatchSummary> {
        let tasks = self
            .queue
            .claim_due(&self.instance_id, self.config.batch_size, Utc::now())
            .await?;

        let mut summary = DispatchSummary {
            claimed: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            return Ok(summary);
        }

        let results: Vec<Result<DispatchResult>> = stream::iter(tasks)
            .map(|task| self.dispatch(task))
            .buffer_unordered(self.config.max_concurrent_tasks)
            .collect()
            .await;

        for result in &results {
            if let Err(e) = result {
                error!(error = %e, "Dispatch result could not be recorded");
            }
            summary.record(result);
        }

        debug!(summary = ?summary, "Processed due tasks");
        Ok(summary)
    }

    /// Run one attempt of a claimed task and record its result
    pub async fn dispatch(&self, task: Task) -> Result<DispatchResult> {
        let span = info_span!(
            "task_attempt",
            task_id = %task.id(),
            task_type = %task.task_type(),
            attempt = task.schedule().attempts + 1
        );

        self.dispatch_attempt(task).instrument(span).await
    }

    async fn dispatch_attempt(&self, task: Task) -> Result<DispatchResult> {
        let Some(worker) = self.workers.worker_for(task.task_type()) else {
            let reason = format!("No worker supports task type {}", task.task_type());
            error!(reason = %reason, "💥 Fatal dispatch error, dead-lettering task");
            let parked = self
                .queue
                .dead_letter(task.id(), &self.instance_id, &reason)
                .await?;
            return Ok(if parked {
                DispatchResult::DeadLettered
            } else {
                DispatchResult::ClaimLost
            });
        };
        let worker = Arc::clone(worker);

        let started_at = Utc::now();
        let outcome = self.execute_attempt(worker.as_ref(), &task, started_at).await;

        if let Err(e) = worker.finally_execute(&task, outcome.error()).await {
            warn!(worker = worker.name(), error = %e, "Compensation step failed");
        }

        self.record_outcome(task, outcome, started_at).await
    }

    async fn execute_attempt(
        &self,
        worker: &dyn Worker,
        task: &Task,
        started_at: DateTime<Utc>,
    ) -> Outcome {
        let transaction = match self.storage.begin().await {
            Ok(transaction) => transaction,
            Err(e) => return Outcome::Failed(e.into()),
        };

        let mut ctx = WorkerContext::new(transaction, self.config.default_retry_delay(), started_at);
        let result = worker.execute(task, &mut ctx).await;
        let (transaction, follow_ups) = ctx.into_parts();

        match result {
            Ok(()) => match transaction.commit().await {
                Ok(()) => Outcome::Completed { follow_ups },
                Err(e) => Outcome::Failed(e.into()),
            },
            Err(interrupt) => {
                if let Err(e) = transaction.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                match interrupt {
                    Interrupt::Retry(delay) => Outcome::RetryAfter(delay),
                    Interrupt::Failed(error) => Outcome::Failed(error),
                }
            }
        }
    }

    async fn record_outcome(
        &self,
        mut task: Task,
        outcome: Outcome,
        started_at: DateTime<Utc>,
    ) -> Result<DispatchResult> {
        let task_id = task.id().to_string();
        let task_type = task.task_type().as_str();

        match outcome {
            Outcome::Completed { follow_ups } => {
                let count = follow_ups.len();
                if !self
                    .queue
                    .complete(task.id(), &self.instance_id, &follow_ups)
                    .await?
                {
                    return Ok(DispatchResult::ClaimLost);
                }
                log_task_operation("dispatch", &task_id, task_type, "completed", None);
                Ok(DispatchResult::Completed { follow_ups: count })
            }
            Outcome::RetryAfter(delay) => {
                task.set_schedule(task.schedule().next_attempt(started_at, delay));
                let next_eligible_at = task.schedule().next_eligible_at;
                if !self.queue.reschedule(&task, &self.instance_id).await? {
                    return Ok(DispatchResult::ClaimLost);
                }
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    next_eligible_at = %next_eligible_at,
                    "Attempt requested retry"
                );
                Ok(DispatchResult::Retried { next_eligible_at })
            }
            Outcome::Failed(error) if error.category() == ErrorCategory::Permanent => {
                let reason = error.to_string();
                if !self
                    .queue
                    .dead_letter(task.id(), &self.instance_id, &reason)
                    .await?
                {
                    return Ok(DispatchResult::ClaimLost);
                }
                error!(error = %error, "💥 Attempt failed permanently, dead-lettering task");
                log_task_operation("dispatch", &task_id, task_type, "dead_lettered", Some(&reason));
                Ok(DispatchResult::DeadLettered)
            }
            Outcome::Failed(error) => {
                // Retries are not failures; only earlier failures grow the backoff
                let delay = self
                    .backoff
                    .delay_for_attempt(task.schedule().failures + 1);
                task.set_schedule(task.schedule().next_after_failure(started_at, delay));
                let next_eligible_at = task.schedule().next_eligible_at;
                if !self.queue.reschedule(&task, &self.instance_id).await? {
                    return Ok(DispatchResult::ClaimLost);
                }
                warn!(
                    error = %error,
                    category = %error.category(),
                    failures = task.schedule().failures,
                    next_eligible_at = %next_eligible_at,
                    "Attempt failed, rescheduled with backoff"
                );
                log_task_operation(
                    "dispatch",
                    &task_id,
                    task_type,
                    "failed",
                    Some(&error.to_string()),
                );
                Ok(DispatchResult::Failed { next_eligible_at })
            }
        }
    }

    /// Poll until `shutdown` flips to `true`
    ///
    /// Sleeps for the poll interval only when a poll claimed nothing, so a backlog
    /// drains without waiting between batches.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            instance_id = %self.instance_id,
            handled_types = ?self.workers.handled_types(),
            "🔄 Dispatch loop started"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_due_tasks().await {
                Ok(summary) => summary.claimed == 0,
                Err(e) => {
                    error!(error = %e, "Polling for due tasks failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(instance_id = %self.instance_id, "🛑 Dispatch loop stopped");
        Ok(())
    }
}
