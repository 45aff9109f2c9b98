//! Worker whose attempts follow a script, for exercising the dispatcher.

use async_trait::async_trait;
use fleet_core::error::{FleetError, Result};
use fleet_core::execution::{ExecuteResult, Task, TaskType, Worker, WorkerContext};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Complete,
    CompleteWith(Vec<Task>),
    Retry,
    RetryAfter(Duration),
    /// Request follow-ups, then fail
    DelayThenFail(Vec<Task>),
    /// Fail with an error a later attempt may not see
    Fail(String),
    /// Fail with an error no later attempt can fix
    Reject(String),
}

pub struct ScriptedWorker {
    task_type: TaskType,
    script: Mutex<VecDeque<Step>>,
    executions: AtomicUsize,
    finally_errors: Mutex<Vec<Option<String>>>,
    fail_finally: bool,
}

impl ScriptedWorker {
    /// Completes every attempt once the script runs out
    pub fn new(task_type: TaskType, script: Vec<Step>) -> Self {
        Self {
            task_type,
            script: Mutex::new(script.into()),
            executions: AtomicUsize::new(0),
            finally_errors: Mutex::new(Vec::new()),
            fail_finally: false,
        }
    }

    pub fn with_failing_finally(mut self) -> Self {
        self.fail_finally = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Error message seen by each `finally_execute` call, in order
    pub fn finally_errors(&self) -> Vec<Option<String>> {
        self.finally_errors.lock().clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &'static str {
        "scripted_worker"
    }

    fn supports(&self, task_type: TaskType) -> bool {
        task_type == self.task_type
    }

    async fn execute(&self, _task: &Task, ctx: &mut WorkerContext) -> ExecuteResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Complete);

        match step {
            Step::Complete => Ok(()),
            Step::CompleteWith(follow_ups) => {
                for task in follow_ups {
                    ctx.delay(task);
                }
                Ok(())
            }
            Step::Retry => Err(ctx.retry()),
            Step::RetryAfter(delay) => Err(ctx.retry_after(delay)),
            Step::DelayThenFail(follow_ups) => {
                for task in follow_ups {
                    ctx.delay(task);
                }
                Err(FleetError::External("failed after delay".to_string()).into())
            }
            Step::Fail(message) => Err(FleetError::External(message).into()),
            Step::Reject(message) => Err(FleetError::Validation(message).into()),
        }
    }

    async fn finally_execute(&self, _task: &Task, error: Option<&FleetError>) -> Result<()> {
        self.finally_errors
            .lock()
            .push(error.map(ToString::to_string));
        if self.fail_finally {
            return Err(FleetError::External("compensation unavailable".to_string()));
        }
        Ok(())
    }
}
