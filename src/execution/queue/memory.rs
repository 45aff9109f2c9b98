//! In-process [`TaskQueue`] for embedding and tests.

use super::{DeadLetter, TaskQueue};
use crate::error::Result;
use crate::execution::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Claim {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    claim: Option<Claim>,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<Uuid, Entry>,
    dead: Vec<DeadLetter>,
}

/// Cloneable handle; clones share the same queue
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
    claim_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(claim_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            claim_timeout,
        }
    }

    fn owns(entry: &Entry, owner: &str) -> bool {
        entry
            .claim
            .as_ref()
            .is_some_and(|claim| claim.owner == owner)
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.entry(task.id()).or_insert_with(|| Entry {
            task: task.clone(),
            claim: None,
        });
        Ok(())
    }

    async fn claim_due(&self, owner: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let expires_at = now
            + chrono::Duration::from_std(self.claim_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut state = self.state.lock();

        let mut due: Vec<&mut Entry> = state
            .pending
            .values_mut()
            .filter(|entry| entry.task.schedule().is_due(now))
            .filter(|entry| {
                entry
                    .claim
                    .as_ref()
                    .map_or(true, |claim| claim.expires_at <= now)
            })
            .collect();
        due.sort_by_key(|entry| entry.task.schedule().next_eligible_at);

        let claimed: Vec<Task> = due
            .into_iter()
            .take(limit)
            .map(|entry| {
                entry.claim = Some(Claim {
                    owner: owner.to_string(),
                    expires_at,
                });
                entry.task.clone()
            })
            .collect();

        if !claimed.is_empty() {
            debug!(owner = owner, claimed = claimed.len(), "Claimed due tasks");
        }
        Ok(claimed)
    }

    async fn reschedule(&self, task: &Task, owner: &str) -> Result<bool> {
        let mut state = self.state.lock();
        match state.pending.get_mut(&task.id()) {
            Some(entry) if Self::owns(entry, owner) => {
                entry.task = task.clone();
                entry.claim = None;
                Ok(true)
            }
            _ => {
                warn!(task_id = %task.id(), owner = owner, "Reschedule skipped: claim not owned");
                Ok(false)
            }
        }
    }

    async fn complete(&self, task_id: Uuid, owner: &str, follow_ups: &[Task]) -> Result<bool> {
        let mut state = self.state.lock();
        let owned = state
            .pending
            .get(&task_id)
            .is_some_and(|entry| Self::owns(entry, owner));
        if !owned {
            warn!(task_id = %task_id, owner = owner, "Completion skipped: claim not owned");
            return Ok(false);
        }

        state.pending.remove(&task_id);
        for follow_up in follow_ups {
            let duplicate = state
                .pending
                .values()
                .any(|entry| entry.task.kind() == follow_up.kind());
            if duplicate {
                debug!(task_id = %follow_up.id(), "Follow-up already pending, skipped");
                continue;
            }
            state.pending.entry(follow_up.id()).or_insert_with(|| Entry {
                task: follow_up.clone(),
                claim: None,
            });
        }
        Ok(true)
    }

    async fn dead_letter(&self, task_id: Uuid, owner: &str, reason: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let owned = state
            .pending
            .get(&task_id)
            .is_some_and(|entry| Self::owns(entry, owner));
        if !owned {
            return Ok(false);
        }

        if let Some(entry) = state.pending.remove(&task_id) {
            state.dead.push(DeadLetter {
                task: entry.task,
                reason: reason.to_string(),
                dead_lettered_at: Utc::now(),
            });
        }
        Ok(true)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        let state = self.state.lock();
        Ok(state.pending.get(&task_id).map(|entry| entry.task.clone()))
    }

    async fn pending(&self) -> Result<Vec<Task>> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .pending
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by_key(|task| task.schedule().next_eligible_at);
        Ok(tasks)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().dead.clone())
    }
}
