//! # Task Model
//!
//! A task is an immutable-identity, mutable-schedule unit of deferred work.
//!
//! The set of task kinds is closed: every kind is a [`TaskKind`] variant carrying
//! its own payload, and [`TaskType`] names the kinds so the worker registry can be
//! checked for totality at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use uuid::Uuid;

/// Discriminator of a task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ScheduleRegistry,
    ProvisionRegistryTenant,
}

impl TaskType {
    /// Every task type known to the engine
    pub const ALL: [TaskType; 2] = [TaskType::ScheduleRegistry, TaskType::ProvisionRegistryTenant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScheduleRegistry => "schedule_registry",
            Self::ProvisionRegistryTenant => "provision_registry_tenant",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid task type: {s}"))
    }
}

/// Task kind plus its payload; serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Place a requested registry onto an eligible deployment
    ScheduleRegistry { registry_id: Uuid },
    /// Create the tenant of a scheduled registry on its deployment
    ProvisionRegistryTenant { registry_id: Uuid },
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::ScheduleRegistry { .. } => TaskType::ScheduleRegistry,
            Self::ProvisionRegistryTenant { .. } => TaskType::ProvisionRegistryTenant,
        }
    }
}

/// When a task may run next, and how often it already ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    /// The task must not be dispatched before this instant
    pub next_eligible_at: DateTime<Utc>,
    /// Attempts already made
    pub attempts: u32,
    /// Attempts among `attempts` that ended in an error; drives failure backoff
    #[serde(default)]
    pub failures: u32,
    pub first_attempted_at: Option<DateTime<Utc>>,
}

impl TaskSchedule {
    /// Eligible right away, never attempted
    pub fn immediately() -> Self {
        Self {
            next_eligible_at: Utc::now(),
            attempts: 0,
            failures: 0,
            first_attempted_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }

    /// Attempts that asked to be retried rather than failing
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(self.failures)
    }

    /// Schedule after an attempt that started at `started_at` and asked to wait `delay`
    ///
    /// A retry is not a failure: `failures` is carried over unchanged.
    pub fn next_attempt(&self, started_at: DateTime<Utc>, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        Self {
            next_eligible_at: started_at
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            attempts: self.attempts.saturating_add(1),
            failures: self.failures,
            first_attempted_at: self.first_attempted_at.or(Some(started_at)),
        }
    }

    /// Schedule after an attempt that failed, waiting the backoff `delay`
    pub fn next_after_failure(&self, started_at: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            failures: self.failures.saturating_add(1),
            ..self.next_attempt(started_at, delay)
        }
    }
}

impl Default for TaskSchedule {
    fn default() -> Self {
        Self::immediately()
    }
}

/// A persisted unit of deferred work
///
/// Equality and hashing use the id only: two values with the same id are the same
/// task at different points of its schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: Uuid,
    kind: TaskKind,
    schedule: TaskSchedule,
}

impl Task {
    fn new(kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            schedule: TaskSchedule::immediately(),
        }
    }

    pub fn schedule_registry(registry_id: Uuid) -> Self {
        Self::new(TaskKind::ScheduleRegistry { registry_id })
    }

    pub fn provision_registry_tenant(registry_id: Uuid) -> Self {
        Self::new(TaskKind::ProvisionRegistryTenant { registry_id })
    }

    /// Rehydrate a task read back from a queue backend
    pub fn restore(id: Uuid, kind: TaskKind, schedule: TaskSchedule) -> Self {
        Self { id, kind, schedule }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn task_type(&self) -> TaskType {
        self.kind.task_type()
    }

    pub fn schedule(&self) -> &TaskSchedule {
        &self.schedule
    }

    pub(crate) fn set_schedule(&mut self, schedule: TaskSchedule) {
        self.schedule = schedule;
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
