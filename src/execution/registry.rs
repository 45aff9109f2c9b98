//! # Worker Registry
//!
//! Maps every task type to exactly one worker. The mapping is validated once,
//! when the registry is built, so dispatch never has to choose between workers.

use super::task::TaskType;
use super::worker::Worker;
use crate::error::{FleetError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
pub struct WorkerRegistryBuilder {
    workers: Vec<Arc<dyn Worker>>,
}

impl WorkerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self, worker: impl Worker + 'static) -> Self {
        self.register_arc(Arc::new(worker))
    }

    pub fn register_arc(mut self, worker: Arc<dyn Worker>) -> Self {
        debug!(worker = worker.name(), "Registering worker");
        self.workers.push(worker);
        self
    }

    /// Build a registry that handles every task type exactly once
    pub fn build(self) -> Result<WorkerRegistry> {
        self.resolve(true)
    }

    /// Build a registry for a process that intentionally handles a subset of task types
    ///
    /// Ambiguity is still rejected. Tasks of an unhandled type are dead-lettered by
    /// the dispatcher.
    pub fn build_partial(self) -> Result<WorkerRegistry> {
        self.resolve(false)
    }

    fn resolve(self, require_total: bool) -> Result<WorkerRegistry> {
        let mut by_type = HashMap::new();

        for task_type in TaskType::ALL {
            let supporting: Vec<usize> = self
                .workers
                .iter()
                .enumerate()
                .filter(|(_, worker)| worker.supports(task_type))
                .map(|(index, _)| index)
                .collect();

            match supporting.as_slice() {
                [] if require_total => {
                    return Err(FleetError::Configuration(format!(
                        "No worker supports task type {task_type}"
                    )));
                }
                [] => {}
                [index] => {
                    by_type.insert(task_type, *index);
                }
                many => {
                    let names: Vec<&str> = many.iter().map(|i| self.workers[*i].name()).collect();
                    return Err(FleetError::Configuration(format!(
                        "Task type {task_type} is supported by more than one worker: {}",
                        names.join(", ")
                    )));
                }
            }
        }

        info!(
            workers = self.workers.len(),
            handled_types = by_type.len(),
            "✅ Worker registry validated"
        );

        Ok(WorkerRegistry {
            workers: self.workers,
            by_type,
        })
    }
}

pub struct WorkerRegistry {
    workers: Vec<Arc<dyn Worker>>,
    by_type: HashMap<TaskType, usize>,
}

impl WorkerRegistry {
    pub fn builder() -> WorkerRegistryBuilder {
        WorkerRegistryBuilder::new()
    }

    /// The single worker handling `task_type`, if this process handles it at all
    pub fn worker_for(&self, task_type: TaskType) -> Option<&Arc<dyn Worker>> {
        self.by_type.get(&task_type).map(|index| &self.workers[*index])
    }

    pub fn handled_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.by_type.contains_key(t))
            .collect()
    }
}
