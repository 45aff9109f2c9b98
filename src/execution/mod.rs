//! # Task Execution Engine
//!
//! Asynchronous task execution: the task model, the worker contract, the
//! retry/delay control primitives and the dispatcher that runs due tasks.
//!
//! ## Core Components
//!
//! - **Task / TaskSchedule**: typed unit of work and its next-eligible time
//! - **WorkerContext**: per-attempt handle exposing `retry`, `retry_after` and `delay`
//! - **Worker**: `execute` inside a transaction, `finally_execute` for compensation
//! - **WorkerRegistry**: validated, unambiguous task-type to worker mapping
//! - **TaskQueue**: persistent pending set with lease-based claiming
//! - **TaskManager**: submits tasks and dispatches due ones

pub mod backoff;
pub mod context;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod task;
pub mod worker;

pub use backoff::BackoffCalculator;
pub use context::{ExecuteResult, Interrupt, Outcome, WorkerContext};
pub use manager::{DispatchResult, DispatchSummary, TaskManager};
pub use queue::{DeadLetter, InMemoryTaskQueue, PgTaskQueue, TaskQueue};
pub use registry::{WorkerRegistry, WorkerRegistryBuilder};
pub use task::{Task, TaskKind, TaskSchedule, TaskType};
pub use worker::Worker;
