//! fOS Tasks
//!
//! Heterogeneous-thread task scheduler for the fOS engine.
//!
//! Subsystems submit units of work ([`Task`]) that are pinned to a class of
//! execution context ([`ThreadType`]): the main thread, generic workers, the
//! render thread, or specialized I/O-style threads. Tasks can block on each
//! other through dependencies, be chained so that submitting one end submits
//! its neighbors, and be waited on from any thread.
//!
//! # Threading model
//! - One queue per thread type, each with its own lock
//! - One render worker, `N` generic workers, `S` specialized workers
//! - Main-thread tasks are drained explicitly by the driver loop
//! - Completion signaling recycled through a fixed-size sync-block pool
//!
//! # Example
//! ```rust,no_run
//! use fos_tasks::{SchedulerConfig, TaskSystem, ThreadType};
//!
//! let system = TaskSystem::new(SchedulerConfig::default())?;
//! let scheduler = system.scheduler();
//!
//! let load = scheduler.create_task_with_result("load", ThreadType::Worker, || 21);
//! let double = load.then("double", ThreadType::Worker, |value| value * 2);
//! scheduler.submit(&load);
//!
//! assert_eq!(double.result(), Some(42));
//! # Ok::<(), fos_tasks::SchedulerError>(())
//! ```

mod affinity;
mod config;
mod scheduler;
mod sync_block;
mod task;
mod worker;

pub use affinity::{AffinityMap, ThreadType};
pub use config::SchedulerConfig;
pub use scheduler::{Scheduler, TaskSystem};
pub use sync_block::{SyncBlockHandle, SyncBlockPool};
pub use task::{Task, TaskFn, TaskHandle, TaskId, TaskState, TypedTask};

use std::thread::ThreadId;

/// Scheduler error types
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Sync block pool exhausted ({capacity} blocks), increase `sync_block_capacity`")]
    PoolExhausted { capacity: usize },

    #[error("Task '{name}' was already submitted (state: {state:?})")]
    AlreadySubmitted { name: String, state: TaskState },

    #[error("Task '{name}' was completed twice")]
    AlreadyCompleted { name: String },

    #[error("Task '{name}' already has a chain predecessor")]
    ChainPrevOccupied { name: String },

    #[error("Blocker count underflow releasing dependents of task '{name}'")]
    BlockerUnderflow { name: String },

    #[error("Task '{name}' cannot depend on itself")]
    SelfDependency { name: String },

    #[error("No worker or main thread with id {0:?}")]
    UnknownThread(ThreadId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Report a programming error and abort the current thread.
///
/// Fatal conditions indicate a logic bug in the caller, never bad input.
#[cold]
#[track_caller]
pub(crate) fn fatal(error: SchedulerError) -> ! {
    tracing::error!("{error}");
    panic!("{error}");
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
