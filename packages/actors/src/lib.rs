//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based workers and supervisor, plus the
//! producer.
//!
//! # Architecture
//!
//! - `WorkerActor` - Claims jobs from a shared store and completes them
//! - `Supervisor` - Keeps a `WorkerPool` of worker processes alive
//! - `produce` - Appends pending jobs
//!
//! # Usage
//!
//! ```ignore
//! use actors::{ProcessSpawner, SupervisorArgs, SupervisorConfig, start_supervisor};
//!
//! let spawner = ProcessSpawner::current_exe(["work"])?;
//! let (supervisor, handle) = start_supervisor(SupervisorArgs {
//!     config: SupervisorConfig::default(),
//!     spawner: Box::new(spawner),
//!     event_tx: None,
//! })
//! .await?;
//! ```

mod messages;
mod pool;
mod process;
mod producer;
mod supervisor;
mod worker_actor;

pub use messages::{ActorError, SupervisorMessage, TaskError, WorkerMessage, WorkerStats};
pub use pool::{Liveness, Restart, TaskFuture, TaskHandle, TaskSpawner, WorkerPool};
pub use process::{ProcessHandle, ProcessSpawner};
pub use producer::{ProduceReport, produce};
pub use supervisor::{
    Supervisor, SupervisorArgs, SupervisorConfig, list_workers, start_supervisor,
};
pub use worker_actor::{
    WorkerActor, WorkerArgs, WorkerConfig, start_worker, worker_stats,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
