//! Message types for actor communication.

use queue_core::JobId;
use ractor::RpcReplyPort;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim and process one job.
    Poll,

    /// Get the worker's counters.
    GetStats { reply: RpcReplyPort<WorkerStats> },

    /// Stop after the job in hand, if any.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Periodic liveness check of the pool.
    Tick,

    /// List the ids of the workers currently tracked.
    ListWorkers { reply: RpcReplyPort<Vec<String>> },

    /// Terminate every worker, wait for them, then stop.
    Shutdown,
}

/// Counters kept by a single worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_id: String,
    /// Jobs this worker moved to `in_progress`.
    pub claimed: u64,
    /// Jobs this worker saw reach `done`.
    pub completed: u64,
    /// Claim attempts that failed in the store.
    pub claim_errors: u64,
    /// Completions that failed; those jobs stay `in_progress`.
    pub completion_errors: u64,
    /// Job currently in hand.
    pub current_job: Option<JobId>,
}

/// Errors from supervised tasks.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to launch worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker process has no pid")]
    NoPid,

    #[error("failed to signal worker {pid}: {errno}")]
    Signal { pid: u32, errno: nix::errno::Errno },
}

/// Errors starting actors.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("actor failed to start: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("actor did not answer: {0}")]
    Call(String),
}
