//! Supervisor actor that keeps the worker pool at full strength.

use std::time::Duration;

use chrono::Utc;
use queue_core::JobEvent;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::{ActorError, SupervisorMessage};
use crate::pool::{TaskSpawner, WorkerPool};

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Number of workers to keep alive.
    pub workers: usize,
    /// How often to check worker liveness.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl SupervisorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub config: SupervisorConfig,
    pub spawner: Box<dyn TaskSpawner>,
    pub event_tx: Option<broadcast::Sender<JobEvent>>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    pool: WorkerPool,
    event_tx: Option<broadcast::Sender<JobEvent>>,
    shutting_down: bool,
}

impl SupervisorState {
    fn emit(&self, event: JobEvent) {
        tracing::info!(
            worker_id = event.worker_id().map(tracing::field::display),
            "{}",
            event.description()
        );
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn check_workers(&mut self) {
        for restart in self.pool.reap() {
            self.emit(JobEvent::WorkerExited {
                worker_id: restart.exited.clone(),
                exit_code: restart.exit_code,
                timestamp: Utc::now(),
            });
            match restart.replacement {
                Some(replacement) => self.emit(JobEvent::WorkerRestarted {
                    exited: restart.exited,
                    replacement,
                    timestamp: Utc::now(),
                }),
                None => tracing::warn!(
                    worker_id = %restart.exited,
                    "No replacement launched; retrying on next check"
                ),
            }
        }
    }
}

/// Supervisor actor that restarts exited workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(workers = args.config.workers, "Starting worker supervisor");

        let mut state = SupervisorState {
            pool: WorkerPool::new(args.spawner, args.config.workers),
            event_tx: args.event_tx,
            shutting_down: false,
        };
        let workers = state.pool.fill();
        state.emit(JobEvent::SupervisorStarted {
            workers,
            timestamp: Utc::now(),
        });

        // Start periodic tick
        let myself_clone = myself.clone();
        let poll_interval = args.config.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Tick => {
                if !state.shutting_down {
                    state.check_workers();
                }
            }

            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.pool.ids());
            }

            SupervisorMessage::Shutdown => {
                if state.shutting_down {
                    return Ok(());
                }
                state.shutting_down = true;
                state.emit(JobEvent::SupervisorShuttingDown {
                    workers: state.pool.len(),
                    timestamp: Utc::now(),
                });

                for (worker_id, exit_code) in state.pool.shutdown().await {
                    tracing::info!(worker_id = %worker_id, ?exit_code, "Worker terminated");
                }

                state.emit(JobEvent::SupervisorStopped {
                    timestamp: Utc::now(),
                });
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start the supervisor and launch its workers.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ActorError> {
    let (actor, handle) = Actor::spawn(None, Supervisor, args).await?;
    Ok((actor, handle))
}

/// Ask the supervisor which workers it is tracking.
pub async fn list_workers(
    supervisor: &ActorRef<SupervisorMessage>,
    timeout: Duration,
) -> Result<Vec<String>, ActorError> {
    let result = ractor::rpc::call(
        supervisor,
        |reply| SupervisorMessage::ListWorkers { reply },
        Some(timeout),
    )
    .await
    .map_err(|e| ActorError::Call(e.to_string()))?;

    match result {
        ractor::rpc::CallResult::Success(workers) => Ok(workers),
        ractor::rpc::CallResult::Timeout => Err(ActorError::Call("timed out".into())),
        ractor::rpc::CallResult::SenderError => Err(ActorError::Call("reply dropped".into())),
    }
}
