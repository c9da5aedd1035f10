//! Worker actor that claims and completes jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use queue_core::{Completion, JobEvent, JobStore};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::{ActorError, WorkerMessage, WorkerStats};

/// Timing for a worker's loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait before polling again after finding nothing to claim.
    pub backoff: Duration,
    /// Simulated processing time per job.
    pub work_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            work_duration: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Set the idle backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the simulated work time.
    pub fn with_work_duration(mut self, work_duration: Duration) -> Self {
        self.work_duration = work_duration;
        self
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub store: Arc<dyn JobStore>,
    pub config: WorkerConfig,
    pub event_tx: Option<broadcast::Sender<JobEvent>>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    event_tx: Option<broadcast::Sender<JobEvent>>,
    stats: WorkerStats,
    stopping: bool,
}

impl WorkerActorState {
    fn new(args: WorkerArgs) -> Self {
        Self {
            store: args.store,
            config: args.config,
            event_tx: args.event_tx,
            stats: WorkerStats {
                worker_id: args.worker_id,
                ..Default::default()
            },
            stopping: false,
        }
    }

    fn worker_id(&self) -> String {
        self.stats.worker_id.clone()
    }

    fn emit(&self, event: JobEvent) {
        let job_id = event.job_id().map(tracing::field::display);
        if event.is_failure() {
            tracing::warn!(worker_id = %self.stats.worker_id, job_id, "{}", event.description());
        } else {
            tracing::info!(worker_id = %self.stats.worker_id, job_id, "{}", event.description());
        }
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Claim, work and complete at most one job.
    ///
    /// Returns whether a job was claimed, so the caller knows to poll again
    /// immediately rather than back off.
    async fn poll_once(&mut self) -> bool {
        let job = match self.store.claim_next_pending().await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                self.stats.claim_errors += 1;
                self.emit(JobEvent::ClaimFailed {
                    worker_id: self.worker_id(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return false;
            }
        };

        self.stats.claimed += 1;
        self.stats.current_job = Some(job.id);
        self.emit(JobEvent::JobClaimed {
            job_id: job.id,
            worker_id: self.worker_id(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        if !self.config.work_duration.is_zero() {
            tokio::time::sleep(self.config.work_duration).await;
        }

        match self.store.mark_done(job.id).await {
            Ok(Completion::Marked) | Ok(Completion::AlreadyDone) => {
                self.stats.completed += 1;
                self.emit(JobEvent::JobCompleted {
                    job_id: job.id,
                    worker_id: self.worker_id(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
            }
            Ok(Completion::Missing) => {
                tracing::warn!(
                    worker_id = %self.stats.worker_id,
                    job_id = %job.id,
                    "claimed job disappeared before completion"
                );
            }
            Err(e) => {
                self.stats.completion_errors += 1;
                self.emit(JobEvent::CompletionFailed {
                    job_id: job.id,
                    worker_id: self.worker_id(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        self.stats.current_job = None;
        true
    }
}

/// Worker actor driven by `Poll` messages.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            worker_id = %args.worker_id,
            backend = args.store.backend(),
            "Starting worker"
        );
        Ok(WorkerActorState::new(args))
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.emit(JobEvent::WorkerStarted {
            worker_id: state.worker_id(),
            timestamp: Utc::now(),
        });
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.emit(JobEvent::WorkerStopped {
            worker_id: state.worker_id(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.stopping {
                    return Ok(());
                }

                if state.poll_once().await {
                    myself.send_message(WorkerMessage::Poll)?;
                } else {
                    // Nothing claimed: try again after the backoff
                    let backoff = state.config.backoff;
                    let myself_clone = myself.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        let _ = myself_clone.send_message(WorkerMessage::Poll);
                    });
                }
            }

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats.clone());
            }

            WorkerMessage::Shutdown => {
                tracing::info!(worker_id = %state.stats.worker_id, "Shutting down worker");
                state.stopping = true;
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start a worker actor.
pub async fn start_worker(
    args: WorkerArgs,
) -> Result<(ActorRef<WorkerMessage>, tokio::task::JoinHandle<()>), ActorError> {
    let (actor, handle) = Actor::spawn(None, WorkerActor, args).await?;
    Ok((actor, handle))
}

/// Ask a worker for its counters.
pub async fn worker_stats(
    worker: &ActorRef<WorkerMessage>,
    timeout: Duration,
) -> Result<WorkerStats, ActorError> {
    let result = ractor::rpc::call(
        worker,
        |reply| WorkerMessage::GetStats { reply },
        Some(timeout),
    )
    .await
    .map_err(|e| ActorError::Call(e.to_string()))?;

    match result {
        ractor::rpc::CallResult::Success(stats) => Ok(stats),
        ractor::rpc::CallResult::Timeout => Err(ActorError::Call("timed out".into())),
        ractor::rpc::CallResult::SenderError => Err(ActorError::Call("reply dropped".into())),
    }
}
