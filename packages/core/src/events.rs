//! Event types for job and worker lifecycle updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Events emitted by the producer, workers and the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A new job was appended.
    JobCreated {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobClaimed {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker marked a job done.
    JobCompleted {
        job_id: JobId,
        worker_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Marking a job done failed; the job stays in progress.
    CompletionFailed {
        job_id: JobId,
        worker_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A claim attempt failed; treated as nothing to claim.
    ClaimFailed {
        worker_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker started polling.
    WorkerStarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker stopped.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A supervised worker exited.
    WorkerExited {
        worker_id: String,
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    /// A supervised worker was replaced.
    WorkerRestarted {
        exited: String,
        replacement: String,
        timestamp: DateTime<Utc>,
    },

    // Supervisor events
    /// The supervisor launched its pool.
    SupervisorStarted {
        workers: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// The supervisor began shutting down its pool.
    SupervisorShuttingDown {
        workers: usize,
        timestamp: DateTime<Utc>,
    },
    /// The supervisor finished shutting down.
    SupervisorStopped { timestamp: DateTime<Utc> },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobCreated { timestamp, .. } => *timestamp,
            JobEvent::JobClaimed { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::CompletionFailed { timestamp, .. } => *timestamp,
            JobEvent::ClaimFailed { timestamp, .. } => *timestamp,
            JobEvent::WorkerStarted { timestamp, .. } => *timestamp,
            JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
            JobEvent::WorkerExited { timestamp, .. } => *timestamp,
            JobEvent::WorkerRestarted { timestamp, .. } => *timestamp,
            JobEvent::SupervisorStarted { timestamp, .. } => *timestamp,
            JobEvent::SupervisorShuttingDown { timestamp, .. } => *timestamp,
            JobEvent::SupervisorStopped { timestamp } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobCreated { job_id, .. } => Some(*job_id),
            JobEvent::JobClaimed { job_id, .. } => Some(*job_id),
            JobEvent::JobCompleted { job_id, .. } => Some(*job_id),
            JobEvent::CompletionFailed { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get the worker ID associated with this event, if any.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobClaimed { worker_id, .. }
            | JobEvent::JobCompleted { worker_id, .. }
            | JobEvent::CompletionFailed { worker_id, .. }
            | JobEvent::ClaimFailed { worker_id, .. }
            | JobEvent::WorkerStarted { worker_id, .. }
            | JobEvent::WorkerStopped { worker_id, .. }
            | JobEvent::WorkerExited { worker_id, .. } => Some(worker_id),
            JobEvent::WorkerRestarted { replacement, .. } => Some(replacement),
            _ => None,
        }
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobEvent::CompletionFailed { .. } | JobEvent::ClaimFailed { .. }
        )
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobCreated { job_id, .. } => format!("Added job {}", job_id),
            JobEvent::JobClaimed {
                job_id, worker_id, ..
            } => format!("Worker {} picked up job {}", worker_id, job_id),
            JobEvent::JobCompleted {
                job_id,
                worker_id,
                duration_ms,
                ..
            } => format!(
                "Worker {} finished job {} in {}ms",
                worker_id, job_id, duration_ms
            ),
            JobEvent::CompletionFailed {
                job_id,
                worker_id,
                error,
                ..
            } => format!(
                "Worker {} could not mark job {} done (left in progress): {}",
                worker_id, job_id, error
            ),
            JobEvent::ClaimFailed {
                worker_id, error, ..
            } => format!("Worker {} claim attempt failed: {}", worker_id, error),
            JobEvent::WorkerStarted { worker_id, .. } => format!("Worker {} started", worker_id),
            JobEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
            JobEvent::WorkerExited {
                worker_id,
                exit_code,
                ..
            } => match exit_code {
                Some(code) => format!("Worker {} exited with code {}", worker_id, code),
                None => format!("Worker {} exited by signal", worker_id),
            },
            JobEvent::WorkerRestarted {
                exited,
                replacement,
                ..
            } => format!("Worker {} replaced by {}", exited, replacement),
            JobEvent::SupervisorStarted { workers, .. } => {
                format!(
                    "Supervisor started {} workers: {}",
                    workers.len(),
                    workers.join(", ")
                )
            }
            JobEvent::SupervisorShuttingDown { workers, .. } => {
                format!("Supervisor stopping {} workers", workers)
            }
            JobEvent::SupervisorStopped { .. } => "Supervisor stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_tag() {
        let job_id = JobId::new();
        let event = JobEvent::JobClaimed {
            job_id,
            worker_id: "worker-7".into(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job_claimed");
        assert_eq!(json["job_id"], job_id.to_string());

        let back: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn accessors_follow_the_variant() {
        let job_id = JobId::new();
        let failed = JobEvent::CompletionFailed {
            job_id,
            worker_id: "worker-1".into(),
            error: "disk full".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(failed.job_id(), Some(job_id));
        assert_eq!(failed.worker_id(), Some("worker-1"));
        assert!(failed.is_failure());
        assert!(failed.description().contains("left in progress"));

        let restarted = JobEvent::WorkerRestarted {
            exited: "41".into(),
            replacement: "42".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(restarted.job_id(), None);
        assert_eq!(restarted.worker_id(), Some("42"));
        assert_eq!(restarted.description(), "Worker 41 replaced by 42");
    }
}
