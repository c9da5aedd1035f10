//! Producer that appends pending jobs.

use chrono::Utc;
use queue_core::{JobEvent, JobId, JobStore};
use tokio::sync::broadcast;

/// What a producer run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceReport {
    /// Ids of the appended jobs, in order.
    pub created: Vec<JobId>,
    /// Appends that failed.
    pub failed: usize,
}

/// Append `count` pending jobs.
///
/// A failed append is logged and skipped; the remaining iterations still
/// run.
pub async fn produce(
    store: &dyn JobStore,
    count: usize,
    event_tx: Option<&broadcast::Sender<JobEvent>>,
) -> ProduceReport {
    let mut report = ProduceReport::default();

    for _ in 0..count {
        match store.append_job().await {
            Ok(job) => {
                let event = JobEvent::JobCreated {
                    job_id: job.id,
                    timestamp: Utc::now(),
                };
                tracing::info!(job_id = %job.id, "{}", event.description());
                if let Some(tx) = event_tx {
                    let _ = tx.send(event);
                }
                report.created.push(job.id);
            }
            Err(e) => {
                tracing::warn!("Failed to append job: {}", e);
                report.failed += 1;
            }
        }
    }

    report
}
