//! The job store contract shared by every backend.

use std::future::Future;
use std::pin::Pin;

use crate::{Job, JobId, JobStatus, StatusCounts};

/// Future type returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors surfaced by a job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("transaction conflict: {0}")]
    Conflict(String),
}

/// Outcome of marking a job done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job moved from `in_progress` to `done`.
    Marked,
    /// The job was already `done`; nothing changed.
    AlreadyDone,
    /// No job with this id exists.
    Missing,
}

/// Shared persistent storage for jobs.
///
/// Workers, the producer and the status command only ever talk to the store
/// through these coarse operations. `claim_next_pending` is the single
/// atomic read-modify-write: two concurrent callers never receive the same
/// job.
pub trait JobStore: Send + Sync + 'static {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Append a new `pending` job with a fresh id and the current time.
    fn append_job(&self) -> StoreFuture<'_, Job>;

    /// Atomically move one `pending` job to `in_progress` and return it.
    fn claim_next_pending(&self) -> StoreFuture<'_, Option<Job>>;

    /// Move a claimed job to `done`.
    ///
    /// Already-done jobs report [`Completion::AlreadyDone`]; unknown ids
    /// report [`Completion::Missing`]. A `pending` job is rejected with
    /// [`StoreError::InvalidTransition`].
    fn mark_done(&self, id: JobId) -> StoreFuture<'_, Completion>;

    /// Look up a single job.
    fn get(&self, id: JobId) -> StoreFuture<'_, Option<Job>>;

    /// All jobs in creation order.
    fn list(&self) -> StoreFuture<'_, Vec<Job>>;

    /// Number of jobs per status.
    fn counts(&self) -> StoreFuture<'_, StatusCounts> {
        Box::pin(async move {
            let jobs = self.list().await?;
            Ok(StatusCounts::from_jobs(&jobs))
        })
    }
}
