//! CSV file job store guarded by an advisory lock.
//!
//! Every operation opens the file, takes an exclusive `flock` for the whole
//! read-modify-write cycle and rewrites the full dataset before releasing
//! it, so processes sharing the file never interleave a read with another
//! process's write.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, SubsecRound};
use nix::fcntl::{Flock, FlockArg};
use queue_core::{
    Completion, Job, JobId, JobStatus, JobStore, StatusCounts, StoreError, StoreFuture,
};
use serde::{Deserialize, Serialize};

use crate::DbError;

/// Timestamp layout used in the `created_at` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// CSV store configuration.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Path of the shared jobs file.
    pub path: PathBuf,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jobs.csv"),
        }
    }
}

impl CsvConfig {
    /// Create a config for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// One line of the jobs file: `id,status,created_at`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: String,
    status: JobStatus,
    created_at: String,
}

impl CsvRow {
    fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status,
            created_at: job.created_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.id)
            .map_err(|e| DbError::Corrupt(format!("job id {:?}: {}", self.id, e)))?;
        let created_at = NaiveDateTime::parse_from_str(&self.created_at, TIMESTAMP_FORMAT)
            .map_err(|e| DbError::Corrupt(format!("created_at {:?}: {}", self.created_at, e)))?
            .and_utc();
        Ok(Job {
            id,
            status: self.status,
            created_at,
        })
    }
}

/// Job store over a single CSV file.
#[derive(Debug, Clone)]
pub struct CsvJobStore {
    path: PathBuf,
}

impl CsvJobStore {
    /// Create a store for the configured file. The file is created lazily
    /// by the first append.
    pub fn new(config: &CsvConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }

    /// Path of the jobs file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on the full dataset under the exclusive lock.
    ///
    /// `op` returns its result and whether the dataset changed. Returns
    /// `None` without calling `op` when the file does not exist and
    /// `create` is false.
    async fn with_locked<R, F>(&self, create: bool, op: F) -> Result<Option<R>, DbError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Vec<Job>) -> (R, bool) + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || locked(&path, create, op))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }
}

fn locked<R>(
    path: &Path,
    create: bool,
    op: impl FnOnce(&mut Vec<Job>) -> (R, bool),
) -> Result<Option<R>, DbError> {
    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound && !create => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut file = Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| DbError::Lock(format!("{}: {}", path.display(), errno)))?;

    let mut jobs = read_jobs(&mut file)?;
    let (result, dirty) = op(&mut jobs);
    if dirty {
        write_jobs(&mut file, &jobs)?;
    }

    // Dropping the guard releases the lock.
    Ok(Some(result))
}

fn read_jobs(file: &mut File) -> Result<Vec<Job>, DbError> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = csv::Reader::from_reader(&mut *file);
    reader
        .deserialize::<CsvRow>()
        .map(|row| row?.into_job())
        .collect()
}

fn write_jobs(file: &mut File, jobs: &[Job]) -> Result<(), DbError> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    {
        let mut writer = csv::Writer::from_writer(&mut *file);
        if jobs.is_empty() {
            writer.write_record(["id", "status", "created_at"])?;
        }
        for job in jobs {
            writer.serialize(CsvRow::from_job(job))?;
        }
        writer.flush()?;
    }
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

impl JobStore for CsvJobStore {
    fn backend(&self) -> &'static str {
        "csv"
    }

    fn append_job(&self) -> StoreFuture<'_, Job> {
        Box::pin(async move {
            let job = self
                .with_locked(true, |jobs| {
                    let mut job = Job::new();
                    // The file keeps whole seconds.
                    job.created_at = job.created_at.trunc_subsecs(0);
                    jobs.push(job.clone());
                    (job, true)
                })
                .await?
                .ok_or_else(|| DbError::Query("jobs file vanished during append".into()))?;
            tracing::debug!(job_id = %job.id, "appended job");
            Ok(job)
        })
    }

    fn claim_next_pending(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let claimed = self
                .with_locked(false, |jobs| {
                    let next = jobs
                        .iter_mut()
                        .find(|job| job.status.can_transition_to(JobStatus::InProgress));
                    match next {
                        Some(job) => {
                            job.status = JobStatus::InProgress;
                            (Some(job.clone()), true)
                        }
                        None => (None, false),
                    }
                })
                .await?;
            Ok(claimed.flatten())
        })
    }

    fn mark_done(&self, id: JobId) -> StoreFuture<'_, Completion> {
        Box::pin(async move {
            let outcome = self
                .with_locked(false, move |jobs| {
                    match jobs.iter_mut().find(|job| job.id == id) {
                        None => (Ok(Completion::Missing), false),
                        Some(job) if job.status == JobStatus::Done => {
                            (Ok(Completion::AlreadyDone), false)
                        }
                        Some(job) if job.status.can_transition_to(JobStatus::Done) => {
                            job.status = JobStatus::Done;
                            (Ok(Completion::Marked), true)
                        }
                        Some(job) => (
                            Err(StoreError::InvalidTransition {
                                id,
                                from: job.status,
                                to: JobStatus::Done,
                            }),
                            false,
                        ),
                    }
                })
                .await?
                .unwrap_or(Ok(Completion::Missing))?;

            if outcome == Completion::Missing {
                tracing::warn!(job_id = %id, "job not found while marking done");
            }
            Ok(outcome)
        })
    }

    fn get(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move {
            let found = self
                .with_locked(false, move |jobs| {
                    (jobs.iter().find(|job| job.id == id).cloned(), false)
                })
                .await?;
            Ok(found.flatten())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move {
            let jobs = self
                .with_locked(false, |jobs| (std::mem::take(jobs), false))
                .await?;
            Ok(jobs.unwrap_or_default())
        })
    }

    fn counts(&self) -> StoreFuture<'_, StatusCounts> {
        Box::pin(async move {
            let counts = self
                .with_locked(false, |jobs| (StatusCounts::from_jobs(jobs.iter()), false))
                .await?;
            Ok(counts.unwrap_or_default())
        })
    }
}
