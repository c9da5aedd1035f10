//! SurrealDB-backed job store.
//!
//! A claim walks the oldest pending rows and moves each with a conditional
//! `UPDATE ... WHERE status = "pending"` that stamps a fresh claim token.
//! The row is read back after the update commits and only counts as
//! claimed while it still carries that token. Claims through one store
//! handle and its clones are serialized in-process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    Completion, Job, JobId, JobStatus, JobStore, StatusCounts, StoreError, StoreFuture,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::{Database, DbConfig, DbError, connect_db, init_schema};

const TABLE: &str = "job";

/// Pending rows tried per claim round.
const CLAIM_WINDOW: usize = 16;

/// Upper bound of the pause between contended rounds, per round.
const CLAIM_JITTER_MS: u64 = 4;

const PENDING_QUERY: &str = r#"
SELECT VALUE id FROM job WHERE status = "pending" ORDER BY id LIMIT $limit;
"#;

const CLAIM_QUERY: &str = r#"
UPDATE type::thing("job", $id)
    SET status = "in_progress", claim_token = $token, updated_at = time::now()
    WHERE status = "pending"
    RETURN AFTER;
"#;

const MARK_DONE_QUERY: &str = r#"
UPDATE type::thing("job", $id)
    SET status = "done", updated_at = time::now()
    WHERE status = "in_progress"
    RETURN AFTER;
"#;

const COUNT_QUERY: &str = "SELECT status, count() AS count FROM job GROUP BY status;";

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    id: Thing,
    status: JobStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    claim_token: Option<String>,
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        let raw = self.id.id.to_raw();
        let id = JobId::parse(&raw)
            .map_err(|e| DbError::Corrupt(format!("job id {:?}: {}", raw, e)))?;
        Ok(Job {
            id,
            status: self.status,
            created_at: self.created_at,
        })
    }
}

/// Struct for creating jobs - omits datetime fields to use SurrealDB defaults.
#[derive(Debug, Serialize)]
struct JobCreate {
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct StatusCount {
    status: JobStatus,
    count: i64,
}

/// Outcome of one pass over the pending window.
enum ClaimRound {
    Claimed(Job),
    Empty,
    /// Every candidate went to another claimer.
    Contended(Option<DbError>),
}

fn claim_jitter(round: u32) -> Duration {
    let spread = CLAIM_JITTER_MS * u64::from(round);
    let pause = getrandom::u32().map_or(spread / 2, |bits| u64::from(bits) % spread);
    Duration::from_millis(1 + pause)
}

/// Job store over a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealJobStore {
    db: Database,
    claim_lock: Arc<Mutex<()>>,
    claim_retries: u32,
}

impl SurrealJobStore {
    /// Connect, apply the schema and return a ready store.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect_db(config).await?;
        init_schema(&db).await?;
        Ok(Self {
            db,
            claim_lock: Arc::new(Mutex::new(())),
            claim_retries: config.claim_retries.max(1),
        })
    }

    async fn append(&self) -> Result<Job, DbError> {
        let id = JobId::new();
        let record: Option<JobRecord> = self
            .db
            .create((TABLE, id.to_string()))
            .content(JobCreate {
                status: JobStatus::Pending,
            })
            .await?;

        let job = record
            .ok_or_else(|| DbError::Query(format!("Failed to create job {}", id)))?
            .into_job()?;
        tracing::debug!(job_id = %job.id, "appended job");
        Ok(job)
    }

    async fn pending_candidates(&self) -> Result<Vec<JobId>, DbError> {
        let mut response = self
            .db
            .query(PENDING_QUERY)
            .bind(("limit", CLAIM_WINDOW))
            .await?;
        let ids: Vec<Thing> = response.take(0)?;
        ids.into_iter()
            .map(|thing| {
                let raw = thing.id.to_raw();
                JobId::parse(&raw).map_err(|e| DbError::Corrupt(format!("job id {:?}: {}", raw, e)))
            })
            .collect()
    }

    /// Move one pending row to in progress, if it is still ours afterwards.
    async fn claim_candidate(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let token = Ulid::new().to_string();
        let mut response = self
            .db
            .query(CLAIM_QUERY)
            .bind(("id", id.to_string()))
            .bind(("token", token.clone()))
            .await?;
        let updated: Vec<JobRecord> = response.take(0)?;
        if updated.is_empty() {
            return Ok(None);
        }

        let current: Option<JobRecord> = self.db.select((TABLE, id.to_string())).await?;
        match current {
            Some(record) if record.claim_token.as_deref() == Some(token.as_str()) => {
                record.into_job().map(Some)
            }
            _ => {
                tracing::warn!(job_id = %id, "claim overwritten by another claimer");
                Ok(None)
            }
        }
    }

    async fn claim_round(&self) -> Result<ClaimRound, DbError> {
        let candidates = self.pending_candidates().await?;
        if candidates.is_empty() {
            return Ok(ClaimRound::Empty);
        }

        let mut conflict = None;
        for id in candidates {
            match self.claim_candidate(id).await {
                Ok(Some(job)) => return Ok(ClaimRound::Claimed(job)),
                // Taken since the scan; try the next one.
                Ok(None) => {}
                Err(e) if e.is_conflict() => {
                    tracing::debug!(job_id = %id, "claim conflicted: {}", e);
                    conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ClaimRound::Contended(conflict))
    }

    async fn claim(&self) -> Result<Option<Job>, DbError> {
        let _claiming = self.claim_lock.lock().await;
        let mut round = 1;
        loop {
            match self.claim_round().await? {
                ClaimRound::Claimed(job) => {
                    tracing::debug!(job_id = %job.id, round, "claimed job");
                    return Ok(Some(job));
                }
                ClaimRound::Empty => return Ok(None),
                ClaimRound::Contended(conflict) if round >= self.claim_retries => {
                    return Err(conflict.unwrap_or_else(|| {
                        DbError::Conflict(format!("no pending job won after {} rounds", round))
                    }));
                }
                ClaimRound::Contended(_) => {
                    round += 1;
                    tokio::time::sleep(claim_jitter(round)).await;
                }
            }
        }
    }

    async fn complete(&self, id: JobId) -> Result<Completion, StoreError> {
        let mut response = self
            .db
            .query(MARK_DONE_QUERY)
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;
        let updated: Vec<JobRecord> = response.take(0).map_err(DbError::from)?;
        if !updated.is_empty() {
            return Ok(Completion::Marked);
        }

        // Nothing moved: classify from the current row.
        match self.select(id).await? {
            None => {
                tracing::warn!(job_id = %id, "job not found while marking done");
                Ok(Completion::Missing)
            }
            Some(job) if job.status == JobStatus::Done => Ok(Completion::AlreadyDone),
            Some(job) if job.status.can_transition_to(JobStatus::Done) => Err(
                StoreError::Conflict(format!("job {} stayed {} after mark done", id, job.status)),
            ),
            Some(job) => Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Done,
            }),
        }
    }

    async fn select(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select((TABLE, id.to_string())).await?;
        record.map(JobRecord::into_job).transpose()
    }

    async fn select_all(&self) -> Result<Vec<Job>, DbError> {
        let records: Vec<JobRecord> = self.db.select(TABLE).await?;
        let mut jobs = records
            .into_iter()
            .map(JobRecord::into_job)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, DbError> {
        let mut response = self.db.query(COUNT_QUERY).await?;
        let rows: Vec<StatusCount> = response.take(0)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            counts.add(row.status, row.count.max(0) as u64);
        }
        Ok(counts)
    }
}

impl JobStore for SurrealJobStore {
    fn backend(&self) -> &'static str {
        "surrealdb"
    }

    fn append_job(&self) -> StoreFuture<'_, Job> {
        Box::pin(async move { Ok(self.append().await?) })
    }

    fn claim_next_pending(&self) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move { Ok(self.claim().await?) })
    }

    fn mark_done(&self, id: JobId) -> StoreFuture<'_, Completion> {
        Box::pin(self.complete(id))
    }

    fn get(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        Box::pin(async move { Ok(self.select(id).await?) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move { Ok(self.select_all().await?) })
    }

    fn counts(&self) -> StoreFuture<'_, StatusCounts> {
        Box::pin(async move { Ok(self.count_by_status().await?) })
    }
}
