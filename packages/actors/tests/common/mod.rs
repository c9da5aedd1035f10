#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{Liveness, TaskError, TaskFuture, TaskHandle, TaskSpawner};
use db::{CsvConfig, CsvJobStore, DbConfig, SurrealJobStore};
use queue_core::{
    Completion, Job, JobId, JobStore, StatusCounts, StoreError, StoreFuture,
};
use tempfile::TempDir;

/// A store workers run against, plus whatever keeps its storage alive.
pub struct Backend {
    pub name: &'static str,
    pub store: Arc<dyn JobStore>,
    _dir: Option<TempDir>,
}

/// A fresh in-memory SurrealDB store and a fresh CSV file store.
pub async fn backends() -> Vec<Backend> {
    let config = DbConfig::memory().with_database(format!("test_{}", JobId::new()));
    let surreal = SurrealJobStore::open(&config).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let csv = CsvJobStore::new(&CsvConfig::new(dir.path().join("jobs.csv")));

    vec![
        Backend {
            name: "surrealdb",
            store: Arc::new(surreal),
            _dir: None,
        },
        Backend {
            name: "csv",
            store: Arc::new(csv),
            _dir: Some(dir),
        },
    ]
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// Shared bookkeeping for fake worker tasks.
#[derive(Clone, Default)]
pub struct Fleet {
    next_id: Arc<AtomicU32>,
    launched: Arc<Mutex<Vec<String>>>,
    exits: Arc<Mutex<HashMap<String, Option<i32>>>>,
    terminated: Arc<Mutex<HashSet<String>>>,
    failing_spawns: Arc<AtomicU32>,
}

impl Fleet {
    pub fn spawner(&self) -> Box<dyn TaskSpawner> {
        Box::new(FakeSpawner {
            fleet: self.clone(),
        })
    }

    /// Make the task exit as if it crashed with `code`.
    pub fn crash(&self, id: &str, code: Option<i32>) {
        self.exits.lock().unwrap().insert(id.to_string(), code);
    }

    /// Make the next `n` launches fail.
    pub fn fail_next_spawns(&self, n: u32) {
        self.failing_spawns.store(n, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn was_terminated(&self, id: &str) -> bool {
        self.terminated.lock().unwrap().contains(id)
    }

    pub fn has_exited(&self, id: &str) -> bool {
        self.exits.lock().unwrap().contains_key(id)
    }
}

struct FakeSpawner {
    fleet: Fleet,
}

impl TaskSpawner for FakeSpawner {
    fn spawn(&self) -> Result<Box<dyn TaskHandle>, TaskError> {
        let failing = &self.fleet.failing_spawns;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TaskError::Spawn(std::io::Error::other("spawn refused")));
        }

        let id = (self.fleet.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        self.fleet.launched.lock().unwrap().push(id.clone());
        Ok(Box::new(FakeHandle {
            id,
            fleet: self.fleet.clone(),
        }))
    }
}

struct FakeHandle {
    id: String,
    fleet: Fleet,
}

impl TaskHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self) -> Result<Liveness, TaskError> {
        Ok(match self.fleet.exits.lock().unwrap().get(&self.id) {
            Some(code) => Liveness::Exited(*code),
            None => Liveness::Running,
        })
    }

    fn terminate(&mut self) -> Result<(), TaskError> {
        self.fleet.terminated.lock().unwrap().insert(self.id.clone());
        self.fleet
            .exits
            .lock()
            .unwrap()
            .entry(self.id.clone())
            .or_insert(None);
        Ok(())
    }

    fn wait(&mut self) -> TaskFuture<'_, Option<i32>> {
        Box::pin(async move {
            loop {
                if let Liveness::Exited(code) = self.poll()? {
                    return Ok(code);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }
}

/// Store wrapper that fails a set number of claims and completions.
pub struct FlakyStore {
    inner: Arc<dyn JobStore>,
    failing_claims: AtomicU32,
    failing_completions: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn JobStore>, failing_claims: u32, failing_completions: u32) -> Self {
        Self {
            inner,
            failing_claims: AtomicU32::new(failing_claims),
            failing_completions: AtomicU32::new(failing_completions),
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl JobStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    fn append_job(&self) -> StoreFuture<'_, Job> {
        self.inner.append_job()
    }

    fn claim_next_pending(&self) -> StoreFuture<'_, Option<Job>> {
        if Self::take(&self.failing_claims) {
            return Box::pin(async { Err(StoreError::Unavailable("store offline".into())) });
        }
        self.inner.claim_next_pending()
    }

    fn mark_done(&self, id: JobId) -> StoreFuture<'_, Completion> {
        if Self::take(&self.failing_completions) {
            return Box::pin(async { Err(StoreError::Unavailable("write failed".into())) });
        }
        self.inner.mark_done(id)
    }

    fn get(&self, id: JobId) -> StoreFuture<'_, Option<Job>> {
        self.inner.get(id)
    }

    fn list(&self) -> StoreFuture<'_, Vec<Job>> {
        self.inner.list()
    }

    fn counts(&self) -> StoreFuture<'_, StatusCounts> {
        self.inner.counts()
    }
}
