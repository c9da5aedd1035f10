//! Fixed-size pool of supervised worker tasks.
//!
//! The pool only knows workers through [`TaskHandle`], so the same restart
//! logic drives OS processes in production and fakes in tests.

use std::future::Future;
use std::pin::Pin;

use futures_util::future::join_all;

use crate::messages::TaskError;

/// Future type for waiting on a task.
pub type TaskFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send + 'a>>;

/// Observed state of a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exit code, or `None` when killed by a signal.
    Exited(Option<i32>),
}

/// One running worker as seen by the supervisor.
pub trait TaskHandle: Send + 'static {
    /// Stable identifier, used in logs and restart records.
    fn id(&self) -> &str;

    /// Check without blocking whether the task has exited.
    fn poll(&mut self) -> Result<Liveness, TaskError>;

    /// Ask the task to stop.
    fn terminate(&mut self) -> Result<(), TaskError>;

    /// Wait for the task to exit and return its exit code.
    fn wait(&mut self) -> TaskFuture<'_, Option<i32>>;
}

/// Launches new workers.
pub trait TaskSpawner: Send + Sync + 'static {
    fn spawn(&self) -> Result<Box<dyn TaskHandle>, TaskError>;
}

/// A worker that exited and what replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restart {
    pub exited: String,
    pub exit_code: Option<i32>,
    /// `None` when the replacement failed to launch; the slot is retried
    /// on the next reap.
    pub replacement: Option<String>,
}

/// Keeps `size` workers alive.
pub struct WorkerPool {
    spawner: Box<dyn TaskSpawner>,
    size: usize,
    handles: Vec<Box<dyn TaskHandle>>,
    closed: bool,
}

impl WorkerPool {
    /// Create an empty pool. Call [`WorkerPool::fill`] to launch workers.
    pub fn new(spawner: Box<dyn TaskSpawner>, size: usize) -> Self {
        Self {
            spawner,
            size,
            handles: Vec::with_capacity(size),
            closed: false,
        }
    }

    /// Number of workers currently tracked.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ids of the tracked workers, oldest first.
    pub fn ids(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.id().to_string()).collect()
    }

    /// Whether [`WorkerPool::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Launch workers until the pool is full. Returns the new ids.
    pub fn fill(&mut self) -> Vec<String> {
        let mut launched = Vec::new();
        while self.handles.len() < self.size {
            match self.launch() {
                Some(id) => launched.push(id),
                None => break,
            }
        }
        launched
    }

    /// Drop exited workers and launch a replacement for each.
    pub fn reap(&mut self) -> Vec<Restart> {
        if self.closed {
            return Vec::new();
        }

        let mut exits = Vec::new();
        let mut running = Vec::with_capacity(self.handles.len());
        for mut handle in self.handles.drain(..) {
            match handle.poll() {
                Ok(Liveness::Running) => running.push(handle),
                Ok(Liveness::Exited(code)) => exits.push((handle.id().to_string(), code)),
                Err(e) => {
                    tracing::warn!(worker_id = %handle.id(), "Failed to poll worker: {}", e);
                    running.push(handle);
                }
            }
        }
        self.handles = running;

        let restarts = exits
            .into_iter()
            .map(|(exited, exit_code)| Restart {
                exited,
                exit_code,
                replacement: self.launch(),
            })
            .collect();

        // Slots left empty by earlier launch failures
        self.fill();
        restarts
    }

    /// Terminate every worker and wait for all of them to exit.
    ///
    /// No worker is launched after this.
    pub async fn shutdown(&mut self) -> Vec<(String, Option<i32>)> {
        self.closed = true;

        for handle in self.handles.iter_mut() {
            if let Err(e) = handle.terminate() {
                tracing::warn!(worker_id = %handle.id(), "Failed to terminate worker: {}", e);
            }
        }

        let mut handles = std::mem::take(&mut self.handles);
        let waits = handles.iter_mut().map(|handle| async move {
            let id = handle.id().to_string();
            match handle.wait().await {
                Ok(code) => (id, code),
                Err(e) => {
                    tracing::warn!(worker_id = %id, "Failed to wait for worker: {}", e);
                    (id, None)
                }
            }
        });
        join_all(waits).await
    }

    fn launch(&mut self) -> Option<String> {
        if self.closed || self.handles.len() >= self.size {
            return None;
        }
        match self.spawner.spawn() {
            Ok(handle) => {
                let id = handle.id().to_string();
                tracing::debug!(worker_id = %id, "Launched worker");
                self.handles.push(handle);
                Some(id)
            }
            Err(e) => {
                tracing::error!("Failed to launch worker: {}", e);
                None
            }
        }
    }
}
