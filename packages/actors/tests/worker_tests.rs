mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actors::{WorkerArgs, WorkerConfig, WorkerMessage, produce, start_worker, worker_stats};
use common::{FlakyStore, backends, eventually};
use queue_core::{JobEvent, JobId, JobStatus, JobStore};
use tokio::sync::broadcast;

fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_backoff(Duration::from_millis(20))
        .with_work_duration(Duration::ZERO)
}

fn args(
    worker_id: &str,
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    event_tx: &broadcast::Sender<JobEvent>,
) -> WorkerArgs {
    WorkerArgs {
        worker_id: worker_id.to_string(),
        store,
        config,
        event_tx: Some(event_tx.clone()),
    }
}

fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_job_is_claimed_then_completed() {
    for backend in backends().await {
        let store = backend.store.clone();
        let (event_tx, mut rx) = broadcast::channel(256);

        let job = store.append_job().await.unwrap();
        let job_id = job.id;

        let slow = fast_config().with_work_duration(Duration::from_millis(300));
        let (worker, handle) = start_worker(args("worker-a", store.clone(), slow, &event_tx))
            .await
            .unwrap();

        // While the job is being worked on it is in progress and unclaimable.
        let claimed = eventually(Duration::from_secs(5), || {
            let store = store.clone();
            async move {
                matches!(store.get(job_id).await, Ok(Some(j)) if j.status == JobStatus::InProgress)
            }
        })
        .await;
        assert!(claimed, "{}: job never claimed", backend.name);
        assert!(store.claim_next_pending().await.unwrap().is_none(), "{}", backend.name);

        let done = eventually(Duration::from_secs(5), || {
            let store = store.clone();
            async move { matches!(store.get(job_id).await, Ok(Some(j)) if j.status == JobStatus::Done) }
        })
        .await;
        assert!(done, "{}: job never completed", backend.name);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(JobEvent::WorkerStarted { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            JobEvent::JobClaimed { job_id, worker_id, .. } if *job_id == job.id && worker_id == "worker-a"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            JobEvent::JobCompleted { job_id, .. } if *job_id == job.id
        )));
        assert!(matches!(events.last(), Some(JobEvent::WorkerStopped { .. })));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_split_six_jobs_without_overlap() {
    for backend in backends().await {
        let store = backend.store.clone();
        let (event_tx, mut rx) = broadcast::channel(256);

        let report = produce(store.as_ref(), 6, None).await;
        assert_eq!(report.created.len(), 6);
        assert_eq!(report.failed, 0);

        let (first, first_handle) =
            start_worker(args("worker-1", store.clone(), fast_config(), &event_tx))
                .await
                .unwrap();
        let (second, second_handle) =
            start_worker(args("worker-2", store.clone(), fast_config(), &event_tx))
                .await
                .unwrap();

        let all_done = eventually(Duration::from_secs(10), || {
            let store = store.clone();
            async move { matches!(store.counts().await, Ok(c) if c.done == 6) }
        })
        .await;
        assert!(all_done, "{}: jobs left unfinished", backend.name);

        first.send_message(WorkerMessage::Shutdown).unwrap();
        second.send_message(WorkerMessage::Shutdown).unwrap();
        first_handle.await.unwrap();
        second_handle.await.unwrap();

        let mut claims: HashMap<JobId, usize> = HashMap::new();
        for event in drain(&mut rx) {
            match event {
                JobEvent::JobClaimed { job_id, .. } => *claims.entry(job_id).or_default() += 1,
                JobEvent::ClaimFailed { error, .. } => {
                    panic!("{}: claim failed with jobs waiting: {}", backend.name, error)
                }
                _ => {}
            }
        }
        assert_eq!(claims.len(), 6, "{}", backend.name);
        for id in &report.created {
            assert_eq!(claims.get(id), Some(&1), "{}: job {} claimed more than once", backend.name, id);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn claim_and_completion_failures_do_not_stop_the_worker() {
    for backend in backends().await {
        let inner = backend.store.clone();
        let first = inner.append_job().await.unwrap();
        let second = inner.append_job().await.unwrap();

        let store: Arc<dyn JobStore> = Arc::new(FlakyStore::new(inner.clone(), 2, 1));
        let (event_tx, mut rx) = broadcast::channel(256);
        let (worker, handle) = start_worker(args("worker-flaky", store, fast_config(), &event_tx))
            .await
            .unwrap();

        let settled = eventually(Duration::from_secs(10), || {
            let inner = inner.clone();
            async move {
                matches!(inner.counts().await, Ok(c) if c.pending == 0 && c.done == 1 && c.in_progress == 1)
            }
        })
        .await;
        assert!(settled, "{}: worker stalled", backend.name);

        // The failed completion leaves the first job stuck in progress.
        assert_eq!(
            inner.get(first.id).await.unwrap().map(|j| j.status),
            Some(JobStatus::InProgress)
        );
        assert_eq!(
            inner.get(second.id).await.unwrap().map(|j| j.status),
            Some(JobStatus::Done)
        );

        let stats = worker_stats(&worker, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.worker_id, "worker-flaky");
        assert_eq!(stats.claim_errors, 2);
        assert_eq!(stats.completion_errors, 1);
        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.current_job, None);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();

        let failures = drain(&mut rx).into_iter().filter(JobEvent::is_failure).count();
        assert_eq!(failures, 3, "{}", backend.name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_worker_backs_off_and_picks_up_late_jobs() {
    for backend in backends().await {
        let store = backend.store.clone();
        let (event_tx, _rx) = broadcast::channel(256);
        let (worker, handle) =
            start_worker(args("worker-idle", store.clone(), fast_config(), &event_tx))
                .await
                .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let idle = worker_stats(&worker, Duration::from_secs(5)).await.unwrap();
        assert_eq!(idle.claimed, 0, "{}", backend.name);
        assert_eq!(idle.claim_errors, 0, "{}", backend.name);

        let job_id = store.append_job().await.unwrap().id;
        let done = eventually(Duration::from_secs(5), || {
            let store = store.clone();
            async move { matches!(store.get(job_id).await, Ok(Some(j)) if j.status == JobStatus::Done) }
        })
        .await;
        assert!(done, "{}: late job never completed", backend.name);

        worker.send_message(WorkerMessage::Shutdown).unwrap();
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn producer_reports_each_created_job() {
    for backend in backends().await {
        let store = backend.store.clone();
        let (event_tx, mut rx) = broadcast::channel(16);

        let report = produce(store.as_ref(), 2, Some(&event_tx)).await;
        assert_eq!(report.created.len(), 2);

        let announced: Vec<JobId> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::JobCreated { job_id, .. } => Some(job_id),
                _ => None,
            })
            .collect();
        assert_eq!(announced, report.created, "{}", backend.name);

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
    }
}

#[tokio::test]
async fn producer_keeps_going_after_a_failed_append() {
    let store = FailingAppends::default();
    let report = produce(&store, 3, None).await;
    assert_eq!(report.failed, 3);
    assert!(report.created.is_empty());
}

#[derive(Default)]
struct FailingAppends;

impl JobStore for FailingAppends {
    fn backend(&self) -> &'static str {
        "failing"
    }

    fn append_job(&self) -> queue_core::StoreFuture<'_, queue_core::Job> {
        Box::pin(async { Err(queue_core::StoreError::Unavailable("disk full".into())) })
    }

    fn claim_next_pending(&self) -> queue_core::StoreFuture<'_, Option<queue_core::Job>> {
        Box::pin(async { Ok(None) })
    }

    fn mark_done(&self, _id: JobId) -> queue_core::StoreFuture<'_, queue_core::Completion> {
        Box::pin(async { Ok(queue_core::Completion::Missing) })
    }

    fn get(&self, _id: JobId) -> queue_core::StoreFuture<'_, Option<queue_core::Job>> {
        Box::pin(async { Ok(None) })
    }

    fn list(&self) -> queue_core::StoreFuture<'_, Vec<queue_core::Job>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
