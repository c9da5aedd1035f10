mod args;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use actors::{
    ProcessSpawner, SupervisorArgs, SupervisorConfig, SupervisorMessage, WorkerArgs, WorkerConfig,
    produce, start_supervisor, start_worker,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use db::{CsvConfig, CsvJobStore, DbConfig, TIMESTAMP_FORMAT};
use queue_core::{JobEvent, JobStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Level, error, info, warn};

use crate::args::{Args, Command, StoreArgs, StoreKind, WorkArgs};
use crate::shutdown::install_shutdown_handler;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging goes to stderr; stdout carries the event lines.
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .init();
    }

    match begin(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("encountered runtime error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn begin(args: Args) -> Result<()> {
    match args.command {
        Command::Produce { count } => run_produce(&args.store, count).await,
        Command::Work(ref work) => run_worker(&args.store, work).await,
        Command::Supervise {
            workers,
            poll_ms,
            ref work,
        } => {
            let config = SupervisorConfig::default()
                .with_workers(workers)
                .with_poll_interval(Duration::from_millis(poll_ms));
            run_supervisor(&args.store, work, config, args.debug).await
        }
        Command::Status => run_status(&args.store).await,
    }
}

async fn open_store(store: &StoreArgs) -> Result<Arc<dyn JobStore>> {
    match store.kind {
        StoreKind::Csv => {
            let config = CsvConfig::new(&store.csv_path);
            info!(path = %config.path.display(), "using CSV job store");
            Ok(Arc::new(CsvJobStore::new(&config)))
        }
        StoreKind::Surreal => {
            let mut config = DbConfig::default()
                .with_endpoint(&store.db_endpoint)
                .with_namespace(&store.db_namespace)
                .with_database(&store.db_database);
            if let (Some(user), Some(pass)) = (&store.db_user, &store.db_pass) {
                config = config.with_credentials(user, pass);
            }
            let db = db::init(config)
                .await
                .with_context(|| format!("opening SurrealDB store at {}", store.db_endpoint))?;
            info!(endpoint = %store.db_endpoint, "using SurrealDB job store");
            Ok(Arc::new(db))
        }
    }
}

/// Print event lines on stdout until every sender is dropped.
fn spawn_printer(prefix: &'static str) -> (broadcast::Sender<JobEvent>, JoinHandle<()>) {
    let (tx, mut rx) = broadcast::channel::<JobEvent>(256);
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => println!(
                    "{} {}{}",
                    event.timestamp().format(TIMESTAMP_FORMAT),
                    prefix,
                    event.description()
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    (tx, printer)
}

async fn run_produce(store: &StoreArgs, count: usize) -> Result<()> {
    let store = open_store(store).await?;
    let (event_tx, printer) = spawn_printer("Producer: ");

    let report = produce(store.as_ref(), count, Some(&event_tx)).await;
    drop(event_tx);
    printer.await?;

    if report.failed > 0 {
        bail!("{} of {} jobs could not be added", report.failed, count);
    }
    Ok(())
}

async fn run_worker(store: &StoreArgs, work: &WorkArgs) -> Result<()> {
    let shutdown = install_shutdown_handler()?;
    let store = open_store(store).await?;
    let (event_tx, printer) = spawn_printer("");

    let config = WorkerConfig::default()
        .with_backoff(work.backoff())
        .with_work_duration(work.work_duration());
    let (worker, mut handle) = start_worker(WorkerArgs {
        worker_id: std::process::id().to_string(),
        store,
        config,
        event_tx: Some(event_tx),
    })
    .await?;

    let signalled = tokio::select! {
        name = shutdown => Some(name),
        result = &mut handle => {
            result.context("worker task failed")?;
            None
        }
    };
    if signalled.is_none() {
        bail!("worker stopped unexpectedly");
    }

    // The job in hand, if any, is abandoned and stays in progress.
    worker.kill();
    handle.await.context("worker task failed")?;
    printer.await?;
    Ok(())
}

async fn run_supervisor(
    store: &StoreArgs,
    work: &WorkArgs,
    config: SupervisorConfig,
    debug: bool,
) -> Result<()> {
    let shutdown = install_shutdown_handler()?;

    if store.kind == StoreKind::Surreal && store.db_endpoint.starts_with("mem://") {
        warn!("mem:// stores are private to each process; workers will not share jobs");
    }

    let mut worker_args = vec!["work".to_string()];
    worker_args.extend(store.to_cli_args());
    worker_args.extend(work.to_cli_args());
    if debug {
        worker_args.push("--debug".into());
    }
    let spawner = ProcessSpawner::current_exe(worker_args)?;

    let (event_tx, printer) = spawn_printer("Supervisor: ");
    let (supervisor, mut handle) = start_supervisor(SupervisorArgs {
        config,
        spawner: Box::new(spawner),
        event_tx: Some(event_tx),
    })
    .await?;

    let signalled = tokio::select! {
        name = shutdown => Some(name),
        result = &mut handle => {
            result.context("supervisor task failed")?;
            None
        }
    };
    if signalled.is_none() {
        bail!("supervisor stopped unexpectedly");
    }

    supervisor
        .send_message(SupervisorMessage::Shutdown)
        .map_err(|e| anyhow!("supervisor unreachable: {}", e))?;
    handle.await.context("supervisor task failed")?;
    printer.await?;
    Ok(())
}

async fn run_status(store: &StoreArgs) -> Result<()> {
    let store = open_store(store).await?;
    let counts = store.counts().await?;
    let jobs = store.list().await?;

    println!(
        "pending: {}  in_progress: {}  done: {}  total: {}",
        counts.pending,
        counts.in_progress,
        counts.done,
        counts.total()
    );
    for job in jobs {
        println!(
            "{}  {:<11}  {}",
            job.id,
            job.status.as_str(),
            job.created_at.format(TIMESTAMP_FORMAT)
        );
    }
    Ok(())
}
