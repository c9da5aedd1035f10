use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "jobq", about, long_about = None, version)]
pub(crate) struct Args {
    #[command(flatten)]
    pub(crate) store: StoreArgs,
    /// Enables human-friendly logging.
    #[arg(short, long, global = true, default_value_t)]
    pub(crate) debug: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Appends pending jobs and prints their ids.
    Produce {
        /// Number of jobs to append.
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// Claims and processes jobs until terminated.
    Work(WorkArgs),
    /// Keeps a fixed number of worker processes running.
    Supervise {
        /// Number of workers to keep alive.
        #[arg(short, long, default_value_t = 3)]
        workers: usize,
        /// Milliseconds between worker liveness checks.
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
        #[command(flatten)]
        work: WorkArgs,
    },
    /// Prints job counts per status and every job.
    Status,
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct WorkArgs {
    /// Seconds to wait before polling again when no job is pending.
    #[arg(long, default_value_t = 5)]
    pub(crate) backoff_secs: u64,
    /// Seconds of simulated work per job.
    #[arg(long, default_value_t = 30)]
    pub(crate) work_secs: u64,
}

impl WorkArgs {
    pub(crate) fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub(crate) fn work_duration(&self) -> Duration {
        Duration::from_secs(self.work_secs)
    }

    /// Arguments reproducing these options on a child `work` command.
    pub(crate) fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--backoff-secs".into(),
            self.backoff_secs.to_string(),
            "--work-secs".into(),
            self.work_secs.to_string(),
        ]
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreKind {
    /// CSV file guarded by an advisory lock.
    Csv,
    /// SurrealDB with conditional-update claims.
    Surreal,
}

impl StoreKind {
    fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Csv => "csv",
            StoreKind::Surreal => "surreal",
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct StoreArgs {
    /// Job store backend.
    #[arg(long = "store", global = true, env = "JOBQ_STORE", value_enum, default_value_t = StoreKind::Csv)]
    pub(crate) kind: StoreKind,
    /// Jobs file for the CSV store.
    #[arg(long, global = true, env = "JOBQ_CSV_PATH", default_value = "jobs.csv")]
    pub(crate) csv_path: PathBuf,
    /// SurrealDB endpoint: mem://, rocksdb://path or ws://host:port.
    #[arg(long, global = true, env = "JOBQ_DB_ENDPOINT", default_value = "mem://")]
    pub(crate) db_endpoint: String,
    /// SurrealDB namespace.
    #[arg(long, global = true, env = "JOBQ_DB_NAMESPACE", default_value = "jobqueue")]
    pub(crate) db_namespace: String,
    /// SurrealDB database.
    #[arg(long, global = true, env = "JOBQ_DB_DATABASE", default_value = "main")]
    pub(crate) db_database: String,
    /// SurrealDB root user.
    #[arg(long, global = true, env = "JOBQ_DB_USER", requires = "db_pass")]
    pub(crate) db_user: Option<String>,
    /// SurrealDB root password.
    #[arg(long, global = true, env = "JOBQ_DB_PASS", hide_env_values = true)]
    pub(crate) db_pass: Option<String>,
}

impl StoreArgs {
    /// Arguments selecting the same store in a child process.
    ///
    /// Credentials are left out of the command line; children inherit them
    /// through the environment.
    pub(crate) fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--store".into(),
            self.kind.as_str().into(),
            "--csv-path".into(),
            self.csv_path.display().to_string(),
            "--db-endpoint".into(),
            self.db_endpoint.clone(),
            "--db-namespace".into(),
            self.db_namespace.clone(),
            "--db-database".into(),
            self.db_database.clone(),
        ]
    }
}
