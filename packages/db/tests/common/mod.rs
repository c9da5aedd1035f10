use std::sync::Arc;

use db::{CsvConfig, CsvJobStore, DbConfig, DbError, SurrealJobStore};
use queue_core::{JobId, JobStore};
use tempfile::TempDir;

/// A store under test plus whatever keeps its backing storage alive.
pub struct Backend {
    pub name: &'static str,
    pub store: Arc<dyn JobStore>,
    _dir: Option<TempDir>,
}

/// Fresh in-memory SurrealDB store with its own database.
pub async fn surreal() -> Result<Backend, DbError> {
    let config = DbConfig::memory().with_database(format!("test_{}", JobId::new()));
    let store = SurrealJobStore::open(&config).await?;
    Ok(Backend {
        name: "surrealdb",
        store: Arc::new(store),
        _dir: None,
    })
}

/// Fresh CSV store in a scratch directory.
pub fn csv() -> Result<Backend, std::io::Error> {
    let dir = tempfile::tempdir()?;
    let store = CsvJobStore::new(&CsvConfig::new(dir.path().join("jobs.csv")));
    Ok(Backend {
        name: "csv",
        store: Arc::new(store),
        _dir: Some(dir),
    })
}

/// One fresh instance of every backend.
pub async fn backends() -> Result<Vec<Backend>, Box<dyn std::error::Error>> {
    Ok(vec![surreal().await?, csv()?])
}
