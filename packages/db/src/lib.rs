//! Storage backends for the job queue system.
//!
//! This crate provides the two [`queue_core::JobStore`] implementations:
//!
//! - [`SurrealJobStore`]: SurrealDB with a conditional-update claim
//! - [`CsvJobStore`]: a CSV file rewritten under an exclusive `flock`
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a shared SurrealDB server over WebSocket

mod connection;
mod csv_store;
mod schema;
mod surreal_store;

pub use connection::{Database, DbConfig, DbError, connect_db};
pub use csv_store::{CsvConfig, CsvJobStore, TIMESTAMP_FORMAT};
pub use schema::init_schema;
pub use surreal_store::SurrealJobStore;

/// Open a SurrealDB-backed store with the given configuration.
///
/// This connects and applies the schema.
pub async fn init(config: DbConfig) -> Result<SurrealJobStore, DbError> {
    SurrealJobStore::open(&config).await
}
