//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates the job table, its fields and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
-- Job table; record keys are ULIDs so key order is creation order
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS status ON job TYPE string DEFAULT "pending"
    ASSERT $value IN ["pending", "in_progress", "done"];
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE datetime DEFAULT time::now() READONLY;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE datetime DEFAULT time::now();
-- Set by each claim attempt; the claimer whose token survives owns the job
DEFINE FIELD IF NOT EXISTS claim_token ON job TYPE option<string>;

-- Claims scan pending jobs
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;
