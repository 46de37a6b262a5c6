//! Job database
//!
//! One SQLite file under the root folder holds the `jobs` table.

pub mod jobs;
pub mod retry;

pub use jobs::SqliteJobStore;

use mastr_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if needed) the job database and ensure the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!(url = %db_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            source_url TEXT,
            source_ref TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            master_ref TEXT,
            wave_ref TEXT,
            duration_secs REAL NOT NULL DEFAULT 0,
            tempo_bpm REAL NOT NULL DEFAULT 0,
            flags TEXT NOT NULL DEFAULT '',
            flagged INTEGER NOT NULL DEFAULT 0,
            ends_naturally INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_processed ON jobs (processed, id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (jobs)");

    Ok(())
}
