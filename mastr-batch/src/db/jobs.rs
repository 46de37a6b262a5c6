//! SQLite job store
//!
//! Serves as the dispatcher's [`JobSource`] (cursor pages ordered by id) and
//! the workers' [`ResultSink`]. Saves are full-row upserts with no version
//! column: concurrent saves of one id resolve to whichever lands last.

use super::retry::retry_on_lock;
use crate::dispatch::{JobSource, ResultSink};
use crate::error::BatchResult;
use crate::models::{Job, JobFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

const COLUMNS: &str = "id, source_url, source_ref, processed, master_ref, wave_ref, \
                       duration_secs, tempo_bpm, flags, flagged, ends_naturally, updated_at";

/// Jobs table access
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_lock_wait: Duration,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait: Duration::from_secs(5),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add new jobs for remote source URLs, returning them in id order
    pub async fn enqueue(&self, source_urls: &[String]) -> BatchResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(source_urls.len());
        for url in source_urls {
            let job = Job::new(Job::generate_id(), Some(url.clone()));
            self.save(&job).await?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Job counts: (total, processed, flagged)
    pub async fn counts(&self) -> BatchResult<(i64, i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COALESCE(SUM(processed), 0) AS processed, \
                    COALESCE(SUM(flagged), 0) AS flagged \
             FROM jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("total")?, row.try_get("processed")?, row.try_get("flagged")?))
    }
}

#[async_trait]
impl JobSource<Job> for SqliteJobStore {
    type Filter = JobFilter;

    async fn next_page(
        &self,
        after: Option<&str>,
        page_size: usize,
        filter: &JobFilter,
    ) -> BatchResult<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE id > ? AND ({}) ORDER BY id ASC LIMIT ?",
            COLUMNS,
            filter.sql_clause()
        );

        let rows = sqlx::query(&sql)
            .bind(after.unwrap_or(""))
            .bind(page_size as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }
}

#[async_trait]
impl ResultSink<Job> for SqliteJobStore {
    async fn fetch(&self, id: &str) -> BatchResult<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn save(&self, job: &Job) -> BatchResult<()> {
        let updated_at = Utc::now();

        retry_on_lock("save_job", self.max_lock_wait, || async {
            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, source_url, source_ref, processed, master_ref, wave_ref,
                    duration_secs, tempo_bpm, flags, flagged, ends_naturally, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_url = excluded.source_url,
                    source_ref = excluded.source_ref,
                    processed = excluded.processed,
                    master_ref = excluded.master_ref,
                    wave_ref = excluded.wave_ref,
                    duration_secs = excluded.duration_secs,
                    tempo_bpm = excluded.tempo_bpm,
                    flags = excluded.flags,
                    flagged = excluded.flagged,
                    ends_naturally = excluded.ends_naturally,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&job.id)
            .bind(&job.source_url)
            .bind(&job.source_ref)
            .bind(job.processed)
            .bind(&job.master_ref)
            .bind(&job.wave_ref)
            .bind(job.duration_secs)
            .bind(job.tempo_bpm)
            .bind(&job.flags)
            .bind(job.flagged)
            .bind(job.ends_naturally)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map_err(mastr_common::Error::Database)?;
            Ok(())
        })
        .await?;

        tracing::debug!(job_id = %job.id, processed = job.processed, "Job saved");
        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> BatchResult<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        source_url: row.try_get("source_url")?,
        source_ref: row.try_get("source_ref")?,
        processed: row.try_get("processed")?,
        master_ref: row.try_get("master_ref")?,
        wave_ref: row.try_get("wave_ref")?,
        duration_secs: row.try_get("duration_secs")?,
        tempo_bpm: row.try_get("tempo_bpm")?,
        flags: row.try_get("flags")?,
        flagged: row.try_get("flagged")?,
        ends_naturally: row.try_get("ends_naturally")?,
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
    })
}
