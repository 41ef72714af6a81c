//! Job storage and persistence.
//!
//! Provides SQLite-backed storage for document processing jobs. This layer is
//! pure persistence: every operation is a single short transaction that
//! commits before returning, and no business logic lives here.

use super::models::{Job, JobStatus, QueueStats};
use super::schema::JOB_QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Trait for job storage operations.
///
/// The store is the single source of truth for job state; no in-memory cache
/// is authoritative. Callers go through the
/// [`QueueManager`](super::manager::QueueManager) rather than mutating rows
/// directly.
pub trait JobStore: Send + Sync {
    /// Insert a new job row.
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Get the next queued job (highest priority first, then oldest).
    fn next_queued(&self) -> Result<Option<Job>>;

    /// Transition a queued job to processing and stamp started_at.
    /// Returns false if the job was not in `queued` state.
    fn mark_processing(&self, id: &str) -> Result<bool>;

    /// Transition a job to completed, stamp completed_at (first call wins),
    /// and clear the error. Returns false if the job does not exist.
    fn mark_completed(&self, id: &str) -> Result<bool>;

    /// Put a job back in the queue with an incremented retry count and the
    /// given error annotation. Returns false if the job does not exist.
    fn requeue_for_retry(&self, id: &str, error: &str) -> Result<bool>;

    /// Transition a job to failed, stamp failed_at (first call wins), and
    /// record the terminal error. Returns false if the job does not exist.
    fn mark_failed_permanent(&self, id: &str, error: &str) -> Result<bool>;

    /// Count jobs per status, optionally scoped to one notebook.
    fn count_by_status(&self, notebook_id: Option<&str>) -> Result<QueueStats>;

    /// List jobs for a notebook, newest first, optionally filtered by status.
    fn list_by_notebook(&self, notebook_id: &str, status: Option<JobStatus>) -> Result<Vec<Job>>;

    /// Get the most recently created job for a document, if any.
    fn latest_job_for_document(&self, document_id: &str) -> Result<Option<Job>>;

    /// Requeue every processing job with the given error annotation.
    /// Returns the number of jobs requeued.
    fn requeue_all_processing(&self, error: &str) -> Result<usize>;

    /// Requeue processing jobs whose started_at is older than the cutoff
    /// (Unix millis). Returns the number of jobs requeued.
    fn requeue_processing_started_before(&self, cutoff: i64, error: &str) -> Result<usize>;

    /// Delete completed/failed jobs whose terminal timestamp is older than
    /// the cutoff (Unix millis). Returns the number of jobs deleted.
    fn delete_terminal_older_than(&self, cutoff: i64) -> Result<usize>;
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Create a new SqliteJobStore.
    ///
    /// Opens an existing database or creates a new one with the current schema.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            JOB_QUEUE_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new job queue database at {:?}", db_path.as_ref());
            conn
        };

        // Read the database version
        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Job queue database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = JOB_QUEUE_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Job queue database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        // Validate schema matches expected structure
        JOB_QUEUE_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        // Run migrations if needed
        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOB_QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run any pending migrations.
    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = JOB_QUEUE_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating job queue database from version {} to {}",
            current_version, target_version
        );

        for schema in JOB_QUEUE_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running job queue migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        // Update version
        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + target_version
            ),
            [],
        )?;

        Ok(())
    }

    /// Get a reference to the connection for internal use.
    #[allow(dead_code)]
    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Helper to convert a database row to a Job.
    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get("id")?,
            notebook_id: row.get("notebook_id")?,
            document_id: row.get("document_id")?,
            content: row.get("content")?,
            status: JobStatus::from_db_str(&row.get::<_, String>("status")?)
                .unwrap_or(JobStatus::Failed),
            priority: row.get("priority")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            failed_at: row.get("failed_at")?,
            error: row.get("error")?,
        })
    }

    /// Get current timestamp in milliseconds.
    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl JobStore for SqliteJobStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO jobs (
                id, notebook_id, document_id, content, status, priority,
                retry_count, max_retries, created_at, started_at,
                completed_at, failed_at, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                job.id,
                job.notebook_id,
                job.document_id,
                job.content,
                job.status.as_db_str(),
                job.priority,
                job.retry_count,
                job.max_retries,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.failed_at,
                job.error,
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;

        let job = stmt.query_row([id], Self::row_to_job).optional()?;

        Ok(job)
    }

    fn next_queued(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        // rowid breaks ties between jobs created in the same millisecond,
        // keeping FIFO order within a priority band deterministic.
        let mut stmt = conn.prepare(
            r#"SELECT * FROM jobs
               WHERE status = 'queued'
               ORDER BY priority DESC, created_at ASC, rowid ASC
               LIMIT 1"#,
        )?;

        let job = stmt.query_row([], Self::row_to_job).optional()?;

        Ok(job)
    }

    fn mark_processing(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'processing', started_at = ?2
               WHERE id = ?1 AND status = 'queued'"#,
            params![id, Self::now_ms()],
        )?;
        Ok(changed > 0)
    }

    fn mark_completed(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // COALESCE keeps the first completion timestamp if called twice
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'completed',
                   completed_at = COALESCE(completed_at, ?2),
                   error = NULL
               WHERE id = ?1"#,
            params![id, Self::now_ms()],
        )?;
        Ok(changed > 0)
    }

    fn requeue_for_retry(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'queued',
                   retry_count = retry_count + 1,
                   error = ?2
               WHERE id = ?1"#,
            params![id, error],
        )?;
        Ok(changed > 0)
    }

    fn mark_failed_permanent(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'failed',
                   failed_at = COALESCE(failed_at, ?3),
                   error = ?2
               WHERE id = ?1"#,
            params![id, error, Self::now_ms()],
        )?;
        Ok(changed > 0)
    }

    fn count_by_status(&self, notebook_id: Option<&str>) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();

        let mut stats = QueueStats::default();
        let mut tally = |status: String, count: usize| {
            match status.as_str() {
                "queued" => stats.queued = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
            stats.total += count;
        };

        match notebook_id {
            Some(notebook_id) => {
                let mut stmt = conn.prepare(
                    r#"SELECT status, COUNT(*) FROM jobs
                       WHERE notebook_id = ?1
                       GROUP BY status"#,
                )?;
                let rows = stmt.query_map([notebook_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    tally(status, count);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    tally(status, count);
                }
            }
        }

        Ok(stats)
    }

    fn list_by_notebook(&self, notebook_id: &str, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();

        let jobs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM jobs
                       WHERE notebook_id = ?1 AND status = ?2
                       ORDER BY created_at DESC"#,
                )?;
                let rows = stmt
                    .query_map(params![notebook_id, status.as_db_str()], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    r#"SELECT * FROM jobs
                       WHERE notebook_id = ?1
                       ORDER BY created_at DESC"#,
                )?;
                let rows = stmt
                    .query_map([notebook_id], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(jobs)
    }

    fn latest_job_for_document(&self, document_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM jobs
               WHERE document_id = ?1
               ORDER BY created_at DESC, rowid DESC
               LIMIT 1"#,
        )?;

        let job = stmt.query_row([document_id], Self::row_to_job).optional()?;

        Ok(job)
    }

    fn requeue_all_processing(&self, error: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'queued', error = ?1
               WHERE status = 'processing'"#,
            params![error],
        )?;
        Ok(changed)
    }

    fn requeue_processing_started_before(&self, cutoff: i64, error: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE jobs
               SET status = 'queued', error = ?2
               WHERE status = 'processing' AND started_at < ?1"#,
            params![cutoff, error],
        )?;
        Ok(changed)
    }

    fn delete_terminal_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            r#"DELETE FROM jobs
               WHERE status IN ('completed', 'failed')
               AND (completed_at < ?1 OR failed_at < ?1)"#,
            params![cutoff],
        )?;
        Ok(deleted)
    }
}
