//! Queue manager.
//!
//! Policy layer above the [`JobStore`]: assigns job IDs, decides between
//! retry and permanent failure, and annotates jobs recovered after a crash
//! or stuck in processing.

use super::models::{Job, JobStatus, QueueStats};
use super::store::JobStore;
use crate::config::QueueSettings;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Error annotation for jobs found in `processing` after a restart.
const RESTART_RECOVERY_ERROR: &str = "Recovered from server restart";

/// Error annotation for jobs stuck in `processing` past the timeout.
const STUCK_RECOVERY_ERROR: &str = "Recovered from stuck state";

pub struct QueueManager {
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    /// Enqueue a document for processing. Returns the new job's ID.
    pub fn enqueue(
        &self,
        notebook_id: &str,
        document_id: &str,
        content: Vec<u8>,
        priority: i64,
    ) -> Result<String> {
        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(
            job_id.clone(),
            notebook_id.to_string(),
            document_id.to_string(),
            content,
            priority,
            self.settings.max_retries,
        );
        self.store.insert_job(&job)?;
        info!(
            "Enqueued job {} for document {} (priority {})",
            job_id, document_id, priority
        );
        Ok(job_id)
    }

    /// Peek the next queued job without claiming it.
    pub fn dequeue_next(&self) -> Result<Option<Job>> {
        self.store.next_queued()
    }

    /// Claim a queued job for processing. Returns false if someone else got
    /// to it first or it is no longer queued.
    pub fn mark_processing(&self, job_id: &str) -> Result<bool> {
        let claimed = self.store.mark_processing(job_id)?;
        if !claimed {
            warn!("Job {} was not in queued state, skipping claim", job_id);
        }
        Ok(claimed)
    }

    /// Record successful completion of a job.
    pub fn mark_completed(&self, job_id: &str) -> Result<()> {
        if !self.store.mark_completed(job_id)? {
            warn!("Cannot complete job {}: not found", job_id);
        }
        Ok(())
    }

    /// Record a processing failure.
    ///
    /// Requeues the job with an annotated error while the retry budget lasts;
    /// once exhausted, the job goes to `failed` permanently.
    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        let job = match self.store.get_job(job_id)? {
            Some(job) => job,
            None => {
                warn!("Cannot fail job {}: not found", job_id);
                return Ok(());
            }
        };

        if job.retries_exhausted() {
            let annotated = format!("Failed after {} retries: {}", job.max_retries, error);
            self.store.mark_failed_permanent(job_id, &annotated)?;
            warn!("Job {} failed permanently: {}", job_id, error);
        } else {
            let annotated = format!(
                "Retry {}/{}: {}",
                job.retry_count + 1,
                job.max_retries,
                error
            );
            self.store.requeue_for_retry(job_id, &annotated)?;
            info!(
                "Job {} requeued for retry {}/{}: {}",
                job_id,
                job.retry_count + 1,
                job.max_retries,
                error
            );
        }
        Ok(())
    }

    /// Look up a job by ID.
    pub fn get_job_status(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get_job(job_id)
    }

    /// The most recently created job for a document, if any.
    pub fn latest_job_for_document(&self, document_id: &str) -> Result<Option<Job>> {
        self.store.latest_job_for_document(document_id)
    }

    /// Per-status counts, optionally scoped to one notebook.
    pub fn get_stats(&self, notebook_id: Option<&str>) -> Result<QueueStats> {
        self.store.count_by_status(notebook_id)
    }

    /// List a notebook's jobs, newest first.
    pub fn list_jobs(&self, notebook_id: &str, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.store.list_by_notebook(notebook_id, status)
    }

    /// Requeue jobs abandoned in `processing`.
    ///
    /// With no timeout every processing job is requeued, which is only safe
    /// at startup before the worker runs. With a timeout only jobs whose
    /// processing started before the cutoff are touched. Recovery never
    /// consumes the retry budget.
    pub fn recover_stuck_jobs(&self, stuck_timeout_secs: Option<u64>) -> Result<usize> {
        let recovered = match stuck_timeout_secs {
            None => self.store.requeue_all_processing(RESTART_RECOVERY_ERROR)?,
            Some(timeout_secs) => {
                let cutoff = chrono::Utc::now().timestamp_millis() - (timeout_secs as i64) * 1000;
                self.store
                    .requeue_processing_started_before(cutoff, STUCK_RECOVERY_ERROR)?
            }
        };
        if recovered > 0 {
            info!("Recovered {} stuck job(s) back to queued", recovered);
        }
        Ok(recovered)
    }

    /// Delete terminal jobs older than the given age. Returns the number of
    /// jobs deleted.
    pub fn clear_old_jobs(&self, max_age_days: u32) -> Result<usize> {
        let cutoff =
            chrono::Utc::now().timestamp_millis() - (max_age_days as i64) * 24 * 60 * 60 * 1000;
        let deleted = self.store.delete_terminal_older_than(cutoff)?;
        if deleted > 0 {
            info!("Cleared {} old job(s) from the queue", deleted);
        }
        Ok(deleted)
    }

    /// [`clear_old_jobs`](Self::clear_old_jobs) with the configured retention
    /// age.
    pub fn clear_expired_jobs(&self) -> Result<usize> {
        self.clear_old_jobs(self.settings.cleanup_max_age_days)
    }
}
