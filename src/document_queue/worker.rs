//! Polling worker loop.
//!
//! A single worker drains the queue: claim the next job, hand its content to
//! the [`DocumentProcessor`], then confirm the outcome against the
//! [`StatusVerifier`] before declaring the job done. A processor that returns
//! `Ok` but whose document never reached a terminal status is treated as a
//! failure, not a success.

use super::manager::QueueManager;
use super::models::{DocumentStatus, Job, Verification};
use crate::config::WorkerSettings;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Performs the actual document ingestion work.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, notebook_id: &str, document_id: &str, content: &[u8]) -> Result<()>;
}

/// Reports the ground-truth status of a document after processing.
#[async_trait]
pub trait StatusVerifier: Send + Sync {
    async fn check(&self, document_id: &str) -> Result<Verification>;
}

pub struct QueueWorker {
    manager: Arc<QueueManager>,
    processor: Arc<dyn DocumentProcessor>,
    verifier: Option<Arc<dyn StatusVerifier>>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        manager: Arc<QueueManager>,
        processor: Arc<dyn DocumentProcessor>,
        verifier: Option<Arc<dyn StatusVerifier>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            manager,
            processor,
            verifier,
            settings,
        }
    }

    /// Run the worker until the shutdown token is cancelled.
    ///
    /// A job in flight is finished before the loop exits; cancellation is
    /// only observed between jobs and during idle sleeps.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Queue worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.manager.dequeue_next() {
                Ok(Some(job)) => {
                    self.handle_job(job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(Duration::from_millis(self.settings.poll_interval_ms)) => {}
                    }
                }
                Err(e) => {
                    error!("Failed to poll queue: {:#}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(Duration::from_millis(self.settings.poll_interval_ms)) => {}
                    }
                }
            }
        }

        info!("Queue worker stopped");
    }

    async fn handle_job(&self, job: Job) {
        // Claim before doing any work. A false claim means the job changed
        // state since we peeked it, so we just move on.
        match self.manager.mark_processing(&job.id) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!("Failed to claim job {}: {:#}", job.id, e);
                sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;
                return;
            }
        }

        debug!("Processing job {} (document {})", job.id, job.document_id);

        // The processor runs on its own task so a panic in it aborts only
        // that task and surfaces as a failed attempt instead of taking the
        // whole loop down.
        let process_task = {
            let processor = self.processor.clone();
            let notebook_id = job.notebook_id.clone();
            let document_id = job.document_id.clone();
            let content = job.content.clone();
            tokio::spawn(
                async move { processor.process(&notebook_id, &document_id, &content).await },
            )
        };

        let result = match process_task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Processing panicked: {}", e)),
        };

        let outcome = match result {
            Ok(()) => self.finalize(&job).await,
            Err(e) => self.manager.mark_failed(&job.id, &format!("{:#}", e)),
        };

        if let Err(e) = outcome {
            error!("Failed to record outcome of job {}: {:#}", job.id, e);
            sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;
        }
    }

    /// Decide the job's fate after the processor reported success.
    async fn finalize(&self, job: &Job) -> Result<()> {
        let verifier = match &self.verifier {
            Some(verifier) => verifier,
            None => {
                warn!(
                    "No status verifier configured, trusting processor result for job {}",
                    job.id
                );
                return self.manager.mark_completed(&job.id);
            }
        };

        let timeout = Duration::from_secs(self.settings.verify_timeout_secs);
        let checked = tokio::time::timeout(timeout, verifier.check(&job.document_id)).await;

        match checked {
            Ok(Ok(verification)) => match verification.status {
                DocumentStatus::Completed => self.manager.mark_completed(&job.id),
                DocumentStatus::Failed => {
                    let error = verification
                        .error
                        .unwrap_or_else(|| "Document processing failed".to_string());
                    self.manager.mark_failed(&job.id, &error)
                }
                other => {
                    let error = format!(
                        "Document status is '{}' after processing - expected 'completed' or 'failed'",
                        other.as_str()
                    );
                    self.manager.mark_failed(&job.id, &error)
                }
            },
            Ok(Err(e)) => self
                .manager
                .mark_failed(&job.id, &format!("Status verification failed: {:#}", e)),
            Err(_) => self.manager.mark_failed(
                &job.id,
                &format!(
                    "Status verification timed out after {}s",
                    self.settings.verify_timeout_secs
                ),
            ),
        }
    }
}
