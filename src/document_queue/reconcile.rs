//! Startup reconciliation between the document ledger and the job queue.
//!
//! The ledger is the user-facing record of each document's status. After a
//! crash it can disagree with the queue: a document can claim to be
//! processing while its job already finished, failed, or was never written.
//! Reconciliation runs once at startup, after crash recovery requeues
//! abandoned jobs, and corrects the ledger so users are not left staring at
//! a permanent "processing" state.

use super::models::JobStatus;
use super::store::JobStore;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A document the ledger believes is still being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub notebook_id: String,
    pub document_id: String,
}

/// The user-facing record of document statuses, as far as reconciliation
/// needs to see it.
#[async_trait]
pub trait DocumentLedger: Send + Sync {
    /// All documents currently recorded as processing.
    async fn processing_documents(&self) -> anyhow::Result<Vec<LedgerEntry>>;

    /// Record a document as failed with the given error.
    async fn mark_document_failed(
        &self,
        notebook_id: &str,
        document_id: &str,
        error: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to read document ledger: {0:#}")]
    Ledger(#[source] anyhow::Error),
    #[error("Failed to read job store: {0:#}")]
    Store(#[source] anyhow::Error),
}

const STALE_COMPLETION_ERROR: &str =
    "Processing completed but document status wasn't updated (possible silent error). Please retry.";

const MISSING_JOB_ERROR: &str = "No queue job found - server may have crashed during upload";

pub struct LedgerReconciler {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn DocumentLedger>,
}

impl LedgerReconciler {
    pub fn new(store: Arc<dyn JobStore>, ledger: Arc<dyn DocumentLedger>) -> Self {
        Self { store, ledger }
    }

    /// Reconcile every processing document against its latest queue job.
    /// Returns the number of ledger entries corrected.
    ///
    /// Documents with a live job (queued or processing) are left alone; the
    /// worker will settle them. Failures to write an individual ledger entry
    /// are logged and skipped so one bad document cannot block the rest.
    pub async fn run(&self) -> Result<usize, ReconcileError> {
        let entries = self
            .ledger
            .processing_documents()
            .await
            .map_err(ReconcileError::Ledger)?;

        if entries.is_empty() {
            return Ok(0);
        }

        info!(
            "Reconciling {} document(s) stuck in processing state",
            entries.len()
        );

        let mut corrected = 0;
        for entry in entries {
            let job = self
                .store
                .latest_job_for_document(&entry.document_id)
                .map_err(ReconcileError::Store)?;

            let error = match job {
                Some(job) => match job.status {
                    JobStatus::Completed => STALE_COMPLETION_ERROR.to_string(),
                    JobStatus::Failed => job
                        .error
                        .unwrap_or_else(|| "Document processing failed".to_string()),
                    JobStatus::Queued | JobStatus::Processing => continue,
                },
                None => MISSING_JOB_ERROR.to_string(),
            };

            match self
                .ledger
                .mark_document_failed(&entry.notebook_id, &entry.document_id, &error)
                .await
            {
                Ok(()) => {
                    info!(
                        "Marked document {} as failed during reconciliation: {}",
                        entry.document_id, error
                    );
                    corrected += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to update ledger for document {}: {:#}",
                        entry.document_id, e
                    );
                }
            }
        }

        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_queue::models::Job;
    use crate::document_queue::store::SqliteJobStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeLedger {
        processing: Mutex<Vec<LedgerEntry>>,
        failures: Mutex<HashMap<String, String>>,
    }

    impl FakeLedger {
        fn with_processing(document_ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                processing: Mutex::new(
                    document_ids
                        .iter()
                        .map(|id| LedgerEntry {
                            notebook_id: "nb-1".to_string(),
                            document_id: id.to_string(),
                        })
                        .collect(),
                ),
                failures: Mutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait]
    impl DocumentLedger for FakeLedger {
        async fn processing_documents(&self) -> anyhow::Result<Vec<LedgerEntry>> {
            Ok(self.processing.lock().unwrap().clone())
        }

        async fn mark_document_failed(
            &self,
            _notebook_id: &str,
            document_id: &str,
            error: &str,
        ) -> anyhow::Result<()> {
            self.failures
                .lock()
                .unwrap()
                .insert(document_id.to_string(), error.to_string());
            Ok(())
        }
    }

    fn make_store() -> Arc<SqliteJobStore> {
        Arc::new(SqliteJobStore::in_memory().unwrap())
    }

    fn insert_job(store: &SqliteJobStore, id: &str, document_id: &str) {
        store
            .insert_job(&Job::new(
                id.to_string(),
                "nb-1".to_string(),
                document_id.to_string(),
                Vec::new(),
                0,
                2,
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_completion_marks_document_failed() {
        let store = make_store();
        insert_job(&store, "job-1", "doc-1");
        store.mark_completed("job-1").unwrap();

        let ledger = FakeLedger::with_processing(&["doc-1"]);
        let reconciler = LedgerReconciler::new(store, ledger.clone());

        let corrected = reconciler.run().await.unwrap();
        assert_eq!(corrected, 1);

        let failures = ledger.failures.lock().unwrap();
        assert_eq!(
            failures.get("doc-1").map(String::as_str),
            Some(STALE_COMPLETION_ERROR)
        );
    }

    #[tokio::test]
    async fn test_failed_job_propagates_its_error() {
        let store = make_store();
        insert_job(&store, "job-1", "doc-1");
        store
            .mark_failed_permanent("job-1", "Failed after 2 retries: parse error")
            .unwrap();

        let ledger = FakeLedger::with_processing(&["doc-1"]);
        let reconciler = LedgerReconciler::new(store, ledger.clone());

        let corrected = reconciler.run().await.unwrap();
        assert_eq!(corrected, 1);

        let failures = ledger.failures.lock().unwrap();
        assert_eq!(
            failures.get("doc-1").map(String::as_str),
            Some("Failed after 2 retries: parse error")
        );
    }

    #[tokio::test]
    async fn test_missing_job_marks_document_failed() {
        let store = make_store();

        let ledger = FakeLedger::with_processing(&["doc-orphan"]);
        let reconciler = LedgerReconciler::new(store, ledger.clone());

        let corrected = reconciler.run().await.unwrap();
        assert_eq!(corrected, 1);

        let failures = ledger.failures.lock().unwrap();
        assert_eq!(
            failures.get("doc-orphan").map(String::as_str),
            Some(MISSING_JOB_ERROR)
        );
    }

    #[tokio::test]
    async fn test_live_jobs_are_left_alone() {
        let store = make_store();
        insert_job(&store, "job-1", "doc-queued");
        insert_job(&store, "job-2", "doc-processing");
        store.mark_processing("job-2").unwrap();

        let ledger = FakeLedger::with_processing(&["doc-queued", "doc-processing"]);
        let reconciler = LedgerReconciler::new(store, ledger.clone());

        let corrected = reconciler.run().await.unwrap();
        assert_eq!(corrected, 0);
        assert!(ledger.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_job_wins_over_older_runs() {
        let store = make_store();

        // An old failed run followed by a fresh completed one
        let mut old = Job::new(
            "job-old".to_string(),
            "nb-1".to_string(),
            "doc-1".to_string(),
            Vec::new(),
            0,
            2,
        );
        old.created_at = 1000;
        store.insert_job(&old).unwrap();
        store.mark_failed_permanent("job-old", "old failure").unwrap();

        insert_job(&store, "job-new", "doc-1");
        store.mark_completed("job-new").unwrap();

        let ledger = FakeLedger::with_processing(&["doc-1"]);
        let reconciler = LedgerReconciler::new(store, ledger.clone());

        reconciler.run().await.unwrap();

        // The newest job is completed, so the ledger gets the stale-completion
        // message rather than the old failure
        let failures = ledger.failures.lock().unwrap();
        assert_eq!(
            failures.get("doc-1").map(String::as_str),
            Some(STALE_COMPLETION_ERROR)
        );
    }

    #[tokio::test]
    async fn test_empty_ledger_is_a_noop() {
        let store = make_store();
        let ledger = FakeLedger::with_processing(&[]);
        let reconciler = LedgerReconciler::new(store, ledger);

        assert_eq!(reconciler.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_skips_entry() {
        struct FlakyLedger {
            inner: Arc<FakeLedger>,
        }

        #[async_trait]
        impl DocumentLedger for FlakyLedger {
            async fn processing_documents(&self) -> anyhow::Result<Vec<LedgerEntry>> {
                self.inner.processing_documents().await
            }

            async fn mark_document_failed(
                &self,
                notebook_id: &str,
                document_id: &str,
                error: &str,
            ) -> anyhow::Result<()> {
                if document_id == "doc-bad" {
                    anyhow::bail!("ledger write rejected");
                }
                self.inner
                    .mark_document_failed(notebook_id, document_id, error)
                    .await
            }
        }

        let store = make_store();
        let inner = FakeLedger::with_processing(&["doc-bad", "doc-good"]);
        let ledger = Arc::new(FlakyLedger {
            inner: inner.clone(),
        });
        let reconciler = LedgerReconciler::new(store, ledger);

        // Both documents have no job; one write fails, the other succeeds
        let corrected = reconciler.run().await.unwrap();
        assert_eq!(corrected, 1);

        let failures = inner.failures.lock().unwrap();
        assert!(failures.contains_key("doc-good"));
        assert!(!failures.contains_key("doc-bad"));
    }
}
