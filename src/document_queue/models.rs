//! Data models for the document queue.
//!
//! Defines jobs, job statuses, queue statistics, and verification results.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A single unit of queued ingestion work with a durable lifecycle record.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique identifier (UUID), assigned at enqueue time, never reused.
    pub id: String,
    /// Notebook the document belongs to. Opaque to the queue.
    pub notebook_id: String,
    /// Document being processed. Opaque to the queue.
    pub document_id: String,
    /// Content handed verbatim to the processor.
    pub content: Vec<u8>,
    /// Current status in the state machine.
    pub status: JobStatus,
    /// Higher value is dequeued first.
    pub priority: i64,
    /// Number of retries consumed so far.
    pub retry_count: i32,
    /// Retry budget. Once retry_count reaches this, the next failure is terminal.
    pub max_retries: i32,
    /// When the job was enqueued (Unix millis).
    pub created_at: i64,
    /// When processing last started (Unix millis).
    pub started_at: Option<i64>,
    /// When the job completed (Unix millis). Written once.
    pub completed_at: Option<i64>,
    /// When the job permanently failed (Unix millis). Written once.
    pub failed_at: Option<i64>,
    /// Last failure description. Cleared on success, annotated on retry.
    pub error: Option<String>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        id: String,
        notebook_id: String,
        document_id: String,
        content: Vec<u8>,
        priority: i64,
        max_retries: i32,
    ) -> Self {
        Self {
            id,
            notebook_id,
            document_id,
            content,
            status: JobStatus::Queued,
            priority,
            retry_count: 0,
            max_retries,
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }

    /// Returns true if the retry budget is exhausted.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Per-status job counts, optionally scoped to a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Ground-truth document status reported by a [`StatusVerifier`].
///
/// Anything other than `Completed` or `Failed` after processing means the
/// underlying work did not verifiably finish and is treated as a failure.
///
/// [`StatusVerifier`]: super::worker::StatusVerifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Completed,
    Failed,
    Processing,
    Other(String),
}

impl DocumentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            "processing" => DocumentStatus::Processing,
            other => DocumentStatus::Other(other.to_string()),
        }
    }
}

/// Result of checking a document's real outcome after processing.
#[derive(Debug, Clone)]
pub struct Verification {
    pub status: DocumentStatus,
    pub error: Option<String>,
}

impl Verification {
    pub fn completed() -> Self {
        Self {
            status: DocumentStatus::Completed,
            error: None,
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            status: DocumentStatus::Failed,
            error: Some(error.into()),
        }
    }
}
