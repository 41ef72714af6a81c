//! Durable SQLite-backed task queue for document ingestion.
//!
//! The queue decouples accepting a document from processing it: uploads
//! enqueue a job and return immediately, a single background worker drains
//! the queue, and every state transition is persisted so a crash at any
//! point leaves the system recoverable.

pub mod config;
pub mod document_queue;
pub mod sqlite_persistence;

pub use config::{QueueSettings, RecoverySettings, WorkerSettings};
pub use document_queue::{
    DocumentLedger, DocumentProcessor, DocumentStatus, Job, JobStatus, LedgerEntry,
    LedgerReconciler, QueueManager, QueueStats, QueueWorker, SqliteJobStore, StatusVerifier,
    StuckJobWatchdog, Verification,
};
