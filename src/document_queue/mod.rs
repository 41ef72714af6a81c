//! Durable document ingestion queue.
//!
//! Jobs live in a SQLite database so the queue survives restarts. The usual
//! lifecycle:
//!
//! 1. A document upload calls [`QueueManager::enqueue`].
//! 2. The [`QueueWorker`] claims the job, runs the [`DocumentProcessor`],
//!    then confirms the outcome against the [`StatusVerifier`].
//! 3. Failures are retried up to the job's budget, then recorded as failed.
//!
//! At startup, [`QueueManager::recover_stuck_jobs`] requeues jobs abandoned
//! in `processing` by a crash, and the [`LedgerReconciler`] repairs
//! user-facing document statuses that disagree with the queue. While the
//! server runs, the [`StuckJobWatchdog`] catches jobs that hang without a
//! crash.

mod manager;
mod models;
mod reconcile;
mod recovery;
mod schema;
mod store;
mod worker;

pub use manager::QueueManager;
pub use models::{DocumentStatus, Job, JobStatus, QueueStats, Verification};
pub use reconcile::{DocumentLedger, LedgerEntry, LedgerReconciler, ReconcileError};
pub use recovery::StuckJobWatchdog;
pub use store::{JobStore, SqliteJobStore};
pub use worker::{DocumentProcessor, QueueWorker, StatusVerifier};
