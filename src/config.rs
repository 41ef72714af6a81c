//! Configuration for the document queue.

use serde::{Deserialize, Serialize};

fn default_max_retries() -> i32 {
    2
}

fn default_cleanup_max_age_days() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_verify_timeout_secs() -> u64 {
    30
}

fn default_recovery_interval_secs() -> u64 {
    600
}

fn default_stuck_timeout_secs() -> u64 {
    600
}

/// Settings for the polling worker loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// How long to sleep when the queue is empty.
    pub poll_interval_ms: u64,
    /// Upper bound on a single post-processing verification check.
    pub verify_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            verify_timeout_secs: default_verify_timeout_secs(),
        }
    }
}

/// Settings for the periodic stuck-job watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// How often the watchdog scans for stuck jobs.
    pub interval_secs: u64,
    /// A processing job older than this is considered stuck.
    pub stuck_timeout_secs: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            interval_secs: default_recovery_interval_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
        }
    }
}

/// Top-level queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Retry budget for new jobs.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Terminal jobs older than this are eligible for cleanup.
    #[serde(default = "default_cleanup_max_age_days")]
    pub cleanup_max_age_days: u32,
    pub worker: WorkerSettings,
    pub recovery: RecoverySettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            cleanup_max_age_days: default_cleanup_max_age_days(),
            worker: WorkerSettings::default(),
            recovery: RecoverySettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.cleanup_max_age_days, 30);
        assert_eq!(settings.worker.poll_interval_ms, 1000);
        assert_eq!(settings.worker.verify_timeout_secs, 30);
        assert_eq!(settings.recovery.interval_secs, 600);
        assert_eq!(settings.recovery.stuck_timeout_secs, 600);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let settings: QueueSettings =
            serde_json::from_str(r#"{"max_retries": 5, "worker": {"poll_interval_ms": 50}}"#)
                .unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.worker.poll_interval_ms, 50);
        assert_eq!(settings.worker.verify_timeout_secs, 30);
        assert_eq!(settings.recovery.interval_secs, 600);
    }

    #[test]
    fn test_empty_object_deserializes() {
        let settings: QueueSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.max_retries, 2);
    }
}
