//! Database schema for document_queue.db.
//!
//! Defines versioned schema migrations for the job queue database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Job queue table
const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("notebook_id", &SqlType::Text, non_null = true),
        sqlite_column!("document_id", &SqlType::Text, non_null = true),
        sqlite_column!("content", &SqlType::Blob, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'queued'")
        ),
        sqlite_column!("priority", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("retry_count", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("max_retries", &SqlType::Integer, default_value = Some("2")),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!("failed_at", &SqlType::Integer),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_status", "status"),
        ("idx_jobs_notebook", "notebook_id"),
        ("idx_jobs_created", "created_at"),
    ],
};

pub const JOB_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V1],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();

        let schema = &JOB_QUEUE_VERSIONED_SCHEMAS[0];
        schema.create(&conn).expect("Schema should create");
        schema.validate(&conn).expect("Schema should validate");
    }

    #[test]
    fn test_jobs_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        JOB_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_indexes_exist() {
        let conn = Connection::open_in_memory().unwrap();
        JOB_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
            )
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_jobs_status".to_string()));
        assert!(indexes.contains(&"idx_jobs_notebook".to_string()));
        assert!(indexes.contains(&"idx_jobs_created".to_string()));
    }

    #[test]
    fn test_default_values() {
        let conn = Connection::open_in_memory().unwrap();
        JOB_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        // Insert with minimal required fields
        conn.execute(
            r#"INSERT INTO jobs (id, notebook_id, document_id, content, created_at)
               VALUES ('job-1', 'nb-1', 'doc-1', x'00', 1700000000000)"#,
            [],
        )
        .unwrap();

        let (status, priority, retry_count, max_retries): (String, i64, i32, i32) = conn
            .query_row(
                "SELECT status, priority, retry_count, max_retries FROM jobs WHERE id = 'job-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        assert_eq!(status, "queued", "status should default to queued");
        assert_eq!(priority, 0, "priority should default to 0");
        assert_eq!(retry_count, 0, "retry_count should default to 0");
        assert_eq!(max_retries, 2, "max_retries should default to 2");
    }
}
