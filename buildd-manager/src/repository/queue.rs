//! Build Queue Repository
//!
//! Handles all database operations related to queued build jobs.

use buildd_core::domain::job::{BuildQueue, BuildStatus, FileRef, JobKind};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::builder::to_count;

const COLUMNS: &str = r#"
    id, build_id, kind, title, status, builder, lastscore, virtualized, processor,
    requested_at, date_started, logtail, failure_count, chroot, files, args
"#;

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<BuildQueue>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM build_queue WHERE id = $1",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_job()))
}

/// Find the job held by a builder
pub async fn find_by_builder(
    pool: &PgPool,
    builder: &str,
) -> Result<Option<BuildQueue>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM build_queue WHERE builder = $1",
        COLUMNS
    ))
    .bind(builder)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_job()))
}

/// List every job currently held by some builder
pub async fn list_assigned<'e, E>(executor: E) -> Result<Vec<BuildQueue>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {} FROM build_queue WHERE builder IS NOT NULL",
        COLUMNS
    ))
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.into_job()).collect())
}

/// Find the best pending job matching a builder's constraints
pub async fn find_candidate(
    pool: &PgPool,
    virtualized: bool,
    processors: &[String],
) -> Result<Option<BuildQueue>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {} FROM build_queue
        WHERE status = 'NEEDSBUILD'
          AND builder IS NULL
          AND virtualized = $1
          AND (processor IS NULL OR cardinality($2::text[]) = 0 OR processor = ANY($2))
        ORDER BY lastscore DESC, requested_at ASC
        LIMIT 1
        "#,
        COLUMNS
    ))
    .bind(virtualized)
    .bind(processors)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_job()))
}

/// Claim a pending job for a builder; false if it was no longer pending
pub async fn update_to_building(
    pool: &PgPool,
    id: Uuid,
    builder: &str,
    started: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE build_queue
        SET status = 'BUILDING', builder = $1, date_started = $2, logtail = NULL
        WHERE id = $3 AND builder IS NULL AND status = 'NEEDSBUILD'
        "#,
    )
    .bind(builder)
    .bind(started)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Return a job to the queue, or finish its cancellation if one was requested
pub async fn reset(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE build_queue
        SET status = CASE WHEN status = 'CANCELLING' THEN 'CANCELLED' ELSE 'NEEDSBUILD' END,
            date_started = CASE WHEN status = 'CANCELLING' THEN date_started ELSE NULL END,
            builder = NULL,
            logtail = NULL
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn update_logtail(pool: &PgPool, id: Uuid, logtail: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE build_queue SET logtail = $1 WHERE id = $2")
        .bind(logtail)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Increment the job's failure count; returns the new count, or None if unknown
pub async fn increment_failure_count(pool: &PgPool, id: Uuid) -> Result<Option<u32>, sqlx::Error> {
    let count: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE build_queue
        SET failure_count = failure_count + 1
        WHERE id = $1
        RETURNING failure_count
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(count.map(to_count))
}

/// Set a job's status; terminal statuses also release its builder
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: BuildStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE build_queue
        SET status = $1,
            builder = CASE WHEN $2 THEN NULL ELSE builder END
        WHERE id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(status.is_terminal())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    build_id: Uuid,
    kind: String,
    title: String,
    status: String,
    builder: Option<String>,
    lastscore: i32,
    virtualized: bool,
    processor: Option<String>,
    requested_at: DateTime<Utc>,
    date_started: Option<DateTime<Utc>>,
    logtail: Option<String>,
    failure_count: i32,
    chroot: serde_json::Value,
    files: serde_json::Value,
    args: serde_json::Value,
}

impl JobRow {
    /// Rows that do not decode are skipped rather than guessed at
    fn into_job(self) -> Option<BuildQueue> {
        let Some(kind) = JobKind::parse(&self.kind) else {
            tracing::warn!("Skipping build_queue row {} with unknown kind {}", self.id, self.kind);
            return None;
        };
        let Some(status) = BuildStatus::parse(&self.status) else {
            tracing::warn!(
                "Skipping build_queue row {} with unknown status {}",
                self.id, self.status
            );
            return None;
        };

        let id = self.id;
        let chroot: Option<FileRef> = serde_json::from_value(self.chroot)
            .map_err(|e| warn_corrupt(id, "chroot", &e))
            .ok()?;
        let files: HashMap<String, FileRef> = serde_json::from_value(self.files)
            .map_err(|e| warn_corrupt(id, "files", &e))
            .ok()?;
        let args = serde_json::from_value(self.args)
            .map_err(|e| warn_corrupt(id, "args", &e))
            .ok()?;

        Some(BuildQueue {
            id: self.id,
            build_id: self.build_id,
            kind,
            title: self.title,
            status,
            builder: self.builder,
            lastscore: self.lastscore,
            virtualized: self.virtualized,
            processor: self.processor,
            requested_at: self.requested_at,
            date_started: self.date_started,
            logtail: self.logtail,
            failure_count: to_count(self.failure_count),
            chroot,
            files,
            args,
        })
    }
}

fn warn_corrupt(id: Uuid, column: &str, error: &serde_json::Error) {
    tracing::warn!("Skipping build_queue row {} with corrupt {}: {}", id, column, error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> JobRow {
        JobRow {
            id: Uuid::new_v4(),
            build_id: Uuid::new_v4(),
            kind: "PACKAGEBUILD".into(),
            title: "hello_1.0".into(),
            status: "BUILDING".into(),
            builder: Some("bob".into()),
            lastscore: 10,
            virtualized: false,
            processor: Some("amd64".into()),
            requested_at: Utc::now(),
            date_started: Some(Utc::now()),
            logtail: None,
            failure_count: 2,
            chroot: json!({"sha1": "c0ffee", "url": "http://librarian/chroot.tar.gz"}),
            files: json!({"hello_1.0.dsc": {"sha1": "d5c", "url": "http://librarian/hello_1.0.dsc"}}),
            args: json!({"suite": "noble"}),
        }
    }

    #[test]
    fn test_row_decodes() {
        let job = row().into_job().unwrap();
        assert_eq!(job.kind, JobKind::BinaryPackageBuild);
        assert_eq!(job.status, BuildStatus::Building);
        assert_eq!(job.failure_count, 2);
        assert_eq!(job.chroot.unwrap().sha1, "c0ffee");
        assert!(job.files.contains_key("hello_1.0.dsc"));
        assert_eq!(job.args["suite"], json!("noble"));
    }

    #[test]
    fn test_unknown_status_is_skipped() {
        // Must not come back as NEEDSBUILD and be dispatched again
        let mut row = row();
        row.status = "SUPERSEDED".into();
        assert!(row.into_job().is_none());
    }

    #[test]
    fn test_corrupt_json_is_skipped() {
        let mut bad_files = row();
        bad_files.files = json!(["not", "a", "map"]);
        assert!(bad_files.into_job().is_none());

        let mut bad_chroot = row();
        bad_chroot.chroot = json!({"url": 7});
        assert!(bad_chroot.into_job().is_none());

        let mut no_chroot = row();
        no_chroot.chroot = serde_json::Value::Null;
        assert!(no_chroot.into_job().unwrap().chroot.is_none());
    }
}
