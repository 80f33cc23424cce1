//! Builder Repository
//!
//! Handles all database operations related to builders.

use buildd_core::domain::builder::Builder;
use sqlx::PgPool;

/// Find a builder by name
pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Builder>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuilderRow>(
        r#"
        SELECT name, url, processors, virtualized, vm_host, builderok, manual,
               failure_count, failnotes
        FROM builders
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all builders
pub async fn list_all<'e, E>(executor: E) -> Result<Vec<Builder>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, BuilderRow>(
        r#"
        SELECT name, url, processors, virtualized, vm_host, builderok, manual,
               failure_count, failnotes
        FROM builders
        ORDER BY name ASC
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Increment the failure count; returns the new count, or None if unknown
pub async fn increment_failure_count(
    pool: &PgPool,
    name: &str,
) -> Result<Option<u32>, sqlx::Error> {
    let count: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE builders
        SET failure_count = failure_count + 1
        WHERE name = $1
        RETURNING failure_count
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(count.map(to_count))
}

/// Reset the failure count to zero
pub async fn reset_failure_count(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE builders SET failure_count = 0 WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Disable a builder, recording the reason
pub async fn fail(pool: &PgPool, name: &str, notes: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE builders
        SET builderok = FALSE, failnotes = $1
        WHERE name = $2
        "#,
    )
    .bind(notes)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) fn to_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuilderRow {
    name: String,
    url: String,
    processors: Vec<String>,
    virtualized: bool,
    vm_host: Option<String>,
    builderok: bool,
    manual: bool,
    failure_count: i32,
    failnotes: Option<String>,
}

impl From<BuilderRow> for Builder {
    fn from(row: BuilderRow) -> Self {
        Builder {
            name: row.name,
            url: row.url,
            processors: row.processors,
            virtualized: row.virtualized,
            vm_host: row.vm_host,
            builderok: row.builderok,
            manual: row.manual,
            failure_count: to_count(row.failure_count),
            failnotes: row.failnotes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        assert_eq!(to_count(-3), 0);
        assert_eq!(to_count(4), 4);
    }
}
