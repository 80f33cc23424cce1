use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Builder registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builders (
            name VARCHAR(255) PRIMARY KEY,
            url TEXT NOT NULL,
            processors TEXT[] NOT NULL DEFAULT '{}',
            virtualized BOOLEAN NOT NULL DEFAULT FALSE,
            vm_host VARCHAR(255),
            builderok BOOLEAN NOT NULL DEFAULT TRUE,
            manual BOOLEAN NOT NULL DEFAULT FALSE,
            failure_count INTEGER NOT NULL DEFAULT 0,
            failnotes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Build queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_queue (
            id UUID PRIMARY KEY,
            build_id UUID NOT NULL,
            kind VARCHAR(50) NOT NULL,
            title TEXT NOT NULL,
            status VARCHAR(50) NOT NULL,
            builder VARCHAR(255) REFERENCES builders(name) ON DELETE SET NULL,
            lastscore INTEGER NOT NULL DEFAULT 0,
            virtualized BOOLEAN NOT NULL DEFAULT FALSE,
            processor VARCHAR(50),
            requested_at TIMESTAMPTZ NOT NULL,
            date_started TIMESTAMPTZ,
            logtail TEXT,
            failure_count INTEGER NOT NULL DEFAULT 0,
            chroot JSONB NOT NULL DEFAULT 'null',
            files JSONB NOT NULL DEFAULT '{}',
            args JSONB NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // A builder holds at most one job
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_build_queue_builder
        ON build_queue(builder) WHERE builder IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_build_queue_candidates
        ON build_queue(lastscore DESC, requested_at ASC) WHERE status = 'NEEDSBUILD'
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
