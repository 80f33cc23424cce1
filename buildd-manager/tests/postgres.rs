//! Postgres store against a live database
//!
//! Run with `BUILDD_TEST_DATABASE_URL` set and `--ignored`.

use buildd_core::domain::job::BuildStatus;
use buildd_manager::db;
use buildd_manager::repository::{BuilderRepository, PgStore, QueueRepository};
use sqlx::PgPool;
use uuid::Uuid;

async fn store() -> PgStore {
    let url = std::env::var("BUILDD_TEST_DATABASE_URL").expect("BUILDD_TEST_DATABASE_URL");
    let pool = db::create_pool(&url).await.expect("connect");
    db::run_migrations(&pool).await.expect("migrate");
    PgStore::new(pool)
}

async fn add_builder(pool: &PgPool, name: &str) {
    sqlx::query("INSERT INTO builders (name, url) VALUES ($1, $2)")
        .bind(name)
        .bind(format!("http://{}:8221", name))
        .execute(pool)
        .await
        .unwrap();
}

async fn add_job(pool: &PgPool, builder: &str, status: &str, files: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO build_queue (id, build_id, kind, title, status, builder, requested_at,
                                 date_started, chroot, files)
        VALUES ($1, $2, 'PACKAGEBUILD', 'hello_1.0', $3, $4, now(), now(),
                '{"sha1": "c0ffee", "url": "http://librarian/chroot.tar.gz"}'::jsonb, $5::jsonb)
        "#,
    )
    .bind(id)
    .bind(Uuid::new_v4())
    .bind(status)
    .bind(builder)
    .bind(files)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn cleanup(pool: &PgPool, builders: &[String], jobs: &[Uuid]) {
    sqlx::query("DELETE FROM build_queue WHERE id = ANY($1)")
        .bind(jobs)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM builders WHERE name = ANY($1)")
        .bind(builders)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "needs BUILDD_TEST_DATABASE_URL"]
async fn test_snapshot_pairs_builders_with_jobs() {
    let store = store().await;
    let pool = store.pool().clone();
    let suffix = Uuid::new_v4().simple().to_string();
    let (bob, frog, corrupt) = (
        format!("bob-{}", suffix),
        format!("frog-{}", suffix),
        format!("corrupt-{}", suffix),
    );
    for name in [&bob, &frog, &corrupt] {
        add_builder(&pool, name).await;
    }
    let job = add_job(&pool, &bob, "BUILDING", "{}").await;
    let broken = add_job(&pool, &corrupt, "BUILDING", r#"["not", "a", "map"]"#).await;

    let snapshot = store.list_with_jobs().await.unwrap();
    let held = |name: &str| {
        snapshot
            .iter()
            .find(|(builder, _)| builder.name == name)
            .map(|(_, job)| job.as_ref().map(|j| j.id))
    };

    assert_eq!(held(&bob), Some(Some(job)));
    assert_eq!(held(&frog), Some(None));
    // The corrupt row is skipped, not decoded with empty files
    assert_eq!(held(&corrupt), Some(None));

    cleanup(&pool, &[bob, frog, corrupt], &[job, broken]).await;
}

#[tokio::test]
#[ignore = "needs BUILDD_TEST_DATABASE_URL"]
async fn test_reset_finishes_cancellation() {
    let store = store().await;
    let pool = store.pool().clone();
    let bob = format!("bob-{}", Uuid::new_v4().simple());
    add_builder(&pool, &bob).await;
    let cancelling = add_job(&pool, &bob, "CANCELLING", "{}").await;

    store.reset(cancelling).await.unwrap();

    let job = store.find_by_id(cancelling).await.unwrap().unwrap();
    assert_eq!(job.status, BuildStatus::Cancelled);
    assert!(job.builder.is_none());
    assert!(job.date_started.is_some());

    let building = add_job(&pool, &bob, "BUILDING", "{}").await;
    store.reset(building).await.unwrap();

    let job = store.find_by_id(building).await.unwrap().unwrap();
    assert_eq!(job.status, BuildStatus::NeedsBuild);
    assert!(job.builder.is_none());
    assert!(job.date_started.is_none());

    cleanup(&pool, &[bob], &[cancelling, building]).await;
}
