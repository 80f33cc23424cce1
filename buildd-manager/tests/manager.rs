mod common;

use buildd_core::domain::builder::Builder;
use buildd_manager::clock::SystemClock;
use buildd_manager::factory::PrefetchedBuilderFactory;
use buildd_manager::repository::MemoryStore;
use buildd_manager::worker::FakeWorkerFactory;
use buildd_manager::{BuilddManager, ManagerSettings, ScannerSettings};
use common::package_job;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        scanner: ScannerSettings {
            scan_interval: Duration::from_millis(20),
            scan_jitter: 0.0,
            ..ScannerSettings::default()
        },
        update_interval: Duration::from_millis(10),
        new_builders_interval: Duration::from_millis(20),
    }
}

fn manager(store: &Arc<MemoryStore>, workers: &Arc<FakeWorkerFactory>) -> BuilddManager {
    let clock = Arc::new(SystemClock);
    BuilddManager::new(
        Arc::new(PrefetchedBuilderFactory::new(store.clone(), clock.clone())),
        workers.clone(),
        buildd_manager::repository::Repositories::from_store(store.clone()),
        clock,
        fast_settings(),
    )
}

/// Poll until `check` holds, giving up after two seconds
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

fn assigned_to(store: &MemoryStore, id: Uuid) -> Option<String> {
    store.job(id).and_then(|job| job.builder)
}

#[tokio::test]
async fn test_hanging_worker_does_not_block_others() {
    let store = Arc::new(MemoryStore::new());
    let workers = Arc::new(FakeWorkerFactory::new());
    store.add_builder(Builder::new("alice", "http://alice:8221"));
    store.add_builder(Builder::new("bob", "http://bob:8221"));
    workers.worker("alice").set_hang(true);
    let id = store.add_job(package_job("hello_1.0"));

    let manager = manager(&store, &workers);
    manager.start().await;

    assert!(eventually(|| assigned_to(&store, id).as_deref() == Some("bob")).await);

    // alice's scanner is stuck in a status call and must still stop
    let stopped = tokio::time::timeout(Duration::from_secs(1), manager.stop()).await;
    assert!(stopped.is_ok());
}

#[tokio::test]
async fn test_new_builders_get_scanners() {
    let store = Arc::new(MemoryStore::new());
    let workers = Arc::new(FakeWorkerFactory::new());
    store.add_builder(Builder::new("bob", "http://bob:8221"));

    let manager = manager(&store, &workers);
    manager.start().await;
    assert_eq!(manager.scanned_builders(), vec!["bob"]);

    store.add_builder(Builder::new("frog", "http://frog:8221"));
    let id = store.add_job(package_job("hello_1.0"));
    workers.worker("bob").set_refuse_build(true);

    assert!(eventually(|| manager.scanned_builders() == vec!["bob", "frog"]).await);
    assert!(eventually(|| assigned_to(&store, id).as_deref() == Some("frog")).await);

    manager.stop().await;
}

#[tokio::test]
async fn test_no_scans_after_stop() {
    let store = Arc::new(MemoryStore::new());
    let workers = Arc::new(FakeWorkerFactory::new());
    store.add_builder(Builder::new("bob", "http://bob:8221"));
    let bob = workers.worker("bob");

    let manager = manager(&store, &workers);
    manager.start().await;
    assert!(eventually(|| bob.call_count("status") >= 2).await);

    manager.stop().await;
    let calls = bob.calls().len();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(bob.calls().len(), calls);
    assert!(manager.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn test_removed_builder_is_rediscovered_when_it_returns() {
    let store = Arc::new(MemoryStore::new());
    let workers = Arc::new(FakeWorkerFactory::new());
    store.add_builder(Builder::new("bob", "http://bob:8221"));
    store.add_builder(Builder::new("frog", "http://frog:8221"));

    let manager = manager(&store, &workers);
    manager.start().await;
    assert_eq!(manager.scanned_builders(), vec!["bob", "frog"]);

    store.remove_builder("frog");
    assert!(eventually(|| manager.scanned_builders() == vec!["bob"]).await);

    store.add_builder(Builder::new("frog", "http://frog:8221"));
    let id = store.add_job(package_job("hello_1.0"));
    workers.worker("bob").set_refuse_build(true);
    assert!(eventually(|| manager.scanned_builders() == vec!["bob", "frog"]).await);
    assert!(eventually(|| assigned_to(&store, id).as_deref() == Some("frog")).await);

    manager.stop().await;
}
