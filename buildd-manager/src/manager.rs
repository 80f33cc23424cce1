//! Top-level coordination
//!
//! `BuilddManager` owns one scanner task per builder, a loop refreshing the
//! builder factory, and a `NewBuildersScanner` loop that starts scanners
//! for builders registered after startup.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::ScanResult;
use crate::factory::BuilderFactory;
use crate::repository::Repositories;
use crate::scanner::{ScannerSettings, WorkerScanner};
use crate::worker::WorkerFactory;

/// Intervals of the manager's own loops, plus the scanners' settings
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub scanner: ScannerSettings,
    pub update_interval: Duration,
    pub new_builders_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            scanner: ScannerSettings::default(),
            update_interval: Duration::from_secs(15),
            new_builders_interval: Duration::from_secs(300),
        }
    }
}

/// Finds builders that have no scanner yet
pub struct NewBuildersScanner {
    factory: Arc<dyn BuilderFactory>,
    current_builders: HashSet<String>,
}

impl NewBuildersScanner {
    pub fn new(
        factory: Arc<dyn BuilderFactory>,
        current_builders: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            factory,
            current_builders: current_builders.into_iter().collect(),
        }
    }

    /// Names of builders not seen before, now remembered as seen
    pub async fn check_for_new_builders(&mut self) -> ScanResult<Vec<String>> {
        let mut new_builders: Vec<String> = self
            .factory
            .iter_vitals()
            .await?
            .into_iter()
            .map(|vitals| vitals.name)
            .filter(|name| !self.current_builders.contains(name))
            .collect();
        new_builders.sort();
        new_builders.dedup();

        self.current_builders.extend(new_builders.iter().cloned());
        Ok(new_builders)
    }

    /// Forget builders whose scanner has stopped, so they are found again
    /// if they come back
    pub fn retain_builders(&mut self, keep: impl Fn(&str) -> bool) {
        self.current_builders.retain(|name| keep(name));
    }
}

struct Shared {
    factory: Arc<dyn BuilderFactory>,
    workers: Arc<dyn WorkerFactory>,
    repos: Repositories,
    clock: Arc<dyn Clock>,
    settings: ManagerSettings,
    shutdown: CancellationToken,
    scanning: Mutex<HashSet<String>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns every scanning loop of the process
#[derive(Clone)]
pub struct BuilddManager {
    shared: Arc<Shared>,
}

impl BuilddManager {
    pub fn new(
        factory: Arc<dyn BuilderFactory>,
        workers: Arc<dyn WorkerFactory>,
        repos: Repositories,
        clock: Arc<dyn Clock>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                workers,
                repos,
                clock,
                settings,
                shutdown: CancellationToken::new(),
                scanning: Mutex::new(HashSet::new()),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Token cancelled when the manager stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Load the farm, start a scanner per builder and the manager's loops
    pub async fn start(&self) {
        info!("Starting build manager");
        self.update().await;

        let builders = match self.shared.factory.iter_vitals().await {
            Ok(vitals) => vitals.into_iter().map(|v| v.name).collect(),
            Err(e) => {
                warn!("Could not list builders at startup: {}", e);
                Vec::new()
            }
        };

        let new_builders = NewBuildersScanner::new(self.shared.factory.clone(), builders.clone());
        self.add_scan_for_builders(builders);

        let update_loop = tokio::spawn(self.clone().run_update_loop());
        let discovery_loop = tokio::spawn(self.clone().run_new_builders_loop(new_builders));
        self.shared
            .handles
            .lock()
            .extend([update_loop, discovery_loop]);
    }

    /// Start a scanner for every named builder that has none
    pub fn add_scan_for_builders(&self, names: impl IntoIterator<Item = String>) {
        for name in names {
            if !self.shared.scanning.lock().insert(name.clone()) {
                continue;
            }

            info!("Scanning for build jobs on {}", name);
            let scanner = WorkerScanner::new(
                name.clone(),
                self.shared.factory.clone(),
                self.shared.workers.clone(),
                self.shared.repos.clone(),
                self.shared.clock.clone(),
                self.shared.settings.scanner,
            );
            let shared = self.shared.clone();
            let handle = tokio::spawn(async move {
                scanner.run(shared.shutdown.clone()).await;
                shared.scanning.lock().remove(&name);
            });
            let mut handles = self.shared.handles.lock();
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    /// Refresh the builder factory
    pub async fn update(&self) {
        if let Err(e) = self.shared.factory.update().await {
            warn!("Failed to update builder factory: {}", e);
            return;
        }
        if let Err(e) = self.shared.factory.prescan_update().await {
            warn!("Builder factory prescan update failed: {}", e);
        }
    }

    /// Names of builders with a running scanner, sorted
    pub fn scanned_builders(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.scanning.lock().iter().cloned().collect();
        names.sort();
        names
    }

    /// Stop every loop and wait for them to finish
    pub async fn stop(&self) {
        info!("Stopping build manager");
        self.shared.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Scanning task ended abnormally: {}", e);
            }
        }
        info!("Build manager stopped");
    }

    async fn run_update_loop(self) {
        let shutdown = self.shared.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.shared.settings.update_interval) => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.update() => {}
            }
        }
        debug!("Factory update loop stopped");
    }

    async fn run_new_builders_loop(self, mut scanner: NewBuildersScanner) {
        let shutdown = self.shared.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.shared.settings.new_builders_interval) => {}
            }
            {
                let scanning = self.shared.scanning.lock();
                scanner.retain_builders(|name| scanning.contains(name));
            }
            match scanner.check_for_new_builders().await {
                Ok(names) if !names.is_empty() => {
                    info!("Found new builders: {}", names.join(", "));
                    self.add_scan_for_builders(names);
                }
                Ok(_) => debug!("No new builders"),
                Err(e) => warn!("Checking for new builders failed: {}", e),
            }
        }
        debug!("New builders loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::factory::PrefetchedBuilderFactory;
    use crate::repository::MemoryStore;
    use buildd_core::domain::builder::Builder;

    #[tokio::test]
    async fn test_new_builders_reported_once() {
        let store = Arc::new(MemoryStore::new());
        store.add_builder(Builder::new("bob", "http://bob:8221"));
        let factory = Arc::new(PrefetchedBuilderFactory::new(
            store.clone(),
            Arc::new(FakeClock::new()),
        ));
        factory.update().await.unwrap();

        let mut scanner = NewBuildersScanner::new(factory.clone(), vec!["bob".to_string()]);
        assert!(scanner.check_for_new_builders().await.unwrap().is_empty());

        store.add_builder(Builder::new("frog", "http://frog:8221"));
        store.add_builder(Builder::new("alice", "http://alice:8221"));
        // Not visible until the factory refreshes
        assert!(scanner.check_for_new_builders().await.unwrap().is_empty());

        factory.update().await.unwrap();
        assert_eq!(
            scanner.check_for_new_builders().await.unwrap(),
            vec!["alice", "frog"]
        );
        assert!(scanner.check_for_new_builders().await.unwrap().is_empty());
    }
}
