//! Builder factories
//!
//! A factory hands scanners `BuilderVitals` snapshots. The prefetched
//! factory loads every builder and its current job in one bulk read per
//! manager tick and serves all scanners from that cache, so a tick costs
//! one query instead of one per builder.

use async_trait::async_trait;
use buildd_core::domain::builder::{Builder, BuilderVitals};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::repository::{BuilderRepository, StoreResult};

#[async_trait]
pub trait BuilderFactory: Send + Sync {
    /// Refresh cached vitals; called once per manager tick, never mid-scan
    async fn update(&self) -> StoreResult<()>;

    /// Hook run by the manager before it lets scans proceed
    async fn prescan_update(&self) -> StoreResult<()> {
        Ok(())
    }

    /// When the cache was last refreshed; `None` if it never was
    fn date_updated(&self) -> Option<DateTime<Utc>>;

    /// Uncached point lookup, for callers off the scan path
    async fn get(&self, name: &str) -> StoreResult<Option<Builder>>;

    async fn get_vitals(&self, name: &str) -> StoreResult<Option<BuilderVitals>>;

    /// Every known builder, ordered by name
    async fn iter_vitals(&self) -> StoreResult<Vec<BuilderVitals>>;
}

/// Factory that reads the registry on every call
///
/// Always up to date, so it never trips the scanner's staleness gate.
pub struct DirectBuilderFactory {
    builders: Arc<dyn BuilderRepository>,
    clock: Arc<dyn Clock>,
}

impl DirectBuilderFactory {
    pub fn new(builders: Arc<dyn BuilderRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { builders, clock }
    }
}

#[async_trait]
impl BuilderFactory for DirectBuilderFactory {
    async fn update(&self) -> StoreResult<()> {
        Ok(())
    }

    fn date_updated(&self) -> Option<DateTime<Utc>> {
        Some(self.clock.now())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<Builder>> {
        self.builders.find_by_name(name).await
    }

    async fn get_vitals(&self, name: &str) -> StoreResult<Option<BuilderVitals>> {
        let Some(builder) = self.builders.find_by_name(name).await? else {
            return Ok(None);
        };
        let job = self.builders.current_job(name).await?;
        Ok(Some(BuilderVitals::from_builder(&builder, job)))
    }

    async fn iter_vitals(&self) -> StoreResult<Vec<BuilderVitals>> {
        Ok(self
            .builders
            .list_with_jobs()
            .await?
            .into_iter()
            .map(|(builder, job)| BuilderVitals::from_builder(&builder, job))
            .collect())
    }
}

#[derive(Default)]
struct VitalsCache {
    vitals: BTreeMap<String, BuilderVitals>,
    date_updated: Option<DateTime<Utc>>,
}

/// Factory serving vitals from a cache refreshed by `update()`
pub struct PrefetchedBuilderFactory {
    builders: Arc<dyn BuilderRepository>,
    clock: Arc<dyn Clock>,
    cache: RwLock<VitalsCache>,
}

impl PrefetchedBuilderFactory {
    pub fn new(builders: Arc<dyn BuilderRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            builders,
            clock,
            cache: RwLock::new(VitalsCache::default()),
        }
    }
}

#[async_trait]
impl BuilderFactory for PrefetchedBuilderFactory {
    async fn update(&self) -> StoreResult<()> {
        let rows = self.builders.list_with_jobs().await?;
        let vitals: BTreeMap<String, BuilderVitals> = rows
            .into_iter()
            .map(|(builder, job)| {
                (
                    builder.name.clone(),
                    BuilderVitals::from_builder(&builder, job),
                )
            })
            .collect();

        debug!("Builder factory refreshed {} builders", vitals.len());

        // Swap in the new snapshot whole so no reader sees a half-updated tick
        let mut cache = self.cache.write();
        cache.vitals = vitals;
        cache.date_updated = Some(self.clock.now());
        Ok(())
    }

    fn date_updated(&self) -> Option<DateTime<Utc>> {
        self.cache.read().date_updated
    }

    async fn get(&self, name: &str) -> StoreResult<Option<Builder>> {
        self.builders.find_by_name(name).await
    }

    async fn get_vitals(&self, name: &str) -> StoreResult<Option<BuilderVitals>> {
        Ok(self.cache.read().vitals.get(name).cloned())
    }

    async fn iter_vitals(&self) -> StoreResult<Vec<BuilderVitals>> {
        Ok(self.cache.read().vitals.values().cloned().collect())
    }
}
