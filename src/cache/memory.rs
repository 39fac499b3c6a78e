use std::sync::Arc;

use async_trait::async_trait;
use mini_moka::sync::{Cache, ConcurrentCacheExt};

use super::{CacheError, Fingerprint, ReportCache};
use crate::report::FinalReport;

/// Process-local report cache.
///
/// Unbounded by default. With a capacity, `mini-moka` evicts the entries
/// least likely to be reused once the bound is reached. Eviction is applied
/// lazily, so the entry count may briefly exceed the bound.
pub struct MemoryReportCache {
    reports: Cache<Fingerprint, Arc<FinalReport>>,
    capacity: Option<u64>,
}

impl Default for MemoryReportCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MemoryReportCache {
    pub fn unbounded() -> Self {
        Self {
            reports: Cache::builder().build(),
            capacity: None,
        }
    }

    pub fn bounded(capacity: u64) -> Self {
        Self {
            reports: Cache::builder().max_capacity(capacity).build(),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    /// Number of cached reports after pending maintenance is applied.
    pub fn len(&self) -> u64 {
        self.reports.sync();
        self.reports.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReportCache for MemoryReportCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<FinalReport>, CacheError> {
        Ok(self
            .reports
            .get(fingerprint)
            .map(|report| report.as_ref().clone()))
    }

    async fn put(&self, fingerprint: &Fingerprint, report: FinalReport) -> Result<(), CacheError> {
        self.reports.insert(fingerprint.clone(), Arc::new(report));
        tracing::debug!(fingerprint = %fingerprint, "report cached in memory");
        Ok(())
    }
}
