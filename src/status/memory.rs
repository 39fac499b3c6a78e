use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{RunSnapshot, StageRecord, StageStatus, StatusError, StatusStore};
use crate::run::RunId;

struct StageSlot {
    name: String,
    record: Mutex<StageRecord>,
}

struct RunEntry {
    stages: Vec<StageSlot>,
    last_update: Mutex<Instant>,
}

impl RunEntry {
    fn slot(&self, stage: &str) -> Option<&StageSlot> {
        self.stages.iter().find(|slot| slot.name == stage)
    }

    fn is_finished(&self) -> bool {
        self.stages
            .iter()
            .all(|slot| lock(&slot.record).status.is_terminal())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local status store.
///
/// The run map sits behind a `RwLock` that is only held long enough to
/// look up or insert a run. Each stage has its own `Mutex`, so concurrent
/// updates to different stages of one run never wait on each other.
pub struct InMemoryStatusStore {
    runs: RwLock<HashMap<RunId, Arc<RunEntry>>>,
    ttl: Option<Duration>,
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStatusStore {
    /// A store that keeps runs for the life of the process.
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// A store whose finished runs become purgeable `ttl` after their last update.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Number of runs currently tracked.
    pub fn len(&self) -> usize {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop finished runs whose last update is older than the TTL.
    /// Runs with any stage still pending or running are always kept.
    /// Returns how many runs were removed.
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let before = runs.len();
        runs.retain(|_, entry| !(entry.is_finished() && lock(&entry.last_update).elapsed() >= ttl));
        let purged = before - runs.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = runs.len(), "purged expired runs");
        }
        purged
    }

    fn entry(&self, run_id: &RunId) -> Option<Arc<RunEntry>> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create(&self, run_id: &RunId, stages: &[&str]) -> Result<(), StatusError> {
        if stages.is_empty() {
            return Err(StatusError::InvalidStages("a run needs at least one stage".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = stages.iter().find(|stage| !seen.insert(**stage)) {
            return Err(StatusError::InvalidStages(format!("duplicate stage {dup}")));
        }

        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(run_id) {
            return Err(StatusError::DuplicateRun {
                run_id: run_id.clone(),
            });
        }

        let entry = RunEntry {
            stages: stages
                .iter()
                .map(|name| StageSlot {
                    name: name.to_string(),
                    record: Mutex::new(StageRecord::pending()),
                })
                .collect(),
            last_update: Mutex::new(Instant::now()),
        };
        runs.insert(run_id.clone(), Arc::new(entry));
        tracing::debug!(run_id = %run_id, stages = stages.len(), "run created");
        Ok(())
    }

    async fn update(
        &self,
        run_id: &RunId,
        stage: &str,
        status: StageStatus,
        result: Option<String>,
    ) -> Result<(), StatusError> {
        let Some(entry) = self.entry(run_id) else {
            tracing::warn!(run_id = %run_id, stage, %status, "status update for unknown run ignored");
            return Ok(());
        };
        let Some(slot) = entry.slot(stage) else {
            tracing::warn!(run_id = %run_id, stage, %status, "status update for unknown stage ignored");
            return Ok(());
        };

        {
            let mut record = lock(&slot.record);
            if !record.status.can_transition_to(status) {
                return Err(StatusError::InvalidTransition {
                    run_id: run_id.clone(),
                    stage: stage.to_string(),
                    from: record.status,
                    to: status,
                });
            }
            *record = StageRecord { status, result };
        }
        *lock(&entry.last_update) = Instant::now();

        tracing::debug!(run_id = %run_id, stage, %status, "stage updated");
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunSnapshot>, StatusError> {
        let Some(entry) = self.entry(run_id) else {
            return Ok(None);
        };
        let stages = entry
            .stages
            .iter()
            .map(|slot| (slot.name.clone(), lock(&slot.record).clone()))
            .collect();
        Ok(Some(RunSnapshot::new(stages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_without_ttl_is_noop() {
        let store = InMemoryStatusStore::new();
        let id = RunId::from("r");
        store.create(&id, &["only"]).await.unwrap();
        store
            .update(&id, "only", StageStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn purge_keeps_unfinished_runs() {
        let store = InMemoryStatusStore::with_ttl(Duration::ZERO);
        let done = RunId::from("done");
        let busy = RunId::from("busy");
        store.create(&done, &["s"]).await.unwrap();
        store.create(&busy, &["s"]).await.unwrap();
        store
            .update(&done, "s", StageStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        store
            .update(&busy, "s", StageStatus::Running, None)
            .await
            .unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert!(store.get(&done).await.unwrap().is_none());
        assert!(store.get(&busy).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_respects_ttl_window() {
        let store = InMemoryStatusStore::with_ttl(Duration::from_secs(3600));
        let id = RunId::from("fresh");
        store.create(&id, &["s"]).await.unwrap();
        store
            .update(&id, "s", StageStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(store.purge_expired(), 0);
        assert!(!store.is_empty());
    }
}
