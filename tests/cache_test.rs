use std::sync::Arc;

use augur::cache::memory::MemoryReportCache;
use augur::cache::sqlite::SqliteReportCache;
use augur::cache::{Fingerprint, ReportCache};
use augur::report::{BranchOutcome, FinalReport};

fn report(text: &str) -> FinalReport {
    FinalReport {
        extracted_text: text.to_string(),
        linguistic_analysis: BranchOutcome::Text(format!("linguistics of {text}")),
        argumentative_analysis: BranchOutcome::Failed {
            error: "timeout".to_string(),
        },
    }
}

async fn assert_get_put_contract(cache: &dyn ReportCache) {
    let key = Fingerprint::of_submission(b"image", "topic", None);
    assert!(cache.get(&key).await.unwrap().is_none());

    cache.put(&key, report("first")).await.unwrap();
    cache.put(&key, report("first")).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(report("first")));

    cache.put(&key, report("second")).await.unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(report("second")));

    let other = Fingerprint::of_submission(b"image", "another topic", None);
    assert!(cache.get(&other).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_cache_honors_contract() {
    let cache = MemoryReportCache::unbounded();
    assert_get_put_contract(&cache).await;
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn bounded_memory_cache_honors_contract() {
    let cache = MemoryReportCache::bounded(8);
    assert_eq!(cache.capacity(), Some(8));
    assert_get_put_contract(&cache).await;
}

#[tokio::test]
async fn bounded_memory_cache_stays_near_capacity() {
    let cache = MemoryReportCache::bounded(4);
    for i in 0..64 {
        let key = Fingerprint::of_bytes(format!("image-{i}").as_bytes());
        cache.put(&key, report(&i.to_string())).await.unwrap();
    }
    assert!(cache.len() <= 4);
}

#[tokio::test]
async fn sqlite_cache_honors_contract() {
    let cache = SqliteReportCache::in_memory().unwrap();
    assert_get_put_contract(&cache).await;
    assert_eq!(cache.len().unwrap(), 1);
}

#[tokio::test]
async fn sqlite_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports.db");
    let path = path.to_str().unwrap();
    let key = Fingerprint::of_bytes(b"essay.png");

    {
        let cache = SqliteReportCache::open(path).unwrap();
        cache.put(&key, report("persisted")).await.unwrap();
    }

    let reopened = SqliteReportCache::open(path).unwrap();
    assert_eq!(reopened.get(&key).await.unwrap(), Some(report("persisted")));
    assert!(!reopened.is_empty().unwrap());
}

#[tokio::test]
async fn failed_branch_round_trips_through_sqlite() {
    let cache = SqliteReportCache::in_memory().unwrap();
    let key = Fingerprint::of_bytes(b"x");
    cache.put(&key, report("x")).await.unwrap();

    let stored = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.argumentative_analysis.error(), Some("timeout"));
    assert!(!stored.is_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_are_safe() {
    let cache: Arc<dyn ReportCache> = Arc::new(MemoryReportCache::unbounded());
    let key = Fingerprint::of_bytes(b"shared");

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move { cache.put(&key, report(&format!("w{i}"))).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = cache.get(&key).await.unwrap().unwrap();
    assert!(stored.extracted_text.starts_with('w'));
}

#[test]
fn fingerprint_depends_on_every_field() {
    let base = Fingerprint::of_submission(b"img", "topic", None);
    assert_eq!(base, Fingerprint::of_submission(b"img", "topic", None));
    assert_ne!(base, Fingerprint::of_submission(b"img2", "topic", None));
    assert_ne!(base, Fingerprint::of_submission(b"img", "topic2", None));
    assert_ne!(base, Fingerprint::of_submission(b"img", "topic", Some("")));
    assert_ne!(
        Fingerprint::of_submission(b"ab", "c", None),
        Fingerprint::of_submission(b"a", "bc", None)
    );
}
