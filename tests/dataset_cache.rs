mod common;

use std::sync::Arc;
use std::time::Duration;

use bessmon::{DatasetCache, DatasetError};
use common::{DataRoot, SOC, VOLTAGE, every};

fn seeded_root() -> DataRoot {
    let root = DataRoot::new();
    for device in ["DEV1", "DEV2"] {
        root.write(device, SOC, &every("2024-03-01 00:00:00", 1, 240));
        root.write(device, VOLTAGE, &every("2024-03-01 00:00:00", 3, 80));
    }
    root
}

#[tokio::test]
async fn repeated_lookups_return_the_same_dataset() {
    let root = seeded_root();
    let cache = DatasetCache::new(Arc::new(root.builder()));

    let first = cache.get_or_build("DEV1", None).await.expect("dataset");
    let second = cache.get_or_build("DEV1", None).await.expect("dataset");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.stats().builds(), 1);
    assert_eq!(cache.stats().misses(), 1);
    assert_eq!(cache.stats().hits(), 1);

    // Unparseable periods share the automatic entry.
    let fallback = cache.get_or_build("DEV1", Some("garbage")).await.expect("dataset");
    assert!(Arc::ptr_eq(&first, &fallback));
    assert_eq!(cache.stats().builds(), 1);
}

#[tokio::test]
async fn distinct_keys_build_distinct_datasets() {
    let root = seeded_root();
    let cache = DatasetCache::new(Arc::new(root.builder()));

    let auto = cache.get_or_build("DEV1", None).await.expect("dataset");
    let day = cache.get_or_build("DEV1", Some("2024-03-01")).await.expect("dataset");
    let other = cache.get_or_build("DEV2", None).await.expect("dataset");

    assert!(!Arc::ptr_eq(&auto, &day));
    assert!(!Arc::ptr_eq(&auto, &other));
    assert_eq!(other.device_id, "DEV2");
    assert_eq!(cache.stats().builds(), 3);
    assert_eq!(cache.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_build() {
    let root = seeded_root();
    let cache = Arc::new(DatasetCache::new(Arc::new(root.builder())));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.get_or_build("DEV1", Some("2024-03")).await
        }));
    }

    let mut datasets = Vec::new();
    for handle in handles {
        datasets.push(handle.await.expect("join").expect("dataset"));
    }
    assert_eq!(cache.stats().builds(), 1);
    for dataset in &datasets[1..] {
        assert!(Arc::ptr_eq(&datasets[0], dataset));
    }
}

#[tokio::test]
async fn unknown_devices_are_not_cached() {
    let root = seeded_root();
    let cache = DatasetCache::new(Arc::new(root.builder()));

    let err = cache.get_or_build("NOPE", None).await.expect_err("unknown");
    assert_eq!(err, DatasetError::DeviceNotFound("NOPE".into()));
    assert_eq!(cache.stats().builds(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn failed_builds_are_retried() {
    let root = seeded_root();
    let cache = DatasetCache::new(Arc::new(root.builder()));

    let err = cache
        .get_or_build("DEV1", Some("2025-01-01"))
        .await
        .expect_err("no data");
    assert_eq!(err, DatasetError::NoDataAvailable);
    assert!(cache.is_empty());
    assert_eq!(cache.tracked_keys(), 0);

    root.write("DEV1", SOC, &every("2025-01-01 00:00:00", 10, 12));
    let dataset = cache
        .get_or_build("DEV1", Some("2025-01-01"))
        .await
        .expect("dataset after retry");
    assert_eq!(dataset.len(), 12);
    assert_eq!(cache.stats().builds(), 2);
    assert_eq!(cache.tracked_keys(), 1);
}

#[tokio::test]
async fn periods_without_data_do_not_accumulate_keys() {
    let root = seeded_root();
    let cache = DatasetCache::new(Arc::new(root.builder()));

    for day in ["1901-01-01", "1901-01-02", "1999-12", "2030-06-15"] {
        let err = cache.get_or_build("DEV1", Some(day)).await.expect_err("no data");
        assert_eq!(err, DatasetError::NoDataAvailable);
    }
    assert_eq!(cache.stats().builds(), 4);
    assert_eq!(cache.tracked_keys(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_request_does_not_restart_the_build() {
    let root = DataRoot::new();
    root.write("DEV1", SOC, &every("2024-03-01 00:00:00", 1, 40_000));
    root.write("DEV1", VOLTAGE, &every("2024-03-01 00:00:00", 1, 40_000));
    let cache = Arc::new(DatasetCache::new(Arc::new(root.builder())));

    let first = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_or_build("DEV1", Some("2024-03")).await })
    };
    while cache.stats().builds() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    first.abort();
    let _ = first.await;

    let dataset = cache
        .get_or_build("DEV1", Some("2024-03"))
        .await
        .expect("dataset");
    assert_eq!(cache.stats().builds(), 1);
    assert_eq!(dataset.len(), 1_000);

    let again = cache
        .get_or_build("DEV1", Some("2024-03"))
        .await
        .expect("dataset");
    assert!(Arc::ptr_eq(&dataset, &again));
}
