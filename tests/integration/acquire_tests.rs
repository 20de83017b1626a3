//! Handle acquisition integration tests.
//!
//! Tests verify:
//! - Concurrent first requests converge on one live handle
//! - Eviction never closes a handle that is being rendered from
//! - The background sweep closes idle handles

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use wsi_tile_cache::cache::{AcquireCoordinator, ResourceCache};
use wsi_tile_cache::tile::TileFormat;

use super::test_utils::{mock_identity, MockFactory};

// =============================================================================
// Concurrent Acquisition
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_converges_on_one_handle() {
    let factory = MockFactory::new().with_open_delay(Duration::from_millis(25));
    let tracker = Arc::clone(&factory.tracker);
    let cache = Arc::new(ResourceCache::new());
    let coordinator = Arc::new(AcquireCoordinator::new(Arc::clone(&cache), factory));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            coordinator
                .acquire_or_create(&mock_identity("slide"))
                .await
                .unwrap()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    // Everyone shares the published handle; every losing candidate was closed.
    assert!(handles.iter().all(|h| h.same_handle(&handles[0])));
    assert_eq!(tracker.live(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.counters().live(), 1);
    assert_eq!(cache.counters().opened(), tracker.opened() as u64);

    drop(handles);
    let entry = cache.lookup(&mock_identity("slide")).unwrap();
    assert_eq!(entry.refcount(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_images_get_distinct_handles() {
    let factory = MockFactory::new();
    let tracker = Arc::clone(&factory.tracker);
    let coordinator = AcquireCoordinator::new(Arc::new(ResourceCache::new()), factory);

    let a = coordinator.acquire_or_create(&mock_identity("a")).await.unwrap();
    let b = coordinator.acquire_or_create(&mock_identity("b")).await.unwrap();
    let a_again = coordinator.acquire_or_create(&mock_identity("a")).await.unwrap();

    assert!(!a.same_handle(&b));
    assert!(a.same_handle(&a_again));
    assert_eq!(tracker.opened(), 2);
}

// =============================================================================
// Eviction vs. Use
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_during_render_is_deferred() {
    let factory = MockFactory::new().with_render_delay(Duration::from_millis(100));
    let tracker = Arc::clone(&factory.tracker);
    let cache = Arc::new(ResourceCache::with_expiration(Duration::from_millis(1)));
    let coordinator = AcquireCoordinator::new(Arc::clone(&cache), factory);

    let handle = coordinator
        .acquire_or_create(&mock_identity("slide"))
        .await
        .unwrap();

    let render = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.render_tile(2, 3, 1, TileFormat::Png, 80).await })
    };

    // Sweep while the render is in flight, as if the entry had gone stale.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = cache.evict_stale_at(Instant::now() + Duration::from_secs(60));
    assert_eq!(report.evicted, 1);
    assert_eq!(report.disposed, 0);
    assert_eq!(tracker.closed(), 0);

    let data = render.await.unwrap().unwrap();
    assert_eq!(data.as_ref(), b"2/3_1.png");
    assert_eq!(tracker.closed(), 0);

    drop(handle);
    assert_eq!(tracker.closed(), 1);
    assert_eq!(cache.counters().disposed(), 1);
}

#[tokio::test]
async fn test_reacquire_after_eviction_opens_fresh_handle() {
    let factory = MockFactory::new();
    let tracker = Arc::clone(&factory.tracker);
    let cache = Arc::new(ResourceCache::new());
    let coordinator = AcquireCoordinator::new(Arc::clone(&cache), factory);

    let first = coordinator
        .acquire_or_create(&mock_identity("slide"))
        .await
        .unwrap();
    cache.evict_all();

    let second = coordinator
        .acquire_or_create(&mock_identity("slide"))
        .await
        .unwrap();
    assert!(!first.same_handle(&second));
    assert_eq!(tracker.opened(), 2);

    drop(first);
    assert_eq!(tracker.closed(), 1);
    drop(second);
    assert_eq!(tracker.closed(), 1);
}

#[tokio::test]
async fn test_background_sweep_closes_idle_handles() {
    let factory = MockFactory::new();
    let tracker = Arc::clone(&factory.tracker);
    let cache = Arc::new(ResourceCache::with_expiration(Duration::from_millis(30)));
    let coordinator = AcquireCoordinator::new(Arc::clone(&cache), factory);

    drop(
        coordinator
            .acquire_or_create(&mock_identity("slide"))
            .await
            .unwrap(),
    );

    let shutdown = CancellationToken::new();
    let sweeper = cache.spawn_eviction_task(Duration::from_millis(10), shutdown.clone());

    let deadline = Instant::now() + Duration::from_secs(2);
    while tracker.closed() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tracker.closed(), 1);
    assert!(cache.is_empty());

    shutdown.cancel();
    sweeper.await.unwrap();
}
