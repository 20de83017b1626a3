//! Tile service integration tests.
//!
//! Tests verify:
//! - Tile requests render, persist and then hit the disk cache
//! - Concurrent requests for one image share a single decoder handle
//! - Request validation errors
//! - Image metadata

use std::sync::Arc;

use wsi_tile_cache::error::TileError;
use wsi_tile_cache::tile::TileFormatConfig;

use super::test_utils::{decoded_dimensions, is_valid_jpeg, is_valid_png, setup};

// =============================================================================
// Tile Requests
// =============================================================================

#[tokio::test]
async fn test_tile_miss_then_hit() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::default());

    let first = test.service.get_tile("slide", 9, 1, 0, "jpg").await.unwrap();
    assert!(!first.cache_hit);
    assert!(is_valid_jpeg(&first.data));
    assert_eq!(first.content_type, "image/jpeg");
    assert_eq!(decoded_dimensions(&first.data), (128, 128));

    // Single-image layout: no image segment in the path.
    assert!(test.cache.path().join("9/1_0.jpg").is_file());

    let second = test.service.get_tile("slide", 9, 1, 0, "jpg").await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.data, first.data);
}

#[tokio::test]
async fn test_lossless_tier_overrides_requested_extension() {
    let test = setup(
        &[("slide", 300, 200)],
        128,
        TileFormatConfig::with_lossless_levels(2),
    );

    let top = test.service.get_tile("slide", 9, 0, 0, "jpg").await.unwrap();
    assert!(is_valid_png(&top.data));
    assert_eq!(top.content_type, "image/png");

    let below_tier = test.service.get_tile("slide", 7, 0, 0, "png").await.unwrap();
    assert!(is_valid_jpeg(&below_tier.data));
}

#[tokio::test]
async fn test_disk_cache_disabled_always_renders() {
    let mut test = setup(&[("slide", 64, 64)], 32, TileFormatConfig::default());
    test.service = test.service.with_disk_cache(false);

    for _ in 0..2 {
        let response = test.service.get_tile("slide", 6, 1, 1, "jpg").await.unwrap();
        assert!(!response.cache_hit);
    }
    assert_eq!(test.service.get_stats(None).await.unwrap().file_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_handle() {
    let test = Arc::new(setup(&[("slide", 512, 512)], 128, TileFormatConfig::default()));

    let mut tasks = Vec::new();
    for i in 0..16u32 {
        let test = Arc::clone(&test);
        tasks.push(tokio::spawn(async move {
            test.service
                .get_tile("slide", 9, i % 4, i / 4, "jpg")
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(is_valid_jpeg(&task.await.unwrap().data));
    }

    let cache = test.service.cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.counters().live(), 1);
    assert_eq!(test.service.get_stats(None).await.unwrap().file_count, 16);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_request_validation() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::default());
    let service = &test.service;

    assert!(matches!(
        service.get_tile("missing", 0, 0, 0, "jpg").await,
        Err(TileError::NotFound { .. })
    ));
    assert!(matches!(
        service.get_tile("slide", 0, 0, 0, "webp").await,
        Err(TileError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        service.get_tile("slide", 10, 0, 0, "jpg").await,
        Err(TileError::InvalidLevel {
            level: 10,
            level_count: 10
        })
    ));
    assert!(matches!(
        service.get_tile("slide", 9, 3, 0, "jpg").await,
        Err(TileError::TileOutOfBounds {
            cols: 3,
            rows: 2,
            ..
        })
    ));
}

// =============================================================================
// Metadata and Maintenance
// =============================================================================

#[tokio::test]
async fn test_image_info() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::default());

    let info = test.service.image_info("slide").await.unwrap();
    assert_eq!(info.dimensions, (300, 200));
    assert_eq!(info.level_count, 10);
    assert_eq!(info.total_tiles, 16);
    assert_eq!(info.levels[9].cols, 3);
    assert_eq!(info.levels[9].rows, 2);
    assert_eq!((info.levels[0].width, info.levels[0].height), (1, 1));

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["level_count"], 10);
}

#[tokio::test]
async fn test_clear_single_image_in_multi_image_store() {
    let test = setup(
        &[("a", 64, 64), ("b", 64, 64)],
        32,
        TileFormatConfig::default(),
    );

    test.service.get_tile("a", 6, 0, 0, "jpg").await.unwrap();
    test.service.get_tile("b", 6, 0, 0, "jpg").await.unwrap();
    assert_eq!(test.service.get_stats(None).await.unwrap().file_count, 2);

    test.service.clear_cache(Some("a")).await.unwrap();
    assert_eq!(test.service.get_stats(Some("a")).await.unwrap().file_count, 0);
    assert_eq!(test.service.get_stats(Some("b")).await.unwrap().file_count, 1);

    let again = test.service.get_tile("a", 6, 0, 0, "jpg").await.unwrap();
    assert!(!again.cache_hit);
}
