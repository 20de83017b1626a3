//! Bulk generation integration tests over real decoded images.
//!
//! A 300x200 image with 128px tiles has 10 levels:
//! level 9 is 300x200 (3x2 tiles), level 8 is 150x100 (2x1 tiles) and
//! levels 0-7 fit in a single tile each, 16 tiles in total.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use wsi_tile_cache::tile::{
    GenerationOutcome, NoProgress, ProgressEvent, TileFormat, TileFormatConfig, TileKey,
};

use super::test_utils::{decoded_dimensions, is_valid_jpeg, is_valid_png, setup};

const TOTAL_TILES: u64 = 16;

#[tokio::test]
async fn test_generate_all_with_lossless_top_level() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::with_lossless_levels(1));
    let store = test.service.store();

    let outcome = test
        .service
        .generate_all("slide", false, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();

    let summary = match outcome {
        GenerationOutcome::Completed(summary) => summary,
        other => panic!("unexpected outcome: {other}"),
    };
    assert_eq!(summary.generated, TOTAL_TILES);
    assert_eq!(summary.skipped, 0);

    // Top level: lossless.
    for row in 0..2 {
        for col in 0..3 {
            let key = TileKey::new("slide", 9, col, row, TileFormat::Png);
            let data = store.read(&key).await.unwrap().unwrap();
            assert!(is_valid_png(&data));
        }
    }
    let edge = store
        .read(&TileKey::new("slide", 9, 2, 1, TileFormat::Png))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decoded_dimensions(&edge), (44, 72));

    // Everything below: lossy.
    let low = store
        .read(&TileKey::new("slide", 0, 0, 0, TileFormat::Jpeg))
        .await
        .unwrap()
        .unwrap();
    assert!(is_valid_jpeg(&low));
    assert_eq!(decoded_dimensions(&low), (1, 1));

    let level8 = store
        .read(&TileKey::new("slide", 8, 1, 0, TileFormat::Jpeg))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decoded_dimensions(&level8), (22, 100));

    assert_eq!(
        test.service.get_stats(None).await.unwrap().file_count,
        TOTAL_TILES
    );
}

#[tokio::test]
async fn test_regeneration_skips_cached_tiles() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::default());
    let cancel = CancellationToken::new();

    test.service
        .generate_all("slide", false, &NoProgress, &cancel)
        .await
        .unwrap();
    let second = test
        .service
        .generate_all("slide", false, &NoProgress, &cancel)
        .await
        .unwrap();

    assert_eq!(second.generated(), 0);
    assert_eq!(second.skipped(), TOTAL_TILES);
}

#[tokio::test]
async fn test_cancellation_leaves_readable_tiles() {
    let test = setup(&[("slide", 300, 200)], 128, TileFormatConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let last_processed = AtomicU64::new(0);
    let progress = |event: &ProgressEvent| {
        last_processed.store(event.processed, Ordering::SeqCst);
        if event.processed == 9 {
            trigger.cancel();
        }
    };

    let outcome = test
        .service
        .generate_all("slide", false, &progress, &cancel)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        GenerationOutcome::Canceled {
            generated: 9,
            skipped: 0,
            processed: 9
        }
    );
    assert_eq!(last_processed.load(Ordering::SeqCst), 9);

    // Levels 0-7 and the first tile of level 8 were written.
    let store = test.service.store();
    for level in 0..8 {
        let data = store
            .read(&TileKey::new("slide", level, 0, 0, TileFormat::Jpeg))
            .await
            .unwrap()
            .unwrap();
        assert!(is_valid_jpeg(&data));
    }
    assert!(store
        .exists(&TileKey::new("slide", 8, 0, 0, TileFormat::Jpeg))
        .await
        .unwrap());
    assert!(!store
        .exists(&TileKey::new("slide", 8, 1, 0, TileFormat::Jpeg))
        .await
        .unwrap());

    // A resumed run picks up where the canceled one stopped.
    let resumed = test
        .service
        .generate_all("slide", false, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.skipped(), 9);
    assert_eq!(resumed.generated(), TOTAL_TILES - 9);
}

#[tokio::test]
async fn test_missing_source_file_fails_without_writing() {
    let test = setup(&[("a", 64, 64), ("b", 64, 64)], 32, TileFormatConfig::default());
    std::fs::remove_file(test.sources.path().join("b.png")).unwrap();

    let err = test
        .service
        .generate_all("b", false, &NoProgress, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, wsi_tile_cache::TileError::Open(_)));
    assert_eq!(test.service.get_stats(Some("b")).await.unwrap().file_count, 0);

    // Other images are unaffected.
    let outcome = test
        .service
        .generate_all("a", false, &NoProgress, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.is_canceled());
    assert!(test.cache.path().join("a").is_dir());
}
