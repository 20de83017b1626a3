//! wsi-tile-cache - Tile rendering and disk caching for large images.
//!
//! This binary wires the cache components together and exposes the service
//! operations as subcommands.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tile_cache::{
    cache::{AcquireCoordinator, ResourceCache},
    config::{CacheConfig, ClearArgs, Cli, Command, GenerateArgs, InfoArgs, StatsArgs, TileArgs},
    source::ImageFileOpener,
    tile::{GenerationOutcome, ProgressEvent, TileService, TileStore},
};

type Service = TileService<ImageFileOpener>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.into_command();
    let config = command.config().clone();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let service = match build_service(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let sweeper = service
        .cache()
        .spawn_eviction_task(config.sweep_interval(), shutdown.child_token());

    let code = match command {
        Command::Generate(args) => run_generate(&service, args, shutdown.clone()).await,
        Command::Tile(args) => run_tile(&service, args).await,
        Command::Clear(args) => run_clear(&service, args).await,
        Command::Stats(args) => run_stats(&service, args).await,
        Command::Info(args) => run_info(&service, args).await,
    };

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Eviction task ended abnormally: {}", e);
    }
    let report = service.cache().evict_all();
    info!(
        "Closed {} decoder handle(s) ({} still in use)",
        report.disposed,
        report.evicted - report.disposed
    );

    code
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tile_cache=debug"
    } else {
        "wsi_tile_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_service(config: &CacheConfig) -> Result<Service, String> {
    let catalog = config.catalog()?;
    let layout = config.layout(catalog.len());

    info!("Configuration:");
    info!("  Images: {}", catalog.names().collect::<Vec<_>>().join(", "));
    info!("  Cache dir: {} ({:?})", config.cache_dir.display(), layout);
    if config.no_disk_cache {
        warn!("  Disk cache: DISABLED - every tile is rendered from source");
    }
    let formats = config.format_config();
    match formats.lossless_format {
        Some(lossless) => info!(
            "  Tiles: {}px, default {}, lossless {} for {} level(s), quality {}",
            config.tile_size, formats.default_format, lossless, formats.lossless_level_count,
            formats.jpeg_quality
        ),
        None => info!(
            "  Tiles: {}px, default {}, no lossless tier, quality {}",
            config.tile_size, formats.default_format, formats.jpeg_quality
        ),
    }
    info!(
        "  Handles: expire after {}s idle, sweep every {}s",
        config.handle_expiry, config.sweep_interval
    );

    let cache = Arc::new(ResourceCache::with_expiration(config.handle_expiry()));
    let coordinator = AcquireCoordinator::new(cache, ImageFileOpener::new(config.tile_size));
    let store = TileStore::new(config.cache_dir.clone(), layout);

    Ok(TileService::new(catalog, coordinator, store, formats)
        .with_disk_cache(!config.no_disk_cache))
}

// =============================================================================
// Generate Command
// =============================================================================

async fn run_generate(service: &Service, args: GenerateArgs, cancel: CancellationToken) -> ExitCode {
    let names: Vec<String> = match args.name {
        Some(name) => vec![name],
        None => service.catalog().names().map(str::to_string).collect(),
    };

    // Ctrl-C stops the run between tiles.
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current tile");
            interrupt.cancel();
        }
    });

    let progress = |event: &ProgressEvent| {
        let step = (event.total / 20).max(1);
        if event.processed % step == 0 || event.processed == event.total {
            info!(
                "  {}: {}/{} tiles (level {})",
                event.image, event.processed, event.total, event.level
            );
        }
    };

    for name in names {
        match service
            .generate_all(&name, args.overwrite, &progress, &cancel)
            .await
        {
            Ok(outcome @ GenerationOutcome::Canceled { .. }) => {
                info!("{}: {}", name, outcome);
                return ExitCode::SUCCESS;
            }
            Ok(outcome) => info!("{}: {}", name, outcome),
            Err(e) => {
                error!("{}: {}", name, e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(service: &Service, args: TileArgs) -> ExitCode {
    let response = match service
        .get_tile(&args.name, args.level, args.col, args.row, &args.ext)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Tile {}/{}/{}_{}: {} bytes, {}, cache {}",
        args.name,
        args.level,
        args.col,
        args.row,
        response.data.len(),
        response.content_type,
        if response.cache_hit { "hit" } else { "miss" }
    );

    if let Some(path) = args.output {
        if let Err(e) = tokio::fs::write(&path, &response.data).await {
            error!("Failed to write {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        info!("Wrote {}", path.display());
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Clear / Stats / Info Commands
// =============================================================================

async fn run_clear(service: &Service, args: ClearArgs) -> ExitCode {
    match service.clear_cache(args.name.as_deref()).await {
        Ok(()) => {
            info!(
                "Cleared cached tiles for {}",
                args.name.as_deref().unwrap_or("all images")
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_stats(service: &Service, args: StatsArgs) -> ExitCode {
    let stats = match service.get_stats(args.name.as_deref()).await {
        Ok(stats) => stats,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize stats: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!(
            "{}: {} tiles, {} bytes",
            args.name.as_deref().unwrap_or("all images"),
            stats.file_count,
            stats.total_bytes
        );
    }
    ExitCode::SUCCESS
}

async fn run_info(service: &Service, args: InfoArgs) -> ExitCode {
    let info = match service.image_info(&args.name).await {
        Ok(info) => info,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&info) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize image info: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("{}", info.name);
    println!("  Dimensions: {}x{}", info.dimensions.0, info.dimensions.1);
    println!("  Levels: {}", info.level_count);
    println!("  Tiles: {}", info.total_tiles);
    for level in &info.levels {
        println!(
            "    {:>2}: {}x{} px, {}x{} tiles",
            level.level, level.width, level.height, level.cols, level.rows
        );
    }
    ExitCode::SUCCESS
}
