use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use mosaic_engine::config::EngineConfig;
use mosaic_engine::telemetry::init_tracing;
use mosaic_engine::{EngineEvent, GalleryEngine, IsolationId};
use mosaic_sdk::{GalleryClient, ThumbnailScope};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "mosaic",
    about = "Scroll through a gallery generation headlessly and log what would be shown",
    version
)]
struct Cli {
    #[arg(long, env = "MOSAIC_SERVER", help = "Base URL of the gallery server")]
    server: Option<String>,

    #[arg(
        long,
        env = "MOSAIC_TOKEN",
        hide_env_values = true,
        help = "Bearer token for the dataset generation"
    )]
    token: String,

    #[arg(long, help = "Server timestamp identifying the dataset generation")]
    timestamp: u64,

    #[arg(long, help = "Number of items in the generation")]
    data_length: usize,

    #[arg(long, default_value_t = 1280.0, help = "Window width in CSS pixels")]
    width: f64,

    #[arg(long, default_value_t = 900.0, help = "Viewport height in CSS pixels")]
    height: f64,

    #[arg(long, default_value_t = 5, help = "Number of one-viewport scroll steps")]
    steps: usize,

    #[arg(long, value_name = "ITEM", help = "Jump to this item before scrolling")]
    jump_to: Option<usize>,

    #[arg(long, help = "Clamp item aspect ratios to 2:1")]
    limit_ratio: bool,

    #[arg(long, value_name = "ID", help = "Album id forwarded with thumbnail requests")]
    album: Option<String>,

    #[arg(long, value_name = "ID", help = "Share id forwarded with thumbnail requests")]
    share: Option<String>,

    #[arg(
        long = "idle-ms",
        default_value_t = 750,
        help = "Consider a step settled after this long without worker answers"
    )]
    idle_ms: u64,

    #[arg(long, help = "Print one JSON line per settled frame on stdout")]
    json: bool,

    #[arg(long = "log", value_name = "FILTER", help = "tracing filter, overrides RUST_LOG")]
    log_filter: Option<String>,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    step: usize,
    scroll_top: f64,
    scroll_shift: f64,
    location_index: usize,
    rows: &'a [usize],
    thumbnails: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = EngineConfig::from_env();
    if let Some(server) = cli.server.clone() {
        cfg.server_base = server;
    }
    if let Some(filter) = cli.log_filter.clone() {
        cfg.log_filter = filter;
    }
    cfg.limit_ratio |= cli.limit_ratio;
    init_tracing(&cfg.log_filter);

    if cli.width <= 0.0 || cli.height <= 0.0 {
        bail!("window size must be positive, got {}x{}", cli.width, cli.height);
    }

    info!(
        server = %cfg.server_base,
        timestamp = cli.timestamp,
        data_length = cli.data_length,
        width = cli.width,
        height = cli.height,
        image_workers = cfg.image_workers,
        "starting mosaic"
    );

    let api = Arc::new(GalleryClient::new(cfg.server_base.clone()));
    let album_mode = cli.album.is_some();
    let scope = ThumbnailScope {
        album_id: cli.album.clone(),
        share_id: cli.share.clone(),
    };
    let isolation = if album_mode {
        IsolationId::Sub
    } else {
        IsolationId::Main
    };
    let idle = Duration::from_millis(cli.idle_ms);

    let mut engine = GalleryEngine::new(cfg, api, isolation, cli.width, cli.height);
    engine.set_thumbnail_scope(scope, album_mode);
    engine.open_generation(cli.timestamp, cli.data_length, cli.token.clone());

    if let Some(item) = cli.jump_to {
        engine.jump_to(item);
    }

    for step in 0..cli.steps {
        if step > 0 {
            let top = engine.state().scroll_top + cli.height;
            engine.set_scroll_top(top);
        }
        let (frame, events) = engine.settle(idle).await;

        let rows: Vec<usize> = frame.visible_rows.iter().map(|r| r.row_index).collect();
        let thumbnails = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ThumbnailReady { .. }))
            .count();
        info!(
            step,
            scroll_top = frame.scroll_top,
            shift = frame.scroll_shift,
            location = frame.location_index,
            ?rows,
            thumbnails,
            cached_rows = engine.cached_rows(),
            "frame settled"
        );
        if cli.json {
            let report = FrameReport {
                step,
                scroll_top: frame.scroll_top,
                scroll_shift: frame.scroll_shift,
                location_index: frame.location_index,
                rows: &rows,
                thumbnails,
            };
            println!("{}", serde_json::to_string(&report)?);
        }
        if events.iter().any(|e| matches!(e, EngineEvent::Unauthorized)) {
            bail!("server rejected the token");
        }
    }

    Ok(())
}
