//! zoomcanvas command-line tool.
//!
//! Usage:
//!   # Address of the square at (x, y), depth 12 (coordinates in octal)
//!   zoomcanvas encode 0.0077 0.0077 12
//!
//!   # Location of an address, as JSON
//!   zoomcanvas decode iAA
//!
//!   # Cell index of a pixel inside its block
//!   zoomcanvas pixel-index 0.0077 0.0077 12
//!
//!   # Fetch a viewport and paint its centre against an in-memory canvas
//!   zoomcanvas simulate --x 0.4 --y 0.4 --zoom 1.5 --config canvas.toml

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use zoomcanvas_blocks::{Color, SystemClock};
use zoomcanvas_client::view::{block_level, compute_viewport, visible_blocks};
use zoomcanvas_client::{BlockEvent, BlockLookup, BlockScheduler, CanvasConfig, MemoryBlockSource, PaintOutcome};
use zoomcanvas_coord::{Address, BLOCK_BITS, Coord, MIN_PIXEL_BITS, encode, pixel_index_within_block};

#[derive(Parser, Debug)]
#[command(name = "zoomcanvas")]
#[command(about = "Addresses and block scheduling for an infinitely zoomable canvas")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the address of the square containing (x, y) at a depth
    Encode(Point),

    /// Print the location an address names, as JSON
    Decode {
        address: Address,
    },

    /// Print the cell index of a pixel within its block
    PixelIndex(Point),

    /// Load a viewport from an in-memory canvas and paint its centre
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct Point {
    /// Octal coordinate in [0, 1)
    #[arg(allow_hyphen_values = true)]
    x: Coord,

    /// Octal coordinate in [0, 1)
    #[arg(allow_hyphen_values = true)]
    y: Coord,

    /// Depth in bits
    bits: u32,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// TOML config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Viewport centre, octal
    #[arg(long, default_value = "0.4", allow_hyphen_values = true)]
    x: Coord,

    #[arg(long, default_value = "0.4", allow_hyphen_values = true)]
    y: Coord,

    #[arg(long, default_value_t = 0.0)]
    zoom: f64,

    #[arg(long, default_value_t = 512)]
    width: u32,

    #[arg(long, default_value_t = 512)]
    height: u32,

    /// 12-bit color in hex, red in the lowest nibble
    #[arg(long, default_value = "fff", value_parser = parse_color)]
    color: Color,

    /// Give up waiting for the source after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn parse_color(text: &str) -> Result<Color, String> {
    let value = u16::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|err| format!("not a hex color: {err}"))?;
    Color::new(value).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Encode(point) => {
            let address = encode(&point.x, &point.y, point.bits)
                .with_context(|| format!("({}, {}) is outside the canvas", point.x, point.y))?;
            println!("{address}");
        }
        Command::Decode { address } => {
            let location = address.decode()?;
            println!("{}", serde_json::to_string_pretty(&location)?);
        }
        Command::PixelIndex(point) => {
            if point.bits < MIN_PIXEL_BITS {
                bail!("pixels start at depth {MIN_PIXEL_BITS}, got {}", point.bits);
            }
            if encode(&point.x, &point.y, point.bits).is_none() {
                bail!("({}, {}) is outside the canvas", point.x, point.y);
            }
            println!("{}", pixel_index_within_block(&point.x, &point.y, point.bits));
        }
        Command::Simulate(args) => simulate(args).await?,
    }
    Ok(())
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => CanvasConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CanvasConfig::default(),
    };
    let precision = config.precision();
    let deadline = Duration::from_secs(args.timeout_secs);

    let source = Arc::new(MemoryBlockSource::with_clock(
        Arc::new(SystemClock),
        config.dry_delay(),
    ));
    let scheduler = BlockScheduler::new(source.clone(), &config);
    scheduler.subscribe(|event| {
        info!(subject = event.subject(), address = %event.address(), "block event");
    });
    let mut loaded = scheduler.listen("block.loaded");
    let mut paints = scheduler.listen("block.*");

    let viewport = compute_viewport(&precision, &args.x, &args.y, args.zoom, args.width, args.height);
    let blocks = visible_blocks(&precision, &viewport, args.zoom);
    let mut waiting = 0usize;
    for block in &blocks {
        let lookup = scheduler.get_block(&block.x, &block.y, block.level, Some(block.priority));
        if lookup == BlockLookup::Pending {
            waiting += 1;
        }
    }
    info!(blocks = blocks.len(), waiting, "viewport requested");

    timeout(deadline, async {
        for _ in 0..waiting {
            if loaded.recv().await.is_none() {
                break;
            }
        }
    })
    .await
    .context("timed out loading the viewport")?;

    let level = block_level(args.zoom).saturating_add(BLOCK_BITS);
    let level = level.max(MIN_PIXEL_BITS);
    let (center_x, center_y) = viewport.center(&precision);
    let (pixel_x, pixel_y) = (center_x.truncate(level as i32), center_y.truncate(level as i32));
    let outcome = scheduler.paint(&pixel_x, &pixel_y, level, args.color);

    let result = match outcome {
        PaintOutcome::Pending => {
            let answer = timeout(deadline, async {
                while let Some(event) = paints.recv().await {
                    match event {
                        BlockEvent::Painted { .. } => return "painted".to_string(),
                        BlockEvent::PaintFailed { reason, .. } => return format!("failed: {reason:?}"),
                        BlockEvent::Loaded { .. } => {}
                    }
                }
                "no answer".to_string()
            });
            answer.await.context("timed out waiting for the paint")?
        }
        other => format!("{other:?}"),
    };

    let summary = json!({
        "viewport": viewport,
        "level": block_level(args.zoom),
        "blocks": blocks.len(),
        "fetched": waiting,
        "paint": {
            "address": encode(&pixel_x, &pixel_y, level).map(|a| a.to_string()),
            "color": args.color.value(),
            "result": result,
        },
        "server_blocks": source.store().read().len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
