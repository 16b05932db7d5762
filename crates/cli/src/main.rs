use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use seek_grid::synthetic::{DecoderTiming, SyntheticHost};
use seek_grid::{
    CellGeometry, CoordinateMapper, GridConfig, GridLayout, GridSpec, QuantizedTimestamp,
    ScrollMode, SharedFrameCache, ThumbnailGrid,
};
use serde::Serialize;
use tokio::task::LocalSet;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "seek-grid", version, about = "Inspect and exercise thumbnail grid layouts")]
struct Cli {
    /// JSON grid configuration; command-line values override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every cell with its label and sample time.
    Layout {
        #[command(flatten)]
        grid: GridArgs,
        #[arg(long)]
        json: bool,
    },
    /// Map a playback time to its cell and marker position.
    Locate {
        #[command(flatten)]
        grid: GridArgs,
        #[arg(long)]
        time: f64,
    },
    /// Run rebuilds and playback against a synthetic decoder in virtual time.
    Simulate {
        #[command(flatten)]
        grid: GridArgs,
        /// Base name of the simulated media.
        #[arg(long, default_value = "synthetic.mp4")]
        video: String,
        /// Distinct videos cycled through on every pass.
        #[arg(long, default_value_t = 1)]
        videos: usize,
        #[arg(long, default_value_t = 2)]
        passes: usize,
        #[arg(long)]
        parallel: Option<usize>,
        #[arg(long, default_value_t = 20)]
        seek_ms: u64,
        #[arg(long, default_value_t = 300.0)]
        viewport_height: f64,
        #[arg(long)]
        scroll_mode: Option<ScrollMode>,
        /// Seconds of playback simulated after the last rebuild.
        #[arg(long, default_value_t = 5.0)]
        play_seconds: f64,
    },
}

#[derive(Debug, Args)]
struct GridArgs {
    /// Media duration in seconds.
    #[arg(long)]
    duration: f64,
    #[arg(long, allow_negative_numbers = true)]
    columns: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    seconds_per_cell: Option<f64>,
    #[arg(long, default_value_t = 160.0)]
    cell_width: f64,
    #[arg(long, default_value_t = 90.0)]
    cell_height: f64,
    #[arg(long, default_value_t = 2.0)]
    gap: f64,
}

impl GridArgs {
    fn config(&self, base: &GridConfig) -> GridConfig {
        let mut config = base.clone();
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(seconds_per_cell) = self.seconds_per_cell {
            config.seconds_per_cell = seconds_per_cell;
        }
        let (config, _) = config.sanitized();
        config
    }

    fn layout(&self, config: &GridConfig) -> GridLayout {
        let (spec, _) = GridSpec::clamped(self.duration, config.columns, config.seconds_per_cell);
        GridLayout::from_spec(spec)
    }

    fn geometry(&self) -> CellGeometry {
        CellGeometry {
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            gap: self.gap,
        }
    }
}

#[derive(Debug, Serialize)]
struct CellRow {
    index: usize,
    row: usize,
    col: usize,
    label: String,
    sample_time: String,
    sample_seconds: f64,
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    let base = match &cli.config {
        Some(path) => GridConfig::load(path)
            .with_context(|| format!("loading grid config {}", path.display()))?,
        None => GridConfig::default(),
    };

    match cli.command {
        Command::Layout { grid, json } => print_layout(&grid, &base, json),
        Command::Locate { grid, time } => locate(&grid, &base, time),
        Command::Simulate {
            grid,
            video,
            videos,
            passes,
            parallel,
            seek_ms,
            viewport_height,
            scroll_mode,
            play_seconds,
        } => {
            let mut config = grid.config(&base);
            if let Some(parallel) = parallel {
                config.parallel_extractors = parallel.max(1);
            }
            if let Some(scroll_mode) = scroll_mode {
                config.scroll_mode = scroll_mode;
            }
            let scenario = Scenario {
                duration: grid.duration,
                video,
                videos: videos.max(1),
                passes,
                seek: Duration::from_millis(seek_ms),
                viewport_height,
                play_seconds,
            };
            simulate(config, scenario)
        }
    }
}

fn print_layout(grid: &GridArgs, base: &GridConfig, json: bool) -> Result<()> {
    let config = grid.config(base);
    let layout = grid.layout(&config);
    let rows: Vec<CellRow> = (0..layout.total_cells)
        .filter_map(|index| layout.cell(index))
        .map(|cell| {
            let sample = QuantizedTimestamp::from_seconds(layout.sample_time(cell.index));
            CellRow {
                index: cell.index,
                row: cell.row,
                col: cell.col,
                label: layout.cell_label(cell.index),
                sample_time: sample.to_string(),
                sample_seconds: sample.as_seconds(),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{} cells in {} rows of {} ({}s per cell)",
        layout.total_cells, layout.rows, layout.columns, layout.seconds_per_cell
    );
    for row in rows {
        println!(
            "{:>5}  r{:<4} c{:<3} {:>7}  @{}",
            row.index, row.row, row.col, row.label, row.sample_time
        );
    }
    Ok(())
}

fn locate(grid: &GridArgs, base: &GridConfig, time: f64) -> Result<()> {
    let config = grid.config(base);
    let layout = grid.layout(&config);
    if layout.is_empty() {
        bail!("duration {} produces an empty grid", grid.duration);
    }
    let mapper = CoordinateMapper::new(layout, grid.geometry());
    let cell = mapper
        .cell_at_time(time)
        .context("no cell for the requested time")?;
    let position = mapper.time_to_position(time);
    let output = serde_json::json!({
        "cell": cell,
        "position": position,
        "round_trip": mapper.position_to_time(position.x, position.y),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

struct Scenario {
    duration: f64,
    video: String,
    videos: usize,
    passes: usize,
    seek: Duration,
    viewport_height: f64,
    play_seconds: f64,
}

impl Scenario {
    fn video_name(&self, slot: usize) -> String {
        if self.videos == 1 {
            self.video.clone()
        } else {
            format!("{}#{slot}", self.video)
        }
    }
}

fn simulate(config: GridConfig, scenario: Scenario) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .context("building runtime")?;
    let local = LocalSet::new();
    local.block_on(&runtime, run_scenario(config, scenario))
}

async fn run_scenario(config: GridConfig, scenario: Scenario) -> Result<()> {
    let host = SyntheticHost::new(scenario.video_name(0), scenario.duration)
        .with_timing(DecoderTiming {
            seek: scenario.seek,
            ..DecoderTiming::default()
        })
        .with_viewport_height(scenario.viewport_height);
    let cache = SharedFrameCache::new(config.cache_videos);
    let grid = ThumbnailGrid::new(host.clone(), cache.clone(), config);
    grid.on_error(|event| warn!(kind = event.kind.as_str(), "{}: {}", event.message, event.error));

    for pass in 0..scenario.passes {
        for slot in 0..scenario.videos {
            let name = scenario.video_name(slot);
            host.load(name.as_str(), scenario.duration);
            let started = Instant::now();
            let Some(stats) = grid.rebuild().await else {
                bail!("rebuild of {name} did not run");
            };
            println!(
                "pass {pass} {name}: {} extracted, {} cached, {} failed in {}ms simulated",
                stats.extracted,
                stats.cache_hits,
                stats.failed,
                started.elapsed().as_millis()
            );
        }
    }

    if scenario.play_seconds > 0.0 {
        let clock = grid.spawn_clock();
        host.set_playing(true);
        let step = Duration::from_millis(250);
        let mut played = 0.0;
        while played < scenario.play_seconds {
            host.advance_playback(step.as_secs_f64());
            grid.on_time_update();
            sleep(step).await;
            played += step.as_secs_f64();
        }
        let view = grid.view();
        let cell = grid.current_cell();
        info!(
            marker_x = view.marker.x,
            marker_y = view.marker.y,
            cell = cell.map(|cell| cell.index),
            "playback finished"
        );
        println!(
            "played {played:.2}s: cell {}, marker ({:.1}, {:.1})",
            cell.map_or_else(|| "-".to_string(), |cell| cell.index.to_string()),
            view.marker.x,
            view.marker.y
        );
        grid.destroy();
        clock.await.context("marker clock task")?;
    } else {
        grid.destroy();
    }

    println!(
        "cache: {} videos, {} frames; decoders opened {}, released {}",
        cache.video_count(),
        cache.frame_count(),
        host.opened_decoders(),
        host.released_decoders().len()
    );
    Ok(())
}
