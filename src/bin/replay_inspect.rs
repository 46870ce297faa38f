//! Replay Inspection Tool
//!
//! CLI for the bar database behind the replay server: list what is stored,
//! import CSV files, and dry-run a replay without a WebSocket client.
//!
//! Usage:
//!   cargo run --release --bin replay_inspect -- --db-path ./chronotick.db symbols
//!   cargo run --release --bin replay_inspect -- --db-path ./chronotick.db import \
//!       --symbol NIFTY --file nifty.csv
//!   cargo run --release --bin replay_inspect -- --db-path ./chronotick.db replay --symbol NIFTY \
//!       --start 2015-01-09T09:15:00 --end 2015-01-12T15:29:00 --interpolate

use anyhow::{anyhow, bail, Context, Result};
use chronotick_backend::{
    ingest::{parse_bars_csv, parse_timestamp},
    models::{Bar, ServerEvent},
    replay::{ReplayConfig, ReplayScheduler},
    store::normalize_symbol,
    BarStore,
};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

/// Inspect and dry-run the ChronoTick bar database
#[derive(Parser, Debug)]
#[command(name = "replay_inspect")]
#[command(about = "Inspect, import and dry-run replays of stored bar history")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, env = "BARS_DB_PATH", default_value = "chronotick.db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List symbols with stored bars
    Symbols,

    /// List trade dates for a symbol
    Dates {
        #[arg(short, long)]
        symbol: String,
    },

    /// Import a CSV file (date,open,high,low,close,volume)
    Import {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replay a range and print every event as a JSON line
    Replay {
        #[arg(short, long)]
        symbol: String,

        /// Inclusive start timestamp
        #[arg(long)]
        start: String,

        /// Inclusive end timestamp
        #[arg(long)]
        end: String,

        /// Wait the true elapsed time between bars
        #[arg(long)]
        realtime: bool,

        /// Intrabar compression factor (ignored with --realtime)
        #[arg(long, default_value = "3600")]
        time_scale: f64,

        /// Session gap compression factor (ignored with --realtime)
        #[arg(long, default_value = "86400")]
        gap_scale: f64,

        /// Emit interpolated ticks between closes
        #[arg(long)]
        interpolate: bool,

        #[arg(long, default_value = "1")]
        interpolate_step_sec: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let db_path = cli
        .db_path
        .to_str()
        .ok_or_else(|| anyhow!("Database path is not valid UTF-8: {:?}", cli.db_path))?;
    let store = BarStore::open(db_path)?;

    match cli.command {
        Commands::Symbols => {
            for symbol in store.symbols()? {
                println!("{}", symbol);
            }
        }
        Commands::Dates { symbol } => {
            let dates = store.trade_dates(&symbol)?;
            if dates.is_empty() {
                bail!("No data for {}", symbol);
            }
            for date in dates {
                println!("{}", date);
            }
        }
        Commands::Import { symbol, file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let records = parse_bars_csv(&bytes)?;
            let rows = store.insert_bars(&symbol, &records)?;
            println!("Imported {} rows for {}", rows, normalize_symbol(&symbol));
        }
        Commands::Replay {
            symbol,
            start,
            end,
            realtime,
            time_scale,
            gap_scale,
            interpolate,
            interpolate_step_sec,
        } => {
            let start = parse_timestamp(&start)
                .ok_or_else(|| anyhow!("Invalid start timestamp: {:?}", start))?;
            let end = parse_timestamp(&end)
                .ok_or_else(|| anyhow!("Invalid end timestamp: {:?}", end))?;

            let config = ReplayConfig {
                realtime,
                time_scale,
                gap_scale,
                interpolate,
                interpolate_step_seconds: interpolate_step_sec,
            };
            let bars = store.load_range(&symbol, start, end)?;
            if bars.is_empty() {
                bail!("No bars for {} between {} and {}", symbol, start, end);
            }

            replay(bars, config).await?;
        }
    }

    Ok(())
}

async fn replay(bars: Vec<Bar>, config: ReplayConfig) -> Result<()> {
    let mut scheduler = ReplayScheduler::new(bars, config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    while let Some(event) = scheduler.next_event().await? {
        let line = serde_json::to_string(&ServerEvent::from(event))?;
        writeln!(out, "{}", line)?;
    }

    out.flush()?;
    eprintln!("{} events", scheduler.emitted());
    Ok(())
}
