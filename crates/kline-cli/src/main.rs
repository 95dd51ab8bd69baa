use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use kline_core::candle::Direction;
use kline_core::integrity::{Issue, check_series};
use kline_core::interval::Interval;
use kline_core::stats::{self, BucketStats, DayReport, HourReport};
use kline_core::store::{CandleStore, ParquetCandleStore};
use kline_exchange::binance::BinanceFuturesClient;
use kline_sync::config::{SyncConfig, SyncTarget};
use kline_sync::engine::{SyncEngine, SyncReport};
use kline_sync::scheduler::{RunMode, Scheduler};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "kline",
    about = "Synchronize and analyze perpetual-futures K-line data"
)]
struct Cli {
    /// Root directory for data storage (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Once,
    Daemon,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Once => RunMode::Once,
            Mode::Daemon => RunMode::Daemon,
        }
    }
}

/// A `MM-DD` calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    fn of(t: DateTime<Utc>) -> Self {
        Self {
            month: t.month(),
            day: t.day(),
        }
    }
}

fn parse_month_day(s: &str) -> Result<MonthDay, String> {
    let (m, d) = s
        .split_once('-')
        .ok_or_else(|| format!("expected MM-DD, got {s:?}"))?;
    let month: u32 = m.parse().map_err(|_| format!("invalid month in {s:?}"))?;
    let day: u32 = d.parse().map_err(|_| format!("invalid day in {s:?}"))?;
    // 2024 is a leap year, so 02-29 is accepted.
    NaiveDate::from_ymd_opt(2024, month, day).ok_or_else(|| format!("no such date: {s}"))?;
    Ok(MonthDay { month, day })
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize every configured symbol and interval up to the end of yesterday (UTC)
    Sync {
        /// Path to the JSON config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Run one round, or run daily at 00:00 UTC until interrupted
        #[arg(long, value_enum, default_value_t = Mode::Once)]
        mode: Mode,

        /// In daemon mode, run a round immediately instead of waiting for midnight
        #[arg(long)]
        now: bool,
    },

    /// Show what series exist in the store
    Status {
        /// Filter by symbol (shows all if omitted)
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Check stored series for duplicates, gaps, ordering and bad close times
    Validate {
        /// Symbols to validate (all if omitted, comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },

    /// Up/down frequencies by calendar day (1d) and hour of day (intraday)
    Analyze {
        /// Path to the JSON config file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Day to analyze as MM-DD (defaults to today, UTC)
        #[arg(long, value_parser = parse_month_day)]
        date: Option<MonthDay>,

        /// Hour to analyze, 0-23 (defaults to the current UTC hour)
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: Option<u32>,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Analysis {
    Day(DayReport),
    Hour(HourReport),
}

fn load_config(path: &Path) -> Result<(SyncConfig, Vec<SyncTarget>)> {
    let config = SyncConfig::load(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let targets = config.targets()?;
    Ok((config, targets))
}

/// Daily series get day-of-month analysis; intraday series get hour-of-day
/// analysis. Multi-day intervals are skipped.
fn analyze_targets(
    store: &dyn CandleStore,
    targets: &[SyncTarget],
    date: MonthDay,
    hour: u32,
) -> Result<Vec<Analysis>> {
    let mut out = Vec::new();
    for target in targets {
        let (symbol, interval) = (target.symbol.as_str(), target.interval);
        if interval == Interval::Day1 {
            let report = stats::day_report(store, symbol, interval, date.month, date.day)
                .with_context(|| format!("failed to analyze {symbol} {interval}"))?;
            out.push(Analysis::Day(report));
        } else if interval.is_intraday() {
            let report = stats::hour_report(store, symbol, interval, hour)
                .with_context(|| format!("failed to analyze {symbol} {interval}"))?;
            out.push(Analysis::Hour(report));
        }
    }
    Ok(out)
}

fn print_sync_reports(reports: &[SyncReport]) {
    for r in reports {
        match &r.error {
            None => println!(
                "{} {}: {} inserted, {} replaced, last candle {}",
                r.symbol,
                r.interval,
                r.inserted,
                r.replaced,
                r.last_candle_time
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Some(e) => println!("ERROR: {e} ({} inserted before failure)", r.inserted),
        }
        for range in &r.skipped {
            println!("WARN: {} {}: skipped {range}", r.symbol, r.interval);
        }
    }
}

async fn cmd_sync(store: Arc<dyn CandleStore>, config_path: &Path, mode: Mode, now: bool) -> Result<()> {
    let (config, targets) = load_config(config_path)?;
    let exchange = match &config.base_url {
        Some(url) => BinanceFuturesClient::with_base_url(url.clone(), config.contract_type),
        None => BinanceFuturesClient::new(config.contract_type),
    }
    .context("failed to create Binance client")?;

    let engine = Arc::new(SyncEngine::new(
        Arc::new(exchange),
        store.clone(),
        config.options(),
    ));
    let scheduler = Scheduler::new(engine, targets.clone(), config.max_concurrency);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    let mut failed = 0;
    scheduler
        .run(mode.into(), now, &cancel, |reports| {
            print_sync_reports(reports);
            failed = reports.iter().filter(|r| !r.is_ok()).count();

            let today = Utc::now();
            match analyze_targets(store.as_ref(), &targets, MonthDay::of(today), today.hour()) {
                Ok(analyses) => {
                    for analysis in &analyses {
                        let (symbol, interval, bucket) = match analysis {
                            Analysis::Day(r) => (&r.symbol, r.interval, &r.date),
                            Analysis::Hour(r) => (&r.symbol, r.interval, &r.hour),
                        };
                        info!(
                            "{symbol} {interval} {}: up rate {:.2}% over {} sample(s)",
                            bucket.bucket, bucket.up_rate, bucket.total
                        );
                    }
                }
                Err(e) => warn!("analysis after sync failed: {e:#}"),
            }
        })
        .await;

    if mode == Mode::Once && failed > 0 {
        anyhow::bail!("{failed} pair(s) failed to sync");
    }
    Ok(())
}

fn cmd_status(store: &dyn CandleStore, symbol: Option<&str>) -> Result<()> {
    let symbol = symbol.map(str::to_uppercase);
    let series: Vec<_> = store
        .list_series()
        .context("failed to list series")?
        .into_iter()
        .filter(|(s, _)| symbol.as_ref().is_none_or(|want| s == want))
        .collect();

    if series.is_empty() {
        println!("No data in store.");
        return Ok(());
    }

    for (sym, interval) in &series {
        let count = store
            .count(sym, *interval)
            .with_context(|| format!("failed to count {sym} {interval}"))?;
        let first = store.min_open_time(sym, *interval)?;
        let last = store.max_open_time(sym, *interval)?;
        match (first, last) {
            (Some(first), Some(last)) => println!(
                "{sym} {interval}: {count} candle(s), {} to {}",
                first.format("%Y-%m-%d %H:%M"),
                last.format("%Y-%m-%d %H:%M"),
            ),
            _ => println!("{sym} {interval}: no data"),
        }
    }

    Ok(())
}

fn describe(issue: &Issue) -> String {
    match issue {
        Issue::Duplicate { open_time } => format!("duplicate open time {open_time}"),
        Issue::OutOfOrder { index } => format!("open times not strictly ascending at index {index}"),
        Issue::Gap {
            after,
            before,
            missing,
        } => format!("{missing} candle(s) missing between {after} and {before}"),
        Issue::InvalidCloseTime { open_time } => {
            format!("close time not after open time for candle at {open_time}")
        }
        Issue::Misaligned { open_time } => format!("open time {open_time} is off the interval grid"),
    }
}

/// Returns the number of issues found.
fn cmd_validate(store: &dyn CandleStore, symbols: Option<&[String]>) -> Result<usize> {
    let wanted: Option<Vec<String>> = symbols.map(|list| list.iter().map(|s| s.to_uppercase()).collect());
    let series: Vec<_> = store
        .list_series()
        .context("failed to list series")?
        .into_iter()
        .filter(|(s, _)| wanted.as_ref().is_none_or(|w| w.contains(s)))
        .collect();

    if series.is_empty() {
        println!("No data to validate.");
        return Ok(0);
    }

    let mut issues = 0;
    for (sym, interval) in &series {
        match store.query_all(sym, *interval) {
            Ok(candles) => {
                for issue in check_series(&candles, *interval) {
                    println!("WARN: {sym} {interval}: {}", describe(&issue));
                    issues += 1;
                }
            }
            Err(e) => {
                println!("ERROR: {sym} {interval}: failed to read: {e}");
                issues += 1;
            }
        }
    }

    if issues == 0 {
        println!("All series valid.");
    } else {
        println!("{issues} issue(s) found.");
    }

    Ok(issues)
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "up",
        Direction::Down => "down",
        Direction::Flat => "flat",
    }
}

fn print_bucket(stats: &BucketStats, with_samples: bool) {
    println!(
        "  {}: {} total, {} up, {} down, {} flat, up rate {:.2}%",
        stats.bucket, stats.total, stats.up, stats.down, stats.flat, stats.up_rate
    );
    if with_samples {
        for s in &stats.samples {
            println!(
                "    {:<10} open {:>14} close {:>14} diff {:>14} {}",
                s.label,
                s.open.to_string(),
                s.close.to_string(),
                s.diff.to_string(),
                direction_label(s.direction)
            );
        }
    }
}

fn print_analysis(analysis: &Analysis) {
    match analysis {
        Analysis::Day(r) => {
            println!("{} {}: {} across years", r.symbol, r.interval, r.date.bucket);
            print_bucket(&r.date, true);
            println!("  same day across months:");
            for month in &r.by_month {
                print_bucket(month, false);
            }
            if let (Some(best), Some(worst)) = (&r.best_month, &r.worst_month) {
                println!("  best {best}, worst {worst}");
            }
        }
        Analysis::Hour(r) => {
            println!("{} {}: hour {}", r.symbol, r.interval, r.hour.bucket);
            print_bucket(&r.hour, true);
            println!("  all hours:");
            for hour in &r.by_hour {
                print_bucket(hour, false);
            }
        }
    }
}

fn cmd_analyze(
    store: &dyn CandleStore,
    config_path: &Path,
    date: Option<MonthDay>,
    hour: Option<u32>,
    json: bool,
) -> Result<()> {
    let (_, targets) = load_config(config_path)?;
    let now = Utc::now();
    let analyses = analyze_targets(
        store,
        &targets,
        date.unwrap_or_else(|| MonthDay::of(now)),
        hour.unwrap_or_else(|| now.hour()),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analyses)?);
        return Ok(());
    }
    if analyses.is_empty() {
        println!("No daily or intraday intervals configured.");
    }
    for analysis in &analyses {
        print_analysis(analysis);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let store = Arc::new(ParquetCandleStore::new(&cli.data_dir));

    match &cli.command {
        Commands::Sync { config, mode, now } => {
            cmd_sync(store, config, *mode, *now).await?;
        }
        Commands::Status { symbol } => {
            cmd_status(store.as_ref(), symbol.as_deref())?;
        }
        Commands::Validate { symbols } => {
            cmd_validate(store.as_ref(), symbols.as_deref())?;
        }
        Commands::Analyze {
            config,
            date,
            hour,
            json,
        } => {
            cmd_analyze(store.as_ref(), config, *date, *hour, *json)?;
        }
    }

    Ok(())
}
