//! Overlay Hedger - Main Entry Point
//!
//! Backtests, parameter sweeps and journal inspection for the overlay hedger.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use overlay_hedger::backtest::{
    BacktestConfig, BacktestEngine, CsvBarLoader, DataLoader, ParameterSpace, SweepRunner,
};
use overlay_hedger::config::Config;
use overlay_hedger::market::Universe;
use overlay_hedger::persistence::HedgeJournal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Overlay Hedger CLI
#[derive(Parser)]
#[command(name = "overlay-hedger")]
#[command(version, about = "Correlation-driven overlay pair hedging")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest simulation on historical bars
    Backtest {
        /// Path to CSV bar file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first bar
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last bar
        #[arg(short, long)]
        end: Option<String>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,

        /// Journal hedges and equity to this SQLite file
        #[arg(short, long)]
        journal: Option<String>,
    },

    /// Run a parameter sweep optimization
    Sweep {
        /// Path to CSV bar file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first bar
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last bar
        #[arg(short, long)]
        end: Option<String>,

        /// Number of parallel backtests
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,

        /// Use minimal parameter space (faster, for testing)
        #[arg(long)]
        minimal: bool,
    },

    /// Show hedge activity from a journal
    Status {
        /// Path to SQLite journal
        #[arg(short, long, default_value = "data/hedge_journal.db")]
        db: String,

        /// Show recent hedge events
        #[arg(short, long)]
        verbose: bool,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Backtest {
            data,
            start,
            end,
            output,
            journal,
        }) => {
            run_backtest(
                &data,
                start.as_deref(),
                end.as_deref(),
                output.as_deref(),
                journal,
            )
            .await
        }
        Some(Commands::Sweep {
            data,
            start,
            end,
            parallelism,
            output,
            minimal,
        }) => {
            run_sweep(
                &data,
                start.as_deref(),
                end.as_deref(),
                parallelism,
                output.as_deref(),
                minimal,
            )
            .await
        }
        Some(Commands::Status { db, verbose }) => show_status(&db, verbose),
        Some(Commands::CheckConfig) => check_config(),
        None => {
            info!(
                "Overlay Hedger v{}: no command given, see --help",
                env!("CARGO_PKG_VERSION")
            );
            check_config()
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "overlay-hedger.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("overlay_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Load the config and refuse to continue if it is invalid.
fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    log_config(&config);
    Ok(config)
}

fn log_config(config: &Config) {
    let symbols: Vec<&str> = config
        .universe
        .instruments
        .iter()
        .map(|spec| spec.symbol.as_str())
        .collect();

    info!("📋 Configuration:");
    info!("   Universe: {}", symbols.join(", "));
    info!(
        "   Lookbacks: correlation={} range={} atr={}",
        config.pairs.correlation_lookback, config.pairs.range_lookback, config.pairs.atr_lookback
    );
    info!(
        "   Correlation Threshold: {:.0}%",
        config.pairs.correlation_threshold * dec!(100)
    );
    info!("   Recalc Hour: {:02}:00 UTC", config.pairs.recalc_hour);
    info!("   Overlay Threshold: {} points", config.overlay.threshold);
    if config.exit.take_profit_points_enabled {
        info!("   Take Profit: {} points", config.exit.take_profit_points);
    }
    if config.exit.take_profit_currency_enabled {
        info!("   Take Profit: {} currency", config.exit.take_profit_currency);
    }
    info!(
        "   Max Open Pairs: {}",
        if config.risk.max_open_pairs == 0 {
            "unbounded".to_string()
        } else {
            config.risk.max_open_pairs.to_string()
        }
    );
    info!("   Max Spread: {} points", config.risk.max_spread);
    info!("   Base Volume: {}", config.sizing.base_volume);
}

fn check_config() -> Result<()> {
    let config = load_config()?;
    let universe = Universe::new(config.universe.instruments.clone())
        .context("Invalid instrument universe")?;
    println!(
        "✅ Configuration valid: {} instruments, {} candidate pairs",
        universe.len(),
        universe.len() * (universe.len() - 1) / 2
    );
    Ok(())
}

fn parse_date(raw: &str, (hour, min, sec): (u32, u32, u32)) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", raw, e))?;
    date.and_hms_opt(hour, min, sec)
        .map(|t| t.and_utc())
        .with_context(|| format!("Invalid time on {}", raw))
}

/// Resolve the requested period, defaulting to the loader's full range.
fn resolve_period(
    loader: &CsvBarLoader,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (data_start, data_end) = loader
        .available_range()
        .context("Data file contains no bars")?;

    info!(
        "   Data range: {} to {}",
        data_start.format("%Y-%m-%d"),
        data_end.format("%Y-%m-%d")
    );
    info!("   Symbols: {}", loader.available_symbols().join(", "));
    info!("   Snapshots: {} ({} bars)", loader.len(), loader.bar_count());

    let start = match start {
        Some(raw) => parse_date(raw, (0, 0, 0))?,
        None => data_start,
    };
    let end = match end {
        Some(raw) => parse_date(raw, (23, 59, 59))?,
        None => data_end,
    };
    if start > end {
        anyhow::bail!("Start {} is after end {}", start, end);
    }

    info!("📅 Period: {} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
    Ok((start, end))
}

/// Warn about configured instruments the data never mentions.
fn check_coverage(config: &Config, loader: &CsvBarLoader) {
    let available = loader.available_symbols();
    for spec in &config.universe.instruments {
        if !available.contains(&spec.symbol) {
            warn!(symbol = %spec.symbol, "No bars for configured instrument");
        }
    }
    if config.risk.max_spread > Decimal::ZERO && !loader.has_quotes() {
        warn!("Data has no bid/ask columns; set risk.max_spread = 0 to disable the spread filter");
    }
}

async fn run_backtest(
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    output_dir: Option<&str>,
    journal: Option<String>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = load_config()?;

    info!("📊 Loading data from: {}", data_path);
    let data_loader = CsvBarLoader::new(data_path)?;
    let (start, end) = resolve_period(&data_loader, start, end)?;
    check_coverage(&config, &data_loader);

    let journal_path = journal.or_else(|| config.persistence.journal_path.clone());
    if let Some(path) = &journal_path {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("📓 Journal: {}", path);
    }

    let backtest_config = BacktestConfig {
        record_equity_curve: true,
        journal_path,
    };

    info!("💰 Initial balance: {:.2}", config.paper.initial_balance);

    let mut engine = BacktestEngine::new(data_loader, config, backtest_config);
    let result = engine.run(start, end).await?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("📁 Equity curve saved to: {}", equity_path);

        let hedges_path = format!("{}/closed_hedges.json", dir);
        std::fs::write(&hedges_path, serde_json::to_string_pretty(&result.closed_hedges)?)?;
        info!("📁 Closed hedges saved to: {}", hedges_path);
    }

    Ok(())
}

async fn run_sweep(
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    parallelism: usize,
    output_dir: Option<&str>,
    minimal: bool,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║           PARAMETER SWEEP MODE                             ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let base_config = load_config()?;

    info!("📊 Loading data from: {}", data_path);
    let data_loader = CsvBarLoader::new(data_path)?;
    let (start, end) = resolve_period(&data_loader, start, end)?;
    check_coverage(&base_config, &data_loader);

    let param_space = if minimal {
        info!("🔧 Using minimal parameter space (quick test)");
        ParameterSpace::minimal()
    } else {
        info!("🔧 Using full parameter space");
        ParameterSpace::default()
    };

    info!("   Combinations to test: {}", param_space.combination_count());
    info!("⚡ Parallelism: {}", parallelism);

    let backtest_config = BacktestConfig {
        record_equity_curve: false, // Save memory during sweeps
        journal_path: None,
    };

    let runner = SweepRunner::new(param_space, base_config, backtest_config, parallelism);
    let results = runner.run(data_loader, start, end).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let results_path = format!("{}/sweep_results.csv", dir);
        results.to_csv(&results_path)?;
        info!("📁 Sweep results saved to: {}", results_path);
    }

    Ok(())
}

fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              HEDGE JOURNAL STATUS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Journal not found: {}", db_path);
        println!("   Run a backtest with --journal, or check the path.");
        return Ok(());
    }

    let journal = HedgeJournal::new(db_path)?;
    let summary = journal.summary()?;

    let win_rate = if summary.closed > 0 {
        Decimal::from(summary.winning) / Decimal::from(summary.closed) * dec!(100)
    } else {
        Decimal::ZERO
    };

    println!("\n📊 Hedge Summary");
    println!("   ├─ Opened:           {}", summary.opened);
    println!("   ├─ Closed:           {}", summary.closed);
    println!("   ├─ Win Rate:         {:.1}%", win_rate);
    println!("   ├─ Points Captured:  {:.1}", summary.total_points);
    println!("   ├─ Currency PnL:     {:.2}", summary.total_currency);
    match summary.last_equity {
        Some(equity) => println!("   ├─ Last Equity:      {:.2}", equity),
        None => println!("   ├─ Last Equity:      n/a"),
    }
    match summary.last_event {
        Some(at) => println!("   └─ Last Event:       {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("   └─ Last Event:       n/a"),
    }

    let open = journal.open_hedges()?;
    if !open.is_empty() {
        println!("\n🔓 Open Hedges");
        for hedge in &open {
            println!("   ┌─ {}/{} {}", hedge.main_symbol, hedge.sub_symbol, hedge.action);
            println!("   ├─ Correlation: {:.3}", hedge.correlation);
            println!("   ├─ Main: {} @ {}", hedge.main_volume, hedge.main_entry);
            println!("   ├─ Sub:  {} @ {}", hedge.sub_volume, hedge.sub_entry);
            match hedge.opened_at {
                Some(at) => println!("   └─ Opened: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("   └─ Opened: n/a"),
            }
        }
    }

    if verbose {
        let events = journal.recent_events(10)?;
        if !events.is_empty() {
            println!("\n📜 Recent Events");
            for event in &events {
                let pnl = match (event.points, event.currency) {
                    (Some(points), Some(currency)) => format!(" {:.1}pt / {:.2}", points, currency),
                    _ => String::new(),
                };
                println!(
                    "   ├─ {} {:5} {}/{} {}{}",
                    event.timestamp.format("%Y-%m-%d %H:%M"),
                    event.kind,
                    event.main_symbol,
                    event.sub_symbol,
                    event.action,
                    pnl
                );
            }
        }
    }

    println!();
    Ok(())
}
