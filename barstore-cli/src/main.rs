//! Barstore CLI: bulk download and store maintenance commands.
//!
//! Commands:
//! - `download`: add every symbol listed in one or more CSV files
//! - `list`: print stored symbols
//! - `show`: print a symbol's bars as CSV
//! - `stale`: report symbols whose last bar is older than the threshold
//! - `refresh`: bring symbols up to date with the provider
//! - `delete`: remove symbols from the store
//! - `status`: per-symbol years, row counts, first and last bar
//! - `verify`: decode every chunk, optionally quarantining corrupt ones

use anyhow::{bail, Context, Result};
use barstore_core::data::{
    ingest_symbols, read_symbol_lists, AlpacaProvider, BarProvider, BarStore, LogProgress,
    ParquetBarStore, ProviderError,
};
use barstore_core::domain::{Bar, Symbol, Timeframe};
use barstore_core::config::MAX_DAYS;
use barstore_core::StoreConfig;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "barstore",
    about = "Barstore CLI: local cache of historical market bars"
)]
struct Cli {
    /// TOML config file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory (overrides the config).
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Bar timeframe, e.g. 1Day or 15Min (overrides the config).
    #[arg(long, global = true)]
    timeframe: Option<Timeframe>,

    /// Debug logging. `RUST_LOG` takes precedence when set.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add every symbol listed in the given CSV files (needs a `Symbol` column).
    Download {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print every stored symbol.
    List,
    /// Print a symbol's stored bars as CSV.
    Show {
        symbol: String,

        /// Start date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: Option<String>,

        /// Only print the most recent bar.
        #[arg(long, default_value_t = false)]
        last: bool,
    },
    /// Report symbols whose last bar is older than the threshold.
    Stale {
        /// Threshold in days. Defaults to the configured value.
        #[arg(long)]
        threshold_days: Option<i64>,
    },
    /// Fetch missing bars for stored symbols.
    Refresh {
        symbols: Vec<String>,

        /// Refresh every symbol past the staleness threshold.
        #[arg(long, default_value_t = false, conflicts_with = "symbols")]
        all_stale: bool,

        /// Threshold in days for --all-stale. Defaults to the configured value.
        #[arg(long)]
        threshold_days: Option<i64>,
    },
    /// Remove symbols and all their stored bars.
    Delete {
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Summarize stored symbols (all of them when none are given).
    Status {
        symbols: Vec<String>,

        /// Emit JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Decode every chunk and report the ones that fail.
    Verify {
        symbols: Vec<String>,

        /// Move corrupt chunks aside so reads skip them.
        #[arg(long, default_value_t = false)]
        quarantine: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Download { files } => run_download(&config, &files),
        Commands::List => run_list(&open_offline(&config)?),
        Commands::Show {
            symbol,
            start,
            end,
            last,
        } => run_show(&open_offline(&config)?, &symbol, start, end, last),
        Commands::Stale { threshold_days } => {
            let threshold = threshold_or_default(&config, threshold_days)?;
            run_stale(&open_offline(&config)?, threshold)
        }
        Commands::Refresh {
            symbols,
            all_stale,
            threshold_days,
        } => {
            let threshold = threshold_or_default(&config, threshold_days)?;
            run_refresh(&config, &symbols, all_stale, threshold)
        }
        Commands::Delete { symbols, confirm } => {
            run_delete(&open_offline(&config)?, &symbols, confirm)
        }
        Commands::Status { symbols, json } => run_status(&open_offline(&config)?, &symbols, json),
        Commands::Verify {
            symbols,
            quarantine,
        } => run_verify(&open_offline(&config)?, &symbols, quarantine),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.store_dir {
        config.root = dir.clone();
    }
    if let Some(timeframe) = cli.timeframe {
        config.timeframe = timeframe;
    }
    Ok(config)
}

fn threshold_or_default(config: &StoreConfig, days: Option<i64>) -> Result<Duration> {
    match days {
        None => Ok(config.stale_threshold()),
        Some(d) if (0..=MAX_DAYS).contains(&d) => Ok(Duration::days(d)),
        Some(d) => bail!("--threshold-days must be between 0 and {MAX_DAYS}, got {d}"),
    }
}

/// Stand-in provider for commands that only read or prune local data.
struct Offline;

impl BarProvider for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn fetch(
        &self,
        _symbol: &Symbol,
        _timeframe: Timeframe,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        Err(ProviderError::Other("no provider configured for this command".into()))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Local-only commands never create a store.
fn open_offline(config: &StoreConfig) -> Result<ParquetBarStore> {
    Ok(ParquetBarStore::from_config_existing(config, Arc::new(Offline))?)
}

fn open_online(config: &StoreConfig) -> Result<ParquetBarStore> {
    let provider = AlpacaProvider::from_env(&config.provider)
        .context("set APCA_API_KEY_ID and APCA_API_SECRET_KEY to fetch bars")?;
    Ok(ParquetBarStore::from_config(config, Arc::new(provider))?)
}

fn parse_symbols(raw: &[String]) -> Result<BTreeSet<Symbol>> {
    raw.iter()
        .map(|s| Symbol::new(s).with_context(|| format!("invalid symbol {s:?}")))
        .collect()
}

/// Explicit symbols, or every stored symbol when none are given.
fn symbols_or_all(store: &ParquetBarStore, raw: &[String]) -> Result<BTreeSet<Symbol>> {
    if raw.is_empty() {
        Ok(store.list_symbols()?)
    } else {
        parse_symbols(raw)
    }
}

fn parse_date(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"))
        })
        .transpose()
}

fn run_download(config: &StoreConfig, files: &[PathBuf]) -> Result<()> {
    let raw_symbols = read_symbol_lists(files)?;
    info!(symbols = raw_symbols.len(), files = files.len(), "read symbol lists");

    let store = open_online(config)?;
    let summary = ingest_symbols(&store, &raw_symbols, &LogProgress);

    if !summary.all_succeeded() {
        for (sym, err) in &summary.failed {
            eprintln!("Error for {sym}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_list(store: &ParquetBarStore) -> Result<()> {
    for symbol in store.list_symbols()? {
        println!("{symbol}");
    }
    Ok(())
}

fn run_show(
    store: &ParquetBarStore,
    symbol: &str,
    start: Option<String>,
    end: Option<String>,
    last: bool,
) -> Result<()> {
    let symbol = Symbol::new(symbol)?;
    let bars = if last {
        vec![store.get_last(&symbol)?]
    } else {
        store.get_range(&symbol, parse_date(start)?, parse_date(end)?)?
    };

    println!("timestamp,open,high,low,close,volume,trade_count,vwap");
    for bar in &bars {
        println!("{}", csv_row(bar));
    }
    Ok(())
}

fn csv_row(bar: &Bar) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        bar.timestamp.to_rfc3339(),
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume,
        bar.trade_count.map(|n| n.to_string()).unwrap_or_default(),
        bar.vwap.map(|v| v.to_string()).unwrap_or_default(),
    )
}

fn run_stale(store: &ParquetBarStore, threshold: Duration) -> Result<()> {
    let stale = store.get_out_of_date(threshold)?;
    if stale.is_empty() {
        println!("All symbols are up to date (threshold {}).", format_age(threshold));
        return Ok(());
    }
    for (symbol, age) in &stale {
        println!("{symbol:<10} {}", format_age(*age));
    }
    Ok(())
}

fn format_age(age: Duration) -> String {
    let days = age.num_days();
    let hours = (age - Duration::days(days)).num_hours();
    format!("{days}d {hours}h")
}

fn run_refresh(
    config: &StoreConfig,
    raw: &[String],
    all_stale: bool,
    threshold: Duration,
) -> Result<()> {
    let store = open_online(config)?;
    let symbols = if all_stale {
        store.get_out_of_date(threshold)?.into_keys().collect()
    } else if raw.is_empty() {
        bail!("give one or more symbols, or --all-stale");
    } else {
        parse_symbols(raw)?
    };

    if symbols.is_empty() {
        info!("nothing to refresh");
        return Ok(());
    }

    store.flush(&symbols)?;
    info!(symbols = symbols.len(), "refresh complete");
    Ok(())
}

fn run_delete(store: &ParquetBarStore, raw: &[String], confirm: bool) -> Result<()> {
    let symbols = parse_symbols(raw)?;
    let missing: Vec<&Symbol> = symbols.iter().filter(|s| !store.contains(s)).collect();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
        bail!("not in store: {}", names.join(", "));
    }

    for symbol in &symbols {
        if confirm {
            store.delete(symbol)?;
            println!("Deleted {symbol}");
        } else {
            println!("Would delete {symbol}");
        }
    }
    if !confirm {
        println!("\nRe-run with --confirm to actually delete.");
    }
    Ok(())
}

fn run_status(store: &ParquetBarStore, raw: &[String], json: bool) -> Result<()> {
    let statuses = symbols_or_all(store, raw)?
        .iter()
        .map(|s| store.status(s))
        .collect::<Result<Vec<_>, _>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("Store:     {}", store.layout().root().display());
    println!("Timeframe: {}", store.timeframe());
    println!("Symbols:   {}", statuses.len());
    if statuses.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<10} {:>8} {:>11} {:<25} {:<25}",
        "Symbol", "Bars", "Years", "First", "Last"
    );
    println!("{}", "-".repeat(83));
    for status in &statuses {
        let years = match (status.years.first(), status.years.last()) {
            (Some(a), Some(b)) if a != b => format!("{a}-{b}"),
            (Some(a), _) => a.to_string(),
            _ => String::new(),
        };
        println!(
            "{:<10} {:>8} {:>11} {:<25} {:<25}",
            status.symbol,
            status.bar_count,
            years,
            status.first.to_rfc3339(),
            status.last.to_rfc3339(),
        );
    }
    Ok(())
}

fn run_verify(store: &ParquetBarStore, raw: &[String], quarantine: bool) -> Result<()> {
    let mut found = 0;
    for symbol in symbols_or_all(store, raw)? {
        for issue in store.verify(&symbol)? {
            found += 1;
            println!(
                "{} {}: {} ({})",
                issue.symbol,
                issue.year,
                issue.reason,
                issue.path.display()
            );
            if quarantine {
                let target = store.quarantine(&issue)?;
                println!("  moved to {}", target.display());
            }
        }
    }

    if found == 0 {
        println!("All chunks decoded cleanly.");
    } else if !quarantine {
        warn!(chunks = found, "corrupt chunks found; re-run with --quarantine to move them aside");
        std::process::exit(1);
    }
    Ok(())
}
