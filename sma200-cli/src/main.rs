//! sma200 CLI: refresh, screen and cache management.
//!
//! Commands:
//! - `refresh`: run the pipeline and print the merged table
//! - `screen`: filter the merged table by deviation and write the CSV export
//! - `latest`: print the last merged snapshot without touching the network
//! - `cache status`: list cache entries with age and row count
//! - `cache clear`: delete every cache entry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sma200_core::cache::{ExpiringCache, FsBlobStore};
use sma200_core::clock::SystemClock;
use sma200_core::screen::{
    above_threshold, below_threshold, deviation_bounds, filter_by_deviation, write_export,
    DEFAULT_ABOVE_THRESHOLD, DEFAULT_BELOW_THRESHOLD,
};
use sma200_core::{MergedRecord, Pipeline, RefreshReport, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sma200",
    about = "S&P 500 distance from the 200-week simple moving average"
)]
struct Cli {
    /// Path to a TOML settings file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory. Overrides the settings file.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every dataset (cache-backed) and print the merged table.
    Refresh {
        /// Ignore cached entries and refetch everything.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Filter the merged table by percent deviation and export it as CSV.
    Screen {
        /// Lower bound, inclusive. Defaults to the table minimum.
        #[arg(long, allow_hyphen_values = true)]
        lower: Option<f64>,

        /// Upper bound, inclusive. Defaults to the table maximum.
        #[arg(long, allow_hyphen_values = true)]
        upper: Option<f64>,

        /// Also list symbols strictly above this deviation.
        #[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_ABOVE_THRESHOLD)]
        above: f64,

        /// Also list symbols strictly below this deviation.
        #[arg(long, allow_hyphen_values = true, default_value_t = DEFAULT_BELOW_THRESHOLD)]
        below: f64,

        /// Directory for the CSV export.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Print the last merged snapshot without refreshing.
    Latest,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cache entries with age and row count.
    Status,
    /// Delete every cache entry.
    Clear {
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

impl Commands {
    /// Name used when reporting a failed command.
    fn label(&self) -> &'static str {
        match self {
            Commands::Refresh { .. } => "refresh",
            Commands::Screen { .. } => "screen",
            Commands::Latest => "latest",
            Commands::Cache {
                action: CacheAction::Status,
            } => "cache status",
            Commands::Cache {
                action: CacheAction::Clear { .. },
            } => "cache clear",
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let label = cli.command.label();
    if let Err(e) = run(cli) {
        eprintln!("{label} failed: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = cli.cache_dir {
        settings.cache_dir = dir;
    }
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Commands::Refresh { force } => run_refresh(settings, force),
        Commands::Screen {
            lower,
            upper,
            above,
            below,
            out,
        } => run_screen(settings, lower, upper, above, below, out),
        Commands::Latest => run_latest(settings),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&settings),
            CacheAction::Clear { confirm } => run_cache_clear(&settings, confirm),
        },
    }
}

fn open_cache(settings: &Settings) -> ExpiringCache {
    ExpiringCache::new(
        Arc::new(FsBlobStore::new(settings.cache_dir.clone())),
        Arc::new(SystemClock),
    )
}

fn run_refresh(settings: Settings, force: bool) -> Result<()> {
    let pipeline = Pipeline::from_settings(settings)?;
    let report = pipeline.refresh(force)?;
    print_report(&report);
    print_table(&report.merged);
    Ok(())
}

fn run_screen(
    settings: Settings,
    lower: Option<f64>,
    upper: Option<f64>,
    above: f64,
    below: f64,
    out: PathBuf,
) -> Result<()> {
    let export_name = settings.export_file_name.clone();
    let pipeline = Pipeline::from_settings(settings)?;
    let report = pipeline.refresh(false)?;
    print_report(&report);

    let Some((min, max)) = report.bounds else {
        println!("No merged rows to screen.");
        return Ok(());
    };
    let lower = lower.unwrap_or(min);
    let upper = upper.unwrap_or(max);

    let filtered = filter_by_deviation(&report.merged, lower, upper);
    println!();
    println!("=== Filtered: {lower:.2}% to {upper:.2}% ===");
    print_table(&filtered);

    println!();
    println!("=== Above {above:.2}% ===");
    print_table(&above_threshold(&report.merged, above));

    println!();
    println!("=== Below {below:.2}% ===");
    print_table(&below_threshold(&report.merged, below));

    let path = write_export(&out, &export_name, &filtered)
        .with_context(|| format!("failed to export to {}", out.display()))?;
    println!();
    println!("Exported {} rows to {}", filtered.len(), path.display());
    Ok(())
}

fn run_latest(settings: Settings) -> Result<()> {
    let cache = open_cache(&settings);
    match cache.get_table::<MergedRecord>(sma200_core::cache::key::MERGED_SNAPSHOT_KEY)? {
        Some(rows) => {
            if let Some((min, max)) = deviation_bounds(&rows) {
                println!("Deviation range: {min:.2}% to {max:.2}%");
            }
            print_table(&rows);
        }
        None => println!("No merged snapshot in {}", settings.cache_dir.display()),
    }
    Ok(())
}

fn run_cache_status(settings: &Settings) -> Result<()> {
    let cache = open_cache(settings);
    let entries = cache.status()?;

    println!("Cache: {}", settings.cache_dir.display());
    println!("Entries: {}", entries.len());
    println!();
    println!(
        "{:<34} {:<16} {:>8} {:>10}",
        "Key", "Kind", "Rows", "Age"
    );
    println!("{}", "-".repeat(71));
    for entry in &entries {
        let (kind, rows) = match &entry.meta {
            Some(meta) => (meta.kind.as_str(), meta.rows.to_string()),
            None => ("(no meta)", "-".to_string()),
        };
        let age = entry
            .age
            .map(format_age)
            .unwrap_or_else(|| "-".to_string());
        println!("{:<34} {:<16} {:>8} {:>10}", entry.key, kind, rows, age);
    }
    Ok(())
}

fn run_cache_clear(settings: &Settings, confirm: bool) -> Result<()> {
    let cache = open_cache(settings);
    if !confirm {
        let entries = cache.status()?;
        println!("Would remove {} entries:", entries.len());
        for entry in &entries {
            println!("  {}", entry.key);
        }
        println!();
        println!("Run with --confirm to actually delete.");
        return Ok(());
    }
    let removed = cache.clear()?;
    println!("Removed {removed} blobs from {}", settings.cache_dir.display());
    Ok(())
}

fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes();
    if minutes < 60 {
        format!("{minutes}m")
    } else if minutes < 48 * 60 {
        format!("{:.1}h", minutes as f64 / 60.0)
    } else {
        format!("{}d", age.num_days())
    }
}

fn print_report(report: &RefreshReport) {
    println!();
    println!("=== Refresh ===");
    println!("Constituents:   {}", report.constituents);
    println!("As of:          {}", report.as_of);
    println!(
        "SMA window:     {} to {}",
        report.window.start, report.window.end
    );
    println!("Merged rows:    {}", report.merged.len());
    if let Some((min, max)) = report.bounds {
        println!("Deviation:      {min:.2}% to {max:.2}%");
    }
}

fn print_table(rows: &[MergedRecord]) {
    println!(
        "{:>12} {:<8} {:<32} {:>12} {:>10} {:<24} {:<32}",
        "% Deviation", "Ticker", "Company", "200 Week SMA", "Close", "Sector", "Industry"
    );
    println!("{}", "-".repeat(136));
    for r in rows {
        println!(
            "{:>12.2} {:<8} {:<32} {:>12.2} {:>10.2} {:<24} {:<32}",
            r.percent_deviation,
            r.symbol,
            truncate(r.company.as_deref().unwrap_or(""), 32),
            r.moving_average_200wk,
            r.close_price,
            truncate(r.sector.as_deref().unwrap_or(""), 24),
            truncate(r.industry.as_deref().unwrap_or(""), 32),
        );
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        s.chars().take(width - 1).chain(std::iter::once('…')).collect()
    }
}
