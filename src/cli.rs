use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Crawl, enrich and verify product catalogs")]
pub struct Cli {
    /// Data directory holding one JSON file per Source (overrides CATALOG_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Crawl plan (overrides CATALOG_SOURCES).
    #[arg(long, global = true)]
    pub sources: Option<PathBuf>,

    /// Restrict the run to these Source files (overrides ONLY_FILES).
    #[arg(long = "only", global = true, value_delimiter = ',')]
    pub only_files: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in, crawl every Source and merge the results into the data files.
    Crawl,
    /// Fill missing prices through the price cache.
    Refresh(RefreshArgs),
    /// Fetch detail pages for descriptions, tags and attributes.
    Enrich(RefreshArgs),
    /// Compare stored prices with live ones and write a CSV report.
    Verify(VerifyArgs),
    /// Look up the current price of one product URL.
    Price(PriceArgs),
    /// Run `refresh` now and then on a cron schedule.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Re-fetch even when a value is already stored.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Directory for the CSV report (defaults to the data directory).
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Maximum number of items to check (overrides VERIFY_LIMIT).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Allowed drift in percent (overrides VERIFY_TOLERANCE).
    #[arg(long)]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Args)]
pub struct PriceArgs {
    /// Product detail page URL.
    #[arg(long)]
    pub url: String,

    /// Stored price in cents, used when the live lookup fails.
    #[arg(long)]
    pub stored: Option<i64>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Six-field cron expression (seconds first).
    #[arg(long, default_value = "0 0 */6 * * *")]
    pub schedule: String,

    #[arg(long)]
    pub force: bool,
}
