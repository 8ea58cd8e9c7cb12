use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quote-dispatch")]
#[command(about = "Rate-limited quote and daily-history fetcher")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON config file; built-in provider defaults are used when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Overrides the settings file that stores the historical request window
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Quote provider API key, instead of the configured source
    #[arg(long)]
    pub quote_key: Option<String>,

    /// Historical provider API key, instead of the configured source
    #[arg(long)]
    pub historical_key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch real-time quotes, one request per throttle interval
    Quote(SymbolArgs),

    /// Fetch daily history; the provider allows one call per day
    History(SymbolArgs),

    /// Show how long until the next historical request is allowed
    Status,
}

#[derive(Args)]
pub struct SymbolArgs {
    /// Ticker symbols (e.g. AAPL MSFT)
    pub symbols: Vec<String>,

    /// CSV file whose first column lists more symbols
    #[arg(short, long)]
    pub from_file: Option<PathBuf>,
}
