mod cli;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use cli::{Cli, Commands, SymbolArgs};
use quote_dispatch::config::{self, Config, KeySource};
use quote_dispatch::dispatch::{
    Collaborators, DispatchEvent, Dispatcher, DispatcherHandle, EventReceiver,
};
use quote_dispatch::fetch::{RequestKind, ReqwestTransport, Symbol};
use quote_dispatch::settings::{ConfiguredCredentials, JsonSettingsStore};
use quote_dispatch::utils::{format_countdown, read_symbol_file, SystemClock};

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Quote(ref args) => fetch(config, args, RequestKind::Quote).await,
        Commands::History(ref args) => fetch(config, args, RequestKind::Historical).await,
        Commands::Status => show_status(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            config::load_config(DEFAULT_CONFIG_FILE)?
        }
        None => {
            debug!("No config file found, using built-in provider defaults");
            Config::builtin()
        }
    };

    if let Some(path) = &cli.settings {
        config.settings_path = path.clone();
    }
    if let Some(key) = &cli.quote_key {
        config.credentials.quote = KeySource::Literal(key.clone());
    }
    if let Some(key) = &cli.historical_key {
        config.credentials.historical = KeySource::Literal(key.clone());
    }
    Ok(config)
}

fn start(config: Config) -> Result<(DispatcherHandle, EventReceiver)> {
    let collaborators = Collaborators {
        transport: Box::new(ReqwestTransport::new(&config.http)?),
        settings: Arc::new(JsonSettingsStore::new(config.settings_path.clone())),
        credentials: Arc::new(ConfiguredCredentials::new(&config.credentials)),
        clock: Arc::new(SystemClock),
    };
    let (handle, events, _task) = Dispatcher::spawn(config, collaborators)?;
    Ok((handle, events))
}

async fn fetch(config: Config, args: &SymbolArgs, kind: RequestKind) -> Result<()> {
    let raw_symbols = collect_symbols(args)?;
    if raw_symbols.is_empty() {
        anyhow::bail!("No symbols given. Pass them as arguments or with --from-file.");
    }

    let (handle, mut events) = start(config)?;

    let mut pending = BTreeSet::new();
    for raw in &raw_symbols {
        match handle.enqueue(raw, kind).await {
            Ok(_) => {
                pending.insert(Symbol::parse(raw)?);
            }
            Err(err) => eprintln!("Skipping {:?}: {}", raw, err),
        }
    }
    info!("Queued {} {} request(s)", pending.len(), kind.slug());

    while !pending.is_empty() {
        let Some(event) = events.recv().await else {
            break;
        };
        if let Some(symbol) = report(&event) {
            pending.remove(&symbol);
        }
        // The window will not reopen for hours; stop instead of waiting on it.
        if matches!(
            event,
            DispatchEvent::RateLimitExceeded {
                kind: RequestKind::Historical,
                ..
            }
        ) {
            break;
        }
    }

    handle.shutdown().await.context("Failed to stop dispatcher")?;
    while let Some(event) = events.recv().await {
        if let Some(symbol) = report(&event) {
            pending.remove(&symbol);
        }
    }
    if !pending.is_empty() {
        println!("{} symbol(s) left unfetched.", pending.len());
    }
    Ok(())
}

/// Print one event; returns the symbol it settles, if any.
fn report(event: &DispatchEvent) -> Option<Symbol> {
    match event {
        DispatchEvent::DownloadStarted { description, .. } => {
            println!("Downloading {}...", description);
            None
        }
        DispatchEvent::DownloadProgress { id, percent } => {
            debug!("{}: {}%", id, percent);
            None
        }
        DispatchEvent::DownloadCompleted { id } => {
            debug!("{} finished", id);
            None
        }
        DispatchEvent::DownloadError { id, message } => {
            eprintln!("{} failed: {}", id, message);
            None
        }
        DispatchEvent::QuoteReady { symbol, quote } => {
            println!(
                "{:<8} {:>10.2} {:>+9.2} ({}%)  high {}  low {}",
                symbol.as_str(),
                quote.price,
                quote.change,
                optional(quote.percent_change),
                optional(quote.day_high),
                optional(quote.day_low)
            );
            Some(symbol.clone())
        }
        DispatchEvent::HistoricalReady { symbol, series } => {
            println!("{}: {} daily bar(s)", symbol, series.len());
            if let Some((day, bar)) = series.iter().next_back() {
                let date = chrono::DateTime::from_timestamp(*day, 0)
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| day.to_string());
                println!(
                    "  latest {}  open {:.2}  high {:.2}  low {:.2}  close {:.2}  volume {}",
                    date, bar.open, bar.high, bar.low, bar.close, bar.volume
                );
            }
            Some(symbol.clone())
        }
        DispatchEvent::InvalidPayload { symbol, message }
        | DispatchEvent::FetchError { symbol, message } => {
            eprintln!("{}: {}", symbol, message);
            Some(symbol.clone())
        }
        DispatchEvent::RateLimitExceeded {
            symbol, message, ..
        } => {
            eprintln!("{}", message);
            symbol.clone()
        }
    }
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

async fn show_status(config: Config) -> Result<()> {
    let (handle, _events) = start(config)?;
    let remaining = handle.time_to_next_historical().await?;
    if remaining > 0 {
        println!("Next historical request allowed in {}", format_countdown(remaining));
    } else {
        println!("A historical request can be sent now.");
    }
    handle.shutdown().await?;
    Ok(())
}

fn collect_symbols(args: &SymbolArgs) -> Result<Vec<String>> {
    let mut symbols = args.symbols.clone();
    if let Some(path) = &args.from_file {
        let from_file = read_symbol_file(path)
            .with_context(|| format!("Failed to read symbol file {}", path.display()))?;
        symbols.extend(from_file);
    }
    Ok(symbols)
}
