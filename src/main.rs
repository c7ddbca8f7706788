//! nsefetch - Fetch NSE India market data from the command line
//!
//! Quotes for many symbols are fetched concurrently, cached on disk and
//! retried with exponential backoff when the API hiccups.

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use nsefetch::cli::{parse_symbol_arg, CacheCommand, Cli, Command, MoversArgs};
use nsefetch::config::Config;
use nsefetch::market::{
    index_cache_key, parse_market_status, quote_cache_key, symbol_from_quote_key, top_movers,
    Direction, MarketClient,
};
use nsefetch::{export, logging, CacheStore, FetchOrchestrator, Resolution};

const MARKET_STATUS_KEY: &str = "market_status";

/// Cancels `token` on Ctrl-C so pending requests stop and partial results are kept
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling pending requests");
            token.cancel();
        }
    });
}

/// Prints every failed key and reports whether there were any
fn report_failures<T>(resolution: &Resolution<T>) -> bool {
    let mut failures: Vec<_> = resolution.failures.iter().collect();
    failures.sort_by(|a, b| a.0.cmp(b.0));
    for (key, err) in &failures {
        let name = symbol_from_quote_key(key).unwrap_or(key.as_str());
        eprintln!("{name}: {err}");
    }
    !failures.is_empty()
}

/// One export row per symbol, with the symbol in a `symbol` column
fn quote_rows(quotes: &BTreeMap<String, Value>) -> Vec<Value> {
    quotes
        .iter()
        .map(|(symbol, quote)| {
            let mut row = serde_json::Map::new();
            row.insert("symbol".to_string(), Value::String(symbol.clone()));
            match quote {
                Value::Object(fields) => row.extend(fields.clone()),
                other => {
                    row.insert("value".to_string(), other.clone());
                }
            }
            Value::Object(row)
        })
        .collect()
}

async fn run_quote(
    config: &Config,
    symbols: &[String],
    output: Option<&std::path::Path>,
    cancel: &CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = MarketClient::new(&config.client)?;
    let orchestrator = FetchOrchestrator::with_cache(CacheStore::from_config(&config.cache));

    let mut keys = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        keys.push(quote_cache_key(&parse_symbol_arg(symbol)?));
    }

    let fetch = move |key: String| {
        let client = client.clone();
        async move {
            let symbol = symbol_from_quote_key(&key).unwrap_or(key.as_str());
            client.fetch_quote(symbol).await
        }
    };

    let resolution: Resolution<Value> = orchestrator
        .resolve_all(keys, fetch, &config.fetch, cancel)
        .await;
    let failed = report_failures(&resolution);

    let quotes: BTreeMap<String, Value> = resolution
        .values
        .into_iter()
        .map(|(key, quote)| {
            let symbol = symbol_from_quote_key(&key).unwrap_or(key.as_str()).to_string();
            (symbol, quote)
        })
        .collect();

    match output {
        Some(path) => {
            let format = export::to_path(&quote_rows(&quotes), path)?;
            eprintln!("Wrote {} quote(s) to {} ({:?})", quotes.len(), path.display(), format);
        }
        None => println!("{}", export::render_json(&quotes)?),
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn run_status(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = MarketClient::new(&config.client)?;
    let orchestrator = FetchOrchestrator::with_cache(CacheStore::from_config(&config.cache));

    let fetch = move |_key: String| {
        let client = client.clone();
        async move { client.fetch_market_status().await }
    };

    let resolution: Resolution<Value> = orchestrator
        .resolve_all([MARKET_STATUS_KEY], fetch, &config.fetch, cancel)
        .await;
    let failed = report_failures(&resolution);

    if let Some(payload) = resolution.values.get(MARKET_STATUS_KEY) {
        let segments = parse_market_status(payload)?;
        println!("{}", export::render_json(&segments)?);
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn run_movers(
    config: &Config,
    args: &MoversArgs,
    direction: Direction,
    cancel: &CancellationToken,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = MarketClient::new(&config.client)?;
    let orchestrator = FetchOrchestrator::with_cache(CacheStore::from_config(&config.cache));
    let key = index_cache_key(&args.index);

    let index = args.index.clone();
    let fetch = move |_key: String| {
        let client = client.clone();
        let index = index.clone();
        async move { client.fetch_index(&index).await }
    };

    let resolution: Resolution<Value> = orchestrator
        .resolve_all([key.clone()], fetch, &config.fetch, cancel)
        .await;
    let failed = report_failures(&resolution);

    if let Some(payload) = resolution.values.get(&key) {
        let movers = top_movers(payload, &args.index, direction, args.count);
        println!("{}", export::render_json(&movers)?);
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn run_cache(
    config: &Config,
    action: &CacheCommand,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let Some(store) = CacheStore::from_config(&config.cache) else {
        eprintln!("Caching is disabled or no cache directory is available");
        return Ok(ExitCode::FAILURE);
    };

    match action {
        CacheCommand::Clear => {
            let removed = store.clear()?;
            println!("Removed {removed} cached response(s) from {}", store.dir().display());
        }
        CacheCommand::Delete { symbols } => {
            for symbol in symbols {
                let symbol = parse_symbol_arg(symbol)?;
                store.delete(&quote_cache_key(&symbol))?;
                println!("Removed cached quote for {symbol}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match &cli.command {
        Command::Quote { symbols, output } => {
            run_quote(&config, symbols, output.as_deref(), &cancel).await
        }
        Command::Status => run_status(&config, &cancel).await,
        Command::Gainers(args) => run_movers(&config, args, Direction::Gainers, &cancel).await,
        Command::Losers(args) => run_movers(&config, args, Direction::Losers, &cancel).await,
        Command::Cache { action } => run_cache(&config, action),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = logging::init(&config.log) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
