//! Microstructure replay tool
//!
//! Replays JSON-lines order book and trade feeds through the engines and
//! prints one JSON outcome per line on stdout. Logs go to stderr.

use clap::{Parser, Subcommand};
use microstructure_engine::{
    config::Config, registry::EngineRegistry, types::TradePrint, validation::DataValidator,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "microstructure-replay")]
#[command(about = "Replay order book snapshots through the microstructure engines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze snapshot and trade lines, one JSON outcome per line
    Replay {
        /// JSON-lines input; stdin when omitted or "-"
        input: Option<PathBuf>,

        /// Symbol for lines without a "symbol" field
        #[arg(short, long, default_value = "UNKNOWN")]
        symbol: String,
    },
    /// Validate snapshot lines without analyzing them
    Validate {
        /// JSON-lines input; stdin when omitted or "-"
        input: Option<PathBuf>,

        /// Validate the sanitized snapshot instead of the raw one
        #[arg(long)]
        sanitize: bool,
    },
}

/// `{"symbol": "...", "trade": {"volume": 10.0, "is_buy": true}}`
#[derive(Deserialize)]
struct TradeLine {
    symbol: Option<String>,
    trade: TradePrint,
}

#[derive(Default)]
struct ReplayStats {
    analyzed: usize,
    rejected: usize,
    trades: usize,
    errors: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging, RUST_LOG wins over the config filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.as_str()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Replay { input, symbol } => replay(&config, input, &symbol),
        Commands::Validate { input, sanitize } => validate(input, sanitize),
    }
}

fn open_input(input: Option<PathBuf>) -> anyhow::Result<Box<dyn BufRead>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(&path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn replay(config: &Config, input: Option<PathBuf>, default_symbol: &str) -> anyhow::Result<()> {
    tracing::info!("Starting replay");

    let registry = EngineRegistry::from_config(config);
    let reader = open_input(input)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut stats = ReplayStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;

        let output = match replay_line(&registry, &line, default_symbol, &mut stats) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Line {}: {}", line_no, e);
                stats.errors += 1;
                json!({ "status": "error", "line": line_no, "error": e.to_string() })
            }
        };
        writeln!(out, "{}", serde_json::to_string(&output)?)?;
    }

    tracing::info!(
        "Replay done: {} analyzed, {} rejected, {} trades, {} errors across {} symbols",
        stats.analyzed,
        stats.rejected,
        stats.trades,
        stats.errors,
        registry.len()
    );
    Ok(())
}

fn replay_line(
    registry: &EngineRegistry,
    line: &str,
    default_symbol: &str,
    stats: &mut ReplayStats,
) -> anyhow::Result<Value> {
    let raw: Value = serde_json::from_str(line)?;

    if raw.get("trade").is_some() {
        let trade: TradeLine = serde_json::from_value(raw)?;
        let symbol = trade.symbol.as_deref().unwrap_or(default_symbol);
        let vpin = registry.record_trade(symbol, trade.trade)?;
        stats.trades += 1;
        return Ok(json!({ "status": "trade", "symbol": symbol, "vpin": vpin }));
    }

    let symbol = raw
        .get("symbol")
        .and_then(Value::as_str)
        .unwrap_or(default_symbol)
        .to_string();
    let outcome = registry.process_snapshot(&symbol, &raw)?;
    if outcome.is_rejected() {
        stats.rejected += 1;
    } else {
        stats.analyzed += 1;
    }
    Ok(serde_json::to_value(&outcome)?)
}

fn validate(input: Option<PathBuf>, sanitize: bool) -> anyhow::Result<()> {
    let reader = open_input(input)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut invalid = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let raw: Value = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                invalid += 1;
                let output = json!({ "line": index + 1, "is_valid": false, "errors": [e.to_string()] });
                writeln!(out, "{}", serde_json::to_string(&output)?)?;
                continue;
            }
        };
        let snapshot = if sanitize {
            DataValidator::sanitize_snapshot(&raw)
        } else {
            raw
        };

        let result = DataValidator::validate_snapshot(&snapshot);
        if !result.is_valid {
            invalid += 1;
        }
        let mut output = serde_json::to_value(&result)?;
        output["line"] = json!(index + 1);
        writeln!(out, "{}", serde_json::to_string(&output)?)?;
    }

    tracing::info!("Validation done: {} invalid lines", invalid);
    Ok(())
}
