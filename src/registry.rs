//! Per-symbol engine registry
//!
//! Owns one [`MicrostructureAnalyzer`] and one [`AnomalyDetector`] per symbol
//! and runs raw snapshots through validation, book construction and both
//! engines. Each symbol's engines sit behind their own mutex, so snapshots
//! for one symbol are processed strictly in order while different symbols
//! proceed independently.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::anomaly::{AnomalyDetector, DetectorConfig, MarketState};
use crate::config::Config;
use crate::error::{AnalyticsError, Result};
use crate::orderbook::{AnalyzerConfig, MetricsInterpretation, MicrostructureAnalyzer, MicrostructureMetrics};
use crate::types::{OrderBook, TradePrint};
use crate::validation::{DataValidator, ValidationResult};

/// Epoch values above this are taken as milliseconds
const EPOCH_MILLIS_CUTOFF: f64 = 1e12;

/// Full analysis of one accepted snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotReport {
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metrics: MicrostructureMetrics,
    pub interpretation: MetricsInterpretation,
    pub state: MarketState,
    /// Validator warnings, e.g. a wide spread
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SnapshotOutcome {
    /// Failed validation; no engine state was touched
    Rejected { validation: ValidationResult },
    Analyzed(SnapshotReport),
}

impl SnapshotOutcome {
    pub fn report(&self) -> Option<&SnapshotReport> {
        match self {
            SnapshotOutcome::Analyzed(report) => Some(report),
            SnapshotOutcome::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SnapshotOutcome::Rejected { .. })
    }
}

struct SymbolEngines {
    analyzer: MicrostructureAnalyzer,
    detector: AnomalyDetector,
}

pub struct EngineRegistry {
    analyzer_config: AnalyzerConfig,
    detector_config: DetectorConfig,
    engines: RwLock<HashMap<String, Arc<Mutex<SymbolEngines>>>>,
}

impl EngineRegistry {
    pub fn new(analyzer_config: AnalyzerConfig, detector_config: DetectorConfig) -> Self {
        Self {
            analyzer_config,
            detector_config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.analyzer.clone(), config.detector.clone())
    }

    /// Validate, parse and analyze one raw snapshot for `symbol`.
    ///
    /// Validation failures come back as [`SnapshotOutcome::Rejected`]; an
    /// `Err` means the snapshot passed validation but still could not be
    /// analyzed.
    pub fn process_snapshot(&self, symbol: &str, raw: &Value) -> Result<SnapshotOutcome> {
        let validation = DataValidator::validate_snapshot(raw);
        if !validation.is_valid {
            tracing::warn!("[{}] Rejected snapshot: {}", symbol, validation.errors.join("; "));
            return Ok(SnapshotOutcome::Rejected { validation });
        }

        // Levels past the validator's depth are range-checked here
        let timestamp = raw.get("timestamp").and_then(parse_timestamp);
        let book = match OrderBook::from_snapshot(raw, timestamp) {
            Ok(book) => book,
            Err(AnalyticsError::InvalidInput(message)) => {
                tracing::warn!("[{}] Rejected snapshot: {}", symbol, message);
                return Ok(SnapshotOutcome::Rejected {
                    validation: ValidationResult {
                        is_valid: false,
                        errors: vec![message],
                        warnings: validation.warnings,
                    },
                });
            }
            Err(e) => return Err(e),
        };
        self.process_book(symbol, &book, validation.warnings)
    }

    /// Run an already-built book through both engines
    pub fn process_book(&self, symbol: &str, book: &OrderBook, warnings: Vec<String>) -> Result<SnapshotOutcome> {
        let engines = self.engines_for(symbol);
        let mut engines = engines.lock();

        let metrics = engines.analyzer.analyze(book)?;
        let state = engines.detector.analyze(book);

        tracing::debug!(
            "[{}] mid={:.6} ofi={:.4} obi={:.4} regime={} risk={:.1}",
            symbol,
            metrics.mid_price,
            metrics.ofi,
            metrics.obi,
            state.regime,
            state.overall_risk_score
        );

        Ok(SnapshotOutcome::Analyzed(SnapshotReport {
            symbol: symbol.to_string(),
            timestamp: book.timestamp,
            interpretation: metrics.interpret(),
            metrics,
            state,
            warnings,
        }))
    }

    /// Feed a trade print into the symbol's VPIN buckets
    pub fn record_trade(&self, symbol: &str, trade: TradePrint) -> Result<Option<f64>> {
        let engines = self.engines_for(symbol);
        let vpin = engines.lock().analyzer.process_trade(trade)?;
        Ok(vpin)
    }

    /// Reset both engines for `symbol`. Returns false if the symbol is unknown.
    pub fn reset(&self, symbol: &str) -> bool {
        let engines = self.engines.read().get(symbol).cloned();
        match engines {
            Some(engines) => {
                let mut engines = engines.lock();
                engines.analyzer.reset();
                engines.detector.reset();
                tracing::info!("[{}] Engines reset", symbol);
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for engines in self.engines.read().values() {
            let mut engines = engines.lock();
            engines.analyzer.reset();
            engines.detector.reset();
        }
        tracing::info!("All engines reset");
    }

    pub fn remove(&self, symbol: &str) -> bool {
        self.engines.write().remove(symbol).is_some()
    }

    /// Known symbols, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.engines.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.engines.read().contains_key(symbol)
    }

    fn engines_for(&self, symbol: &str) -> Arc<Mutex<SymbolEngines>> {
        if let Some(engines) = self.engines.read().get(symbol) {
            return Arc::clone(engines);
        }

        let mut map = self.engines.write();
        let engines = map.entry(symbol.to_string()).or_insert_with(|| {
            tracing::info!("[{}] Creating engines", symbol);
            Arc::new(Mutex::new(SymbolEngines {
                analyzer: MicrostructureAnalyzer::with_config(self.analyzer_config.clone()),
                detector: AnomalyDetector::with_config(self.detector_config.clone()),
            }))
        });
        Arc::clone(engines)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default(), DetectorConfig::default())
    }
}

/// RFC 3339 string, or epoch seconds / milliseconds as a number
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() || raw < 0.0 {
                return None;
            }
            if raw > EPOCH_MILLIS_CUTOFF {
                DateTime::from_timestamp_millis(raw as i64)
            } else {
                let secs = raw.trunc() as i64;
                let nanos = ((raw - raw.trunc()) * 1e9) as u32;
                DateTime::from_timestamp(secs, nanos)
            }
        }
        _ => None,
    }
}
