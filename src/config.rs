//! Configuration management
//!
//! Layered loading: `.env`, an optional TOML file, then
//! `MICROSTRUCTURE__<SECTION>__<KEY>` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AnalyticsError, Result};

pub use crate::anomaly::DetectorConfig;
pub use crate::orderbook::AnalyzerConfig;

/// Environment prefix for overrides, e.g. `MICROSTRUCTURE__DETECTOR__EWMA_ALPHA`
pub const ENV_PREFIX: &str = "MICROSTRUCTURE";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    pub detector: DetectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// A missing file is not an error; defaults and env overrides still apply.
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let expanded = shellexpand::tilde(path);
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(expanded.as_ref())).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks the type system cannot express
    pub fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        let d = &self.detector;

        for (name, value) in [
            ("analyzer.ofi_window", a.ofi_window),
            ("analyzer.price_history_size", a.price_history_size),
            ("analyzer.obi_levels", a.obi_levels),
            ("analyzer.vpin_bucket_count", a.vpin_bucket_count),
            ("detector.price_history_size", d.price_history_size),
            ("detector.timestamp_history_size", d.timestamp_history_size),
        ] {
            if value == 0 {
                return Err(AnalyticsError::Config(format!("{name} must be at least 1")));
            }
        }

        if a.volatility_window < 2 {
            return Err(AnalyticsError::Config(
                "analyzer.volatility_window must be at least 2".into(),
            ));
        }
        if a.volatility_window > a.price_history_size {
            return Err(AnalyticsError::Config(format!(
                "analyzer.volatility_window ({}) exceeds analyzer.price_history_size ({})",
                a.volatility_window, a.price_history_size
            )));
        }
        if !(a.vpin_bucket_size.is_finite() && a.vpin_bucket_size > 0.0) {
            return Err(AnalyticsError::Config(format!(
                "analyzer.vpin_bucket_size must be positive, got {}",
                a.vpin_bucket_size
            )));
        }
        if !(a.decay_factor > 0.0 && a.decay_factor <= 1.0) {
            return Err(AnalyticsError::Config(format!(
                "analyzer.decay_factor must be in (0, 1], got {}",
                a.decay_factor
            )));
        }
        if !(d.ewma_alpha > 0.0 && d.ewma_alpha <= 1.0) {
            return Err(AnalyticsError::Config(format!(
                "detector.ewma_alpha must be in (0, 1], got {}",
                d.ewma_alpha
            )));
        }
        if !(d.imbalance_threshold >= 0.0 && d.imbalance_threshold < 1.0) {
            return Err(AnalyticsError::Config(format!(
                "detector.imbalance_threshold must be in [0, 1), got {}",
                d.imbalance_threshold
            )));
        }

        for (name, value) in [
            ("detector.spoofing_volume_threshold", d.spoofing_volume_threshold),
            ("detector.liquidity_gap_threshold", d.liquidity_gap_threshold),
            ("detector.spread_shock_multiplier", d.spread_shock_multiplier),
            ("detector.initial_l1_volume", d.initial_l1_volume),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AnalyticsError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        Ok(())
    }
}
