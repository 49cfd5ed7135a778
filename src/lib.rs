//! Order Book Microstructure Engine
//!
//! Streaming analytics and manipulation detection over L2 order book
//! snapshots, one engine pair per symbol.
//!
//! ## Architecture
//!
//! ```text
//! raw snapshot → DataValidator → OrderBook ─┬→ MicrostructureAnalyzer → MicrostructureMetrics
//!                                           └→ AnomalyDetector        → MarketState (anomalies, regime)
//!                                                      ↑
//!                          trade prints → VPIN buckets (analyzer)
//! ```
//!
//! [`registry::EngineRegistry`] wires the pipeline together per symbol.

pub mod anomaly;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod regime;
pub mod registry;
pub mod testing;
pub mod types;
pub mod utils;
pub mod validation;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalySeverity, AnomalyType, MarketState};
pub use error::{AnalyticsError, Result};
pub use orderbook::{MicrostructureAnalyzer, MicrostructureMetrics};
pub use regime::MarketRegime;
pub use registry::{EngineRegistry, SnapshotOutcome, SnapshotReport};
pub use types::{BookSide, OrderBook, OrderBookLevel, TradePrint};
pub use validation::{DataValidator, ValidationResult};
