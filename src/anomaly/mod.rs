//! Market Anomaly Detection Module
//!
//! Flags manipulation patterns and stress in successive L2 snapshots:
//! - Spoofing: a single order far above normal top-of-book size
//! - Layering: several large orders stacked on one side
//! - Liquidity gaps: thin levels near the top of book
//! - Heavy imbalance: extreme top-5 depth skew
//! - Spread shock: spread z-score against its EWMA baseline
//!
//! Each snapshot yields a [`MarketState`] with the anomalies in detector run
//! order, risk roll-ups and a [`MarketRegime`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::regime::{classify_regime, MarketRegime, RiskLevel};
use crate::types::{BookSide, OrderBook};
use crate::utils::{serde_round, Ewma, RollingWindow, EPSILON};


/// Levels per side scanned by the spoofing, layering and imbalance checks
const TOP_LEVELS: usize = 5;

/// Levels per side scanned for liquidity gaps
const GAP_SCAN_LEVELS: usize = 10;

/// Liquidity gaps reported per snapshot
const MAX_GAP_ANOMALIES: usize = 5;

/// Layering threshold as a multiple of average top-of-book volume
const LAYERING_VOLUME_MULTIPLE: f64 = 2.0;

/// Divisor normalizing summed anomaly risk in the overall score
const ANOMALY_RISK_DIVISOR: f64 = 5.0;

/// Types of market anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    Spoofing,
    Layering,
    LiquidityGap,
    HeavyImbalance,
    SpreadShock,
    /// Reserved, no detector emits it
    QuoteStuffing,
    /// Reserved, no detector emits it
    MomentumIgnition,
    /// Reserved, no detector emits it
    WashTrading,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Spoofing => "SPOOFING",
            AnomalyType::Layering => "LAYERING",
            AnomalyType::LiquidityGap => "LIQUIDITY_GAP",
            AnomalyType::HeavyImbalance => "HEAVY_IMBALANCE",
            AnomalyType::SpreadShock => "SPREAD_SHOCK",
            AnomalyType::QuoteStuffing => "QUOTE_STUFFING",
            AnomalyType::MomentumIgnition => "MOMENTUM_IGNITION",
            AnomalyType::WashTrading => "WASH_TRADING",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity levels for anomalies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Per-type detail fields, flattened into the anomaly when serialized
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnomalyDetails {
    Spoofing {
        side: BookSide,
        /// 1-based level index
        level: usize,
        price: f64,
        volume: f64,
        avg_volume: f64,
    },
    Layering {
        side: BookSide,
        large_order_count: usize,
    },
    LiquidityGap {
        #[serde(serialize_with = "lowercase_side")]
        side: BookSide,
        level: usize,
        price: f64,
        volume: f64,
    },
    HeavyImbalance {
        side: BookSide,
        imbalance: f64,
        bid_depth: f64,
        ask_depth: f64,
    },
    SpreadShock {
        current_spread: f64,
        avg_spread: f64,
        z_score: f64,
    },
}

fn lowercase_side<S: Serializer>(side: &BookSide, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&side.as_str().to_lowercase())
}

/// A detected market anomaly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// 0-100
    #[serde(serialize_with = "serde_round::one")]
    pub risk_score: f64,
    #[serde(flatten)]
    pub details: AnomalyDetails,
}

/// Market assessment for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketState {
    pub regime: MarketRegime,
    pub anomalies: Vec<Anomaly>,
    #[serde(serialize_with = "serde_round::one")]
    pub overall_risk_score: f64,
    #[serde(serialize_with = "serde_round::one")]
    pub spoofing_risk: f64,
    #[serde(serialize_with = "serde_round::one")]
    pub liquidity_score: f64,
}

impl MarketState {
    /// State reported for a one-sided or empty book
    pub fn neutral() -> Self {
        Self {
            regime: MarketRegime::Calm,
            anomalies: Vec::new(),
            overall_risk_score: 0.0,
            spoofing_risk: 0.0,
            liquidity_score: 100.0,
        }
    }

    pub fn has_critical_anomalies(&self) -> bool {
        self.anomalies
            .iter()
            .any(|a| a.severity == AnomalySeverity::Critical)
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.overall_risk_score)
    }

    pub fn count_of(&self, anomaly_type: AnomalyType) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.anomaly_type == anomaly_type)
            .count()
    }
}

/// One oversized order found by [`AnomalyDetector::scan_spoofing`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoofingSuspect {
    pub side: BookSide,
    pub level: usize,
    pub price: f64,
    pub volume: f64,
    /// Volume as a multiple of average top-of-book volume
    pub multiplier: f64,
    #[serde(serialize_with = "serde_round::one")]
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoofingScan {
    pub spoofing_detected: bool,
    pub suspicious_orders: Vec<SpoofingSuspect>,
    pub count: usize,
    pub threshold_used: f64,
    pub avg_volume: f64,
}

/// Configuration for anomaly detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Multiple of average L1 volume that marks a spoofing candidate
    pub spoofing_volume_threshold: f64,

    /// Minimum volume for a level to count as liquid
    pub liquidity_gap_threshold: f64,

    /// |top-5 imbalance| above which a heavy imbalance fires
    pub imbalance_threshold: f64,

    /// Spread z-score above which a spread shock fires
    pub spread_shock_multiplier: f64,

    /// EWMA smoothing factor for spread and volume baselines
    pub ewma_alpha: f64,

    /// Seed for the average L1 volume baseline
    pub initial_l1_volume: f64,

    pub price_history_size: usize,
    pub timestamp_history_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            spoofing_volume_threshold: 5.0,
            liquidity_gap_threshold: 50.0,
            imbalance_threshold: 0.7,
            spread_shock_multiplier: 3.0,
            ewma_alpha: 0.05,
            initial_l1_volume: 100.0,
            price_history_size: 50,
            timestamp_history_size: 100,
        }
    }
}

/// Stateful anomaly detector for a single symbol
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,

    avg_spread: Ewma,
    avg_spread_sq: Ewma,
    avg_l1_volume: Ewma,

    prev_book: Option<OrderBook>,
    order_timestamps: RollingWindow<DateTime<Utc>>,
    price_history: RollingWindow<f64>,
    spoofing_events: u64,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self {
            avg_spread: Ewma::new(config.ewma_alpha, 0.0),
            avg_spread_sq: Ewma::new(config.ewma_alpha, 0.0),
            avg_l1_volume: Ewma::new(config.ewma_alpha, config.initial_l1_volume),
            prev_book: None,
            order_timestamps: RollingWindow::new(config.timestamp_history_size),
            price_history: RollingWindow::new(config.price_history_size),
            spoofing_events: 0,
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Analyze one snapshot.
    ///
    /// A book missing either side returns [`MarketState::neutral`] and leaves
    /// all state untouched.
    pub fn analyze(&mut self, book: &OrderBook) -> MarketState {
        if !book.is_two_sided() {
            return MarketState::neutral();
        }

        let now = book.timestamp.unwrap_or_else(Utc::now);

        self.update_statistics(book);
        self.order_timestamps.push(now);
        if let Some(mid) = book.mid_price() {
            self.price_history.push(mid);
        }

        let mut anomalies = Vec::new();
        anomalies.extend(self.detect_spoofing(book, now));
        anomalies.extend(self.detect_layering(book, now));
        anomalies.extend(self.detect_liquidity_gaps(book, now));
        anomalies.extend(self.detect_heavy_imbalance(book, now));
        anomalies.extend(self.detect_spread_shock(book, now));

        let spoofing_risk = self.calculate_spoofing_risk(book);
        let liquidity_score = Self::calculate_liquidity_score(book);
        let overall_risk = Self::calculate_overall_risk(&anomalies, spoofing_risk, liquidity_score);
        let regime = classify_regime(&anomalies, overall_risk);

        for anomaly in anomalies.iter().filter(|a| a.severity >= AnomalySeverity::High) {
            tracing::warn!(
                "{} ({:?}, risk {:.1}): {}",
                anomaly.anomaly_type,
                anomaly.severity,
                anomaly.risk_score,
                anomaly.message
            );
        }

        self.prev_book = Some(book.clone());

        MarketState {
            regime,
            anomalies,
            overall_risk_score: overall_risk,
            spoofing_risk,
            liquidity_score,
        }
    }

    /// List every top-level order above `avg_l1_volume * multiplier`.
    ///
    /// Read-only diagnostic; unlike `analyze` it does not stop at the first
    /// match and does not touch any baseline.
    pub fn scan_spoofing(&self, book: &OrderBook, multiplier: f64) -> SpoofingScan {
        let avg_volume = match self.avg_l1_volume.value() {
            v if v > 0.0 => v,
            _ => self.config.initial_l1_volume,
        };
        let threshold = avg_volume * multiplier;

        let suspicious_orders: Vec<SpoofingSuspect> = [BookSide::Bid, BookSide::Ask]
            .into_iter()
            .flat_map(move |side| {
                book.levels(side)
                    .iter()
                    .take(TOP_LEVELS)
                    .enumerate()
                    .filter(move |(_, level)| level.volume > threshold)
                    .map(move |(i, level)| SpoofingSuspect {
                        side,
                        level: i + 1,
                        price: level.price,
                        volume: level.volume,
                        multiplier: level.volume / avg_volume,
                        risk_score: (level.volume / threshold * 50.0).min(100.0),
                    })
            })
            .collect();

        SpoofingScan {
            spoofing_detected: !suspicious_orders.is_empty(),
            count: suspicious_orders.len(),
            suspicious_orders,
            threshold_used: threshold,
            avg_volume,
        }
    }

    pub fn avg_spread(&self) -> f64 {
        self.avg_spread.value()
    }

    pub fn avg_l1_volume(&self) -> f64 {
        self.avg_l1_volume.value()
    }

    /// EWMA standard deviation of the spread
    pub fn spread_std(&self) -> f64 {
        let avg = self.avg_spread.value();
        (self.avg_spread_sq.value() - avg * avg).max(0.0).sqrt()
    }

    pub fn spoofing_events(&self) -> u64 {
        self.spoofing_events
    }

    pub fn prev_book(&self) -> Option<&OrderBook> {
        self.prev_book.as_ref()
    }

    pub fn recent_mid_prices(&self) -> impl Iterator<Item = &f64> {
        self.price_history.iter()
    }

    pub fn snapshots_seen(&self) -> usize {
        self.order_timestamps.len()
    }

    /// Clear baselines and history back to their initial values
    pub fn reset(&mut self) {
        self.avg_spread.reset();
        self.avg_spread_sq.reset();
        self.avg_l1_volume.reset();
        self.prev_book = None;
        self.order_timestamps.clear();
        self.price_history.clear();
        self.spoofing_events = 0;
    }

    fn update_statistics(&mut self, book: &OrderBook) {
        let spread = book.spread().unwrap_or(0.0);
        let l1_volume = (book.bids[0].volume + book.asks[0].volume) / 2.0;

        self.avg_spread.update(spread);
        self.avg_spread_sq.update(spread * spread);
        self.avg_l1_volume.update(l1_volume);
    }

    /// First top-5 level above the spoofing threshold, bids scanned before asks.
    /// At most one spoofing anomaly per snapshot; `scan_spoofing` lists them all.
    fn detect_spoofing(&mut self, book: &OrderBook, timestamp: DateTime<Utc>) -> Option<Anomaly> {
        let avg_volume = self.avg_l1_volume.value();
        let threshold = avg_volume * self.config.spoofing_volume_threshold;

        let (side, i, level) = [BookSide::Bid, BookSide::Ask].into_iter().find_map(move |side| {
            book.levels(side)
                .iter()
                .take(TOP_LEVELS)
                .enumerate()
                .find(|(_, level)| level.volume > threshold)
                .map(|(i, level)| (side, i, *level))
        })?;

        let risk_score = (level.volume / threshold * 50.0).min(100.0);
        self.spoofing_events += 1;

        Some(Anomaly {
            anomaly_type: AnomalyType::Spoofing,
            severity: if risk_score > 70.0 {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            },
            message: format!(
                "Large {} order at level {}: {:.0} (avg: {:.0})",
                side.as_str().to_lowercase(),
                i + 1,
                level.volume,
                avg_volume
            ),
            timestamp,
            risk_score,
            details: AnomalyDetails::Spoofing {
                side,
                level: i + 1,
                price: level.price,
                volume: level.volume,
                avg_volume,
            },
        })
    }

    fn detect_layering(&self, book: &OrderBook, timestamp: DateTime<Utc>) -> Option<Anomaly> {
        let threshold = self.avg_l1_volume.value() * LAYERING_VOLUME_MULTIPLE;
        let large_count = |side: BookSide| {
            book.levels(side)
                .iter()
                .take(TOP_LEVELS)
                .filter(|l| l.volume > threshold)
                .count()
        };
        let bid_large = large_count(BookSide::Bid);
        let ask_large = large_count(BookSide::Ask);

        let (side, count) = if bid_large >= 3 && bid_large > ask_large + 2 {
            (BookSide::Bid, bid_large)
        } else if ask_large >= 3 && ask_large > bid_large + 2 {
            (BookSide::Ask, ask_large)
        } else {
            return None;
        };

        let risk_score = (count as f64 * 20.0).min(100.0);
        Some(Anomaly {
            anomaly_type: AnomalyType::Layering,
            severity: if risk_score > 70.0 {
                AnomalySeverity::Critical
            } else {
                AnomalySeverity::High
            },
            message: format!("Layering detected: {count} large orders on {side} side"),
            timestamp,
            risk_score,
            details: AnomalyDetails::Layering {
                side,
                large_order_count: count,
            },
        })
    }

    /// Thin levels in the top 10 per side; bids first, at most 5 reported
    fn detect_liquidity_gaps(&self, book: &OrderBook, timestamp: DateTime<Utc>) -> Vec<Anomaly> {
        let gap_threshold = self.config.liquidity_gap_threshold;

        [BookSide::Bid, BookSide::Ask]
            .into_iter()
            .flat_map(move |side| {
                book.levels(side)
                    .iter()
                    .take(GAP_SCAN_LEVELS)
                    .enumerate()
                    .filter(move |(_, level)| level.volume < gap_threshold)
                    .map(move |(i, level)| {
                        let side_tag = side.as_str().to_lowercase();
                        let risk_score = ((GAP_SCAN_LEVELS - i) as f64 * 15.0
                            + (gap_threshold - level.volume) * 2.0)
                            .min(100.0);
                        Anomaly {
                            anomaly_type: AnomalyType::LiquidityGap,
                            severity: if i > 3 {
                                AnomalySeverity::Medium
                            } else {
                                AnomalySeverity::High
                            },
                            message: format!(
                                "Liquidity gap at {side_tag} level {}: {:.0}",
                                i + 1,
                                level.volume
                            ),
                            timestamp,
                            risk_score,
                            details: AnomalyDetails::LiquidityGap {
                                side,
                                level: i + 1,
                                price: level.price,
                                volume: level.volume,
                            },
                        }
                    })
            })
            .take(MAX_GAP_ANOMALIES)
            .collect()
    }

    fn detect_heavy_imbalance(&self, book: &OrderBook, timestamp: DateTime<Utc>) -> Option<Anomaly> {
        let bid_depth = book.depth(BookSide::Bid, TOP_LEVELS);
        let ask_depth = book.depth(BookSide::Ask, TOP_LEVELS);
        let total = bid_depth + ask_depth;
        if total < EPSILON {
            return None;
        }

        let imbalance = (bid_depth - ask_depth) / total;
        if imbalance.abs() <= self.config.imbalance_threshold {
            return None;
        }

        let side = if imbalance > 0.0 { BookSide::Bid } else { BookSide::Ask };
        Some(Anomaly {
            anomaly_type: AnomalyType::HeavyImbalance,
            severity: AnomalySeverity::High,
            message: format!(
                "Heavy {} imbalance: {:.1}%",
                side.as_str().to_lowercase(),
                imbalance * 100.0
            ),
            timestamp,
            risk_score: (imbalance.abs() * 100.0).min(100.0),
            details: AnomalyDetails::HeavyImbalance {
                side,
                imbalance,
                bid_depth,
                ask_depth,
            },
        })
    }

    fn detect_spread_shock(&self, book: &OrderBook, timestamp: DateTime<Utc>) -> Option<Anomaly> {
        let spread = book.spread().unwrap_or(0.0);
        let std_spread = self.spread_std();
        if std_spread <= 0.0 {
            return None;
        }

        let avg_spread = self.avg_spread.value();
        let z_score = (spread - avg_spread) / std_spread;
        if z_score <= self.config.spread_shock_multiplier {
            return None;
        }

        Some(Anomaly {
            anomaly_type: AnomalyType::SpreadShock,
            severity: if z_score > 5.0 {
                AnomalySeverity::High
            } else {
                AnomalySeverity::Medium
            },
            message: format!("Spread shock: {spread:.4} (z-score: {z_score:.1})"),
            timestamp,
            risk_score: (z_score * 20.0).min(100.0),
            details: AnomalyDetails::SpreadShock {
                current_spread: spread,
                avg_spread,
                z_score,
            },
        })
    }

    /// 0-100 from the largest top-5 order relative to average L1 volume
    fn calculate_spoofing_risk(&self, book: &OrderBook) -> f64 {
        let max_volume = book
            .bids
            .iter()
            .take(TOP_LEVELS)
            .chain(book.asks.iter().take(TOP_LEVELS))
            .map(|l| l.volume)
            .fold(0.0, f64::max);

        let avg = self.avg_l1_volume.value();
        if avg <= 0.0 {
            return 0.0;
        }
        let ratio = max_volume / avg;
        if ratio > 1.0 {
            ((ratio - 1.0) * 25.0).min(100.0)
        } else {
            0.0
        }
    }

    /// 0-100, higher is more liquid
    fn calculate_liquidity_score(book: &OrderBook) -> f64 {
        let total_depth = book.depth(BookSide::Bid, TOP_LEVELS) + book.depth(BookSide::Ask, TOP_LEVELS);
        // A locked book has no usable spread and scores as illiquid
        let spread_bps = book.spread_bps().filter(|bps| *bps > 0.0).unwrap_or(100.0);

        let depth_score = (total_depth / 100.0).min(50.0);
        let spread_score = (50.0 - spread_bps).max(0.0);
        depth_score + spread_score
    }

    fn calculate_overall_risk(anomalies: &[Anomaly], spoofing_risk: f64, liquidity_score: f64) -> f64 {
        let base_risk = 100.0 - liquidity_score;
        let anomaly_risk = anomalies.iter().map(|a| a.risk_score).sum::<f64>() / ANOMALY_RISK_DIVISOR;
        (base_risk * 0.3 + anomaly_risk * 0.4 + spoofing_risk * 0.3).min(100.0)
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}
