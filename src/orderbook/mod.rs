//! Order Book Microstructure Module
//!
//! Stateful per-symbol analytics over successive L2 snapshots:
//! - Order Flow Imbalance (OFI) from top-of-book deltas, normalized to [-1, 1]
//! - Depth-decayed Order Book Imbalance (OBI)
//! - Microprice, its divergence from mid and a directional probability
//! - Rolling log-return volatility
//! - VPIN from a separate trade-print path

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::types::{OrderBook, OrderBookLevel, TradePrint};
use crate::utils::{round_dp, RollingWindow, EPSILON};

/// Configuration for the microstructure analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Snapshots kept for OFI normalization
    pub ofi_window: usize,

    /// Mid-prices kept for volatility
    pub price_history_size: usize,

    /// Trade volume that completes a VPIN bucket
    pub vpin_bucket_size: f64,

    /// Exponential decay applied per OBI level
    pub decay_factor: f64,

    /// Levels per side used for OBI
    pub obi_levels: usize,

    /// Mid-prices used per volatility estimate
    pub volatility_window: usize,

    /// Completed VPIN buckets retained
    pub vpin_bucket_count: usize,

    /// Completed buckets required before VPIN is reported
    pub vpin_min_buckets: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            ofi_window: 50,
            price_history_size: 100,
            vpin_bucket_size: 1000.0,
            decay_factor: 0.5,
            obi_levels: 5,
            volatility_window: 20,
            vpin_bucket_count: 50,
            vpin_min_buckets: 10,
        }
    }
}

/// Metrics for one snapshot, already rounded for publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureMetrics {
    pub mid_price: f64,
    pub spread: f64,
    pub spread_bps: f64,
    /// Order Flow Imbalance in [-1, 1]
    pub ofi: f64,
    /// Order Book Imbalance in [-1, 1]
    pub obi: f64,
    pub microprice: f64,
    pub microprice_divergence: f64,
    /// Probability (0-100) that the next move is up
    pub directional_probability: f64,
    pub total_bid_depth: f64,
    pub total_ask_depth: f64,
    pub depth_imbalance: f64,
    pub volatility: Option<f64>,
    pub vpin: Option<f64>,
}

/// Coarse reading of a metrics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsInterpretation {
    pub ofi_signal: FlowSignal,
    pub obi_signal: BookSkew,
    pub price_pressure: PricePressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowSignal {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookSkew {
    BidHeavy,
    AskHeavy,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricePressure {
    Upward,
    Downward,
    Neutral,
}

impl MicrostructureMetrics {
    pub fn interpret(&self) -> MetricsInterpretation {
        let ofi_signal = if self.ofi > 0.2 {
            FlowSignal::Bullish
        } else if self.ofi < -0.2 {
            FlowSignal::Bearish
        } else {
            FlowSignal::Neutral
        };

        let obi_signal = if self.obi > 0.3 {
            BookSkew::BidHeavy
        } else if self.obi < -0.3 {
            BookSkew::AskHeavy
        } else {
            BookSkew::Balanced
        };

        let price_pressure = if self.directional_probability > 55.0 {
            PricePressure::Upward
        } else if self.directional_probability < 45.0 {
            PricePressure::Downward
        } else {
            PricePressure::Neutral
        };

        MetricsInterpretation {
            ofi_signal,
            obi_signal,
            price_pressure,
        }
    }
}

/// Trade flow toxicity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToxicityLevel {
    Low,     // VPIN < 0.3
    Medium,  // VPIN 0.3-0.5
    High,    // VPIN 0.5-0.7
    Extreme, // VPIN > 0.7
}

impl ToxicityLevel {
    pub fn from_vpin(vpin: f64) -> Self {
        if vpin < 0.3 {
            ToxicityLevel::Low
        } else if vpin < 0.5 {
            ToxicityLevel::Medium
        } else if vpin < 0.7 {
            ToxicityLevel::High
        } else {
            ToxicityLevel::Extreme
        }
    }
}

/// Liquidity class from spread alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityClass {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadAnalysis {
    pub spread_absolute: f64,
    pub mid_price: f64,
    pub spread_basis_points: f64,
    pub liquidity_classification: LiquidityClass,
}

/// Spread metrics from a bare quote, without any book state
pub fn analyze_spread(bid_price: f64, ask_price: f64) -> Result<SpreadAnalysis> {
    if !bid_price.is_finite() || !ask_price.is_finite() {
        return Err(AnalyticsError::InvalidInput(format!(
            "Prices must be finite, got bid {bid_price} ask {ask_price}"
        )));
    }
    if bid_price >= ask_price {
        return Err(AnalyticsError::InvalidInput(
            "Bid price must be lower than ask price".into(),
        ));
    }

    let spread = ask_price - bid_price;
    let mid_price = (ask_price + bid_price) / 2.0;
    let spread_bps = spread / mid_price * 10_000.0;

    let liquidity_classification = if spread_bps < 5.0 {
        LiquidityClass::High
    } else if spread_bps < 20.0 {
        LiquidityClass::Medium
    } else {
        LiquidityClass::Low
    };

    Ok(SpreadAnalysis {
        spread_absolute: round_dp(spread, 6),
        mid_price: round_dp(mid_price, 6),
        spread_basis_points: round_dp(spread_bps, 2),
        liquidity_classification,
    })
}

/// Volume-weighted fair price.
///
/// Each side's price is weighted by the opposite side's volume, so a heavy
/// bid pulls the estimate toward the ask. Falls back to mid when both
/// sides are empty.
pub fn microprice(bid: &OrderBookLevel, ask: &OrderBookLevel) -> f64 {
    let total_volume = bid.volume + ask.volume;
    if total_volume < EPSILON {
        return (bid.price + ask.price) / 2.0;
    }
    (bid.volume * ask.price + ask.volume * bid.price) / total_volume
}

/// Top-of-book state carried between snapshots for OFI
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TopOfBook {
    bid_price: Option<f64>,
    ask_price: Option<f64>,
    bid_qty: f64,
    ask_qty: f64,
}

#[derive(Debug, Clone, Default)]
struct VpinBucket {
    buy_volume: f64,
    sell_volume: f64,
    total_volume: f64,
}

/// Stateful microstructure analyzer for a single symbol.
///
/// `analyze` and `update_vpin` both mutate state; callers serialize access
/// per instance.
#[derive(Debug, Clone)]
pub struct MicrostructureAnalyzer {
    config: AnalyzerConfig,

    prev_top: TopOfBook,

    /// Absolute raw OFI values for normalization
    ofi_history: RollingWindow<f64>,

    /// Mid-prices for volatility
    price_history: RollingWindow<f64>,

    /// Current bucket accumulator
    current_bucket: VpinBucket,

    /// Imbalance ratio of each completed bucket
    bucket_imbalances: RollingWindow<f64>,
}

impl MicrostructureAnalyzer {
    /// Create a new analyzer with default config
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    /// Create a new analyzer with custom config
    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            prev_top: TopOfBook::default(),
            ofi_history: RollingWindow::new(config.ofi_window),
            price_history: RollingWindow::new(config.price_history_size),
            current_bucket: VpinBucket::default(),
            bucket_imbalances: RollingWindow::new(config.vpin_bucket_count),
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one snapshot.
    ///
    /// Fails with `InvalidInput` if either side is empty; state is untouched
    /// in that case.
    pub fn analyze(&mut self, book: &OrderBook) -> Result<MicrostructureMetrics> {
        let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => (*bid, *ask),
            _ => {
                return Err(AnalyticsError::InvalidInput(
                    "Order book must have at least one level on each side".into(),
                ))
            }
        };

        let mid_price = (best_bid.price + best_ask.price) / 2.0;
        let spread = best_ask.price - best_bid.price;
        let spread_bps = book.spread_bps().unwrap_or(0.0);

        let ofi = self.calculate_ofi(&best_bid, &best_ask);
        let obi = self.calculate_obi(book);

        let microprice = microprice(&best_bid, &best_ask);
        let divergence = microprice - mid_price;

        // Tick size approximated from the spread
        let tick_size = if spread > 0.0 { spread / 10.0 } else { 0.01 };
        let divergence_score = divergence / tick_size;
        let directional_probability = 100.0 / (1.0 + (-2.0 * divergence_score).exp());

        let total_bid_depth: f64 = book.bids.iter().map(|l| l.volume).sum();
        let total_ask_depth: f64 = book.asks.iter().map(|l| l.volume).sum();
        let total_depth = total_bid_depth + total_ask_depth;
        let depth_imbalance = if total_depth > 0.0 {
            (total_bid_depth - total_ask_depth) / total_depth
        } else {
            0.0
        };

        self.price_history.push(mid_price);
        let volatility = self.calculate_volatility();

        Ok(MicrostructureMetrics {
            mid_price: round_dp(mid_price, 6),
            spread: round_dp(spread, 6),
            spread_bps: round_dp(spread_bps, 2),
            ofi: round_dp(ofi, 4),
            obi: round_dp(obi, 4),
            microprice: round_dp(microprice, 6),
            microprice_divergence: round_dp(divergence, 6),
            directional_probability: round_dp(directional_probability, 1),
            total_bid_depth: round_dp(total_bid_depth, 2),
            total_ask_depth: round_dp(total_ask_depth, 2),
            depth_imbalance: round_dp(depth_imbalance, 4),
            volatility: volatility.map(|v| round_dp(v, 6)),
            vpin: self.current_vpin().map(|v| round_dp(v, 4)),
        })
    }

    /// Order Flow Imbalance against the previous snapshot's top of book.
    ///
    /// The first call after construction or reset is always 0. Previous
    /// state is overwritten on every call.
    fn calculate_ofi(&mut self, best_bid: &OrderBookLevel, best_ask: &OrderBookLevel) -> f64 {
        let prev = self.prev_top;
        let mut ofi = 0.0;

        if let (Some(prev_bid), Some(prev_ask)) = (prev.bid_price, prev.ask_price) {
            ofi += if best_bid.price > prev_bid {
                best_bid.volume
            } else if best_bid.price < prev_bid {
                -prev.bid_qty
            } else {
                best_bid.volume - prev.bid_qty
            };

            // Ask side has inverted sign
            ofi += if best_ask.price > prev_ask {
                prev.ask_qty
            } else if best_ask.price < prev_ask {
                -best_ask.volume
            } else {
                -(best_ask.volume - prev.ask_qty)
            };
        }

        self.prev_top = TopOfBook {
            bid_price: Some(best_bid.price),
            ask_price: Some(best_ask.price),
            bid_qty: best_bid.volume,
            ask_qty: best_ask.volume,
        };

        self.ofi_history.push(ofi.abs());

        match self.ofi_history.max() {
            Some(max_ofi) if max_ofi > 0.0 => (ofi / max_ofi).clamp(-1.0, 1.0),
            _ => ofi,
        }
    }

    /// Depth-weighted imbalance over the top levels, level 0 weighted heaviest
    fn calculate_obi(&self, book: &OrderBook) -> f64 {
        let levels = self
            .config
            .obi_levels
            .min(book.bids.len())
            .min(book.asks.len());

        let mut weighted_bid = 0.0;
        let mut weighted_ask = 0.0;

        for (i, (bid, ask)) in book.bids.iter().zip(&book.asks).take(levels).enumerate() {
            let weight = (-self.config.decay_factor * i as f64).exp();
            weighted_bid += bid.volume * weight;
            weighted_ask += ask.volume * weight;
        }

        let total_weight = weighted_bid + weighted_ask;
        if total_weight < EPSILON {
            return 0.0;
        }
        (weighted_bid - weighted_ask) / total_weight
    }

    /// Population std-dev of log returns over the latest window of mids.
    /// Per-tick, not annualized.
    fn calculate_volatility(&self) -> Option<f64> {
        let window = self.config.volatility_window;
        if window < 2 || self.price_history.len() < window {
            return None;
        }

        let prices: Vec<f64> = self.price_history.latest(window).copied().collect();
        let log_returns: Vec<f64> = prices
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();

        if log_returns.is_empty() {
            return None;
        }

        let n = log_returns.len() as f64;
        let mean = log_returns.iter().sum::<f64>() / n;
        let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt())
    }

    /// Feed one trade print into the VPIN bucket accumulator.
    ///
    /// Returns the current VPIN once enough buckets have completed. A
    /// non-finite or negative volume leaves the accumulator untouched.
    pub fn update_vpin(&mut self, trade_volume: f64, is_buy: bool) -> Option<f64> {
        if !trade_volume.is_finite() || trade_volume < 0.0 {
            return self.current_vpin();
        }
        if is_buy {
            self.current_bucket.buy_volume += trade_volume;
        } else {
            self.current_bucket.sell_volume += trade_volume;
        }
        self.current_bucket.total_volume += trade_volume;

        if self.current_bucket.total_volume >= self.config.vpin_bucket_size {
            let bucket = std::mem::take(&mut self.current_bucket);
            let total = bucket.buy_volume + bucket.sell_volume;
            if total > 0.0 {
                let imbalance = (bucket.buy_volume - bucket.sell_volume).abs() / total;
                self.bucket_imbalances.push(imbalance);
            }
        }

        self.current_vpin()
    }

    /// Trade-flow entry point with input checking
    pub fn process_trade(&mut self, trade: TradePrint) -> Result<Option<f64>> {
        if !trade.volume.is_finite() || trade.volume <= 0.0 {
            return Err(AnalyticsError::InvalidInput(format!(
                "trade volume must be positive and finite, got {}",
                trade.volume
            )));
        }
        Ok(self.update_vpin(trade.volume, trade.is_buy))
    }

    /// Mean imbalance of retained buckets, if enough have completed
    pub fn current_vpin(&self) -> Option<f64> {
        if self.bucket_imbalances.len() < self.config.vpin_min_buckets.max(1) {
            return None;
        }
        self.bucket_imbalances.mean()
    }

    pub fn completed_buckets(&self) -> usize {
        self.bucket_imbalances.len()
    }

    /// Clear all rolling state; configuration is kept
    pub fn reset(&mut self) {
        self.prev_top = TopOfBook::default();
        self.ofi_history.clear();
        self.price_history.clear();
        self.current_bucket = VpinBucket::default();
        self.bucket_imbalances.clear();
    }
}

impl Default for MicrostructureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{book, RandomBookGenerator};

    fn reference_book() -> OrderBook {
        book(
            &[(100.0, 10.0), (99.9, 20.0), (99.8, 30.0)],
            &[(100.1, 10.0), (100.2, 20.0), (100.3, 30.0)],
        )
    }

    #[test]
    fn test_reference_snapshot_metrics() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let metrics = analyzer.analyze(&reference_book()).unwrap();

        assert_eq!(metrics.mid_price, 100.05);
        assert!((metrics.spread - 0.1).abs() < 1e-9);
        assert_eq!(metrics.ofi, 0.0, "first call has no prior state");
        assert_eq!(metrics.obi, 0.0, "symmetric book");
        assert_eq!(metrics.microprice, 100.05);
        assert_eq!(metrics.directional_probability, 50.0);
        assert_eq!(metrics.total_bid_depth, 60.0);
        assert_eq!(metrics.total_ask_depth, 60.0);
        assert_eq!(metrics.depth_imbalance, 0.0);
        // 0.1 / 100.05 * 10_000 = 9.9950..., published at 2dp
        assert_eq!(metrics.spread_bps, 10.0);
        assert!(metrics.volatility.is_none());
        assert!(metrics.vpin.is_none());
    }

    #[test]
    fn test_ofi_positive_when_bid_steps_up() {
        let mut analyzer = MicrostructureAnalyzer::new();
        analyzer.analyze(&reference_book()).unwrap();

        let raised = book(
            &[(100.05, 10.0), (99.9, 20.0), (99.8, 30.0)],
            &[(100.1, 10.0), (100.2, 20.0), (100.3, 30.0)],
        );
        let metrics = analyzer.analyze(&raised).unwrap();
        assert!(metrics.ofi > 0.0, "bid improvement is buying pressure");
        assert_eq!(metrics.ofi, 1.0);
    }

    #[test]
    fn test_ofi_contributions() {
        // Bid unchanged with +5, ask drops with 8 resting: raw = 5 - 8 = -3
        let mut analyzer = MicrostructureAnalyzer::new();
        analyzer.analyze(&book(&[(100.0, 10.0)], &[(101.0, 10.0)])).unwrap();
        let metrics = analyzer
            .analyze(&book(&[(100.0, 15.0)], &[(100.8, 8.0)]))
            .unwrap();
        // Only one non-zero raw value so far; normalized by itself
        assert_eq!(metrics.ofi, -1.0);

        // Bid drops (-15), ask rises (+8): raw = -7, history max = 7
        let metrics = analyzer
            .analyze(&book(&[(99.5, 1.0)], &[(101.5, 1.0)]))
            .unwrap();
        assert_eq!(metrics.ofi, -1.0);

        // Unchanged quotes, bid +3, ask +1: raw = 3 - 1 = 2, max = 7
        let metrics = analyzer
            .analyze(&book(&[(99.5, 4.0)], &[(101.5, 2.0)]))
            .unwrap();
        assert_eq!(metrics.ofi, round_dp(2.0 / 7.0, 4));
    }

    #[test]
    fn test_ofi_stays_in_bounds() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let mut generator = RandomBookGenerator::new(7);
        for _ in 0..500 {
            let metrics = analyzer.analyze(&generator.next_book()).unwrap();
            assert!((-1.0..=1.0).contains(&metrics.ofi), "ofi out of range: {}", metrics.ofi);
            assert!((-1.0..=1.0).contains(&metrics.obi));
            assert!((-1.0..=1.0).contains(&metrics.depth_imbalance));
            assert!((0.0..=100.0).contains(&metrics.directional_probability));
        }
    }

    #[test]
    fn test_obi_sign() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let bid_heavy = book(&[(100.0, 500.0), (99.9, 400.0)], &[(100.1, 50.0), (100.2, 40.0)]);
        assert!(analyzer.analyze(&bid_heavy).unwrap().obi > 0.0);

        let ask_heavy = book(&[(100.0, 50.0), (99.9, 40.0)], &[(100.1, 500.0), (100.2, 400.0)]);
        assert!(analyzer.analyze(&ask_heavy).unwrap().obi < 0.0);
    }

    #[test]
    fn test_obi_weights_top_level_most() {
        let mut analyzer = MicrostructureAnalyzer::new();
        // Raw depth favors asks, but the dominant best bid wins after decay
        let skewed = book(
            &[(100.0, 1000.0), (99.0, 100.0), (98.0, 100.0)],
            &[(101.0, 100.0), (102.0, 1000.0), (103.0, 1000.0)],
        );
        let metrics = analyzer.analyze(&skewed).unwrap();
        assert!(metrics.depth_imbalance < 0.0);
        assert!(metrics.obi > 0.0);
    }

    #[test]
    fn test_obi_zero_volume_book() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let metrics = analyzer.analyze(&book(&[(100.0, 0.0)], &[(100.2, 0.0)])).unwrap();
        assert_eq!(metrics.obi, 0.0);
        assert_eq!(metrics.depth_imbalance, 0.0);
        assert_eq!(metrics.microprice, 100.1, "falls back to mid");
    }

    #[test]
    fn test_microprice_leans_away_from_heavy_side() {
        let bid = OrderBookLevel::new(100.0, 10.0);
        let ask = OrderBookLevel::new(101.0, 90.0);
        // Heavy ask, thin bid: pulled toward the bid
        assert!((microprice(&bid, &ask) - 100.1).abs() < 1e-9);

        let mut analyzer = MicrostructureAnalyzer::new();
        let metrics = analyzer.analyze(&book(&[(100.0, 10.0)], &[(101.0, 90.0)])).unwrap();
        assert!(metrics.microprice_divergence < 0.0);
        assert!(metrics.directional_probability < 50.0);
        assert_eq!(metrics.interpret().price_pressure, PricePressure::Downward);
    }

    #[test]
    fn test_microprice_within_quotes() {
        let mut generator = RandomBookGenerator::new(11);
        for _ in 0..200 {
            let snapshot = generator.next_book();
            let (bid, ask) = (snapshot.bids[0], snapshot.asks[0]);
            let mp = microprice(&bid, &ask);
            assert!(mp >= bid.price - 1e-9 && mp <= ask.price + 1e-9);
        }
    }

    #[test]
    fn test_directional_probability_saturates() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let metrics = analyzer.analyze(&book(&[(100.0, 1000.0)], &[(100.1, 1.0)])).unwrap();
        assert!(metrics.directional_probability > 99.0);
        assert_eq!(metrics.interpret().price_pressure, PricePressure::Upward);
    }

    #[test]
    fn test_volatility_needs_full_window() {
        let mut analyzer = MicrostructureAnalyzer::new();
        for i in 0..19 {
            let px = 100.0 + i as f64 * 0.1;
            let metrics = analyzer.analyze(&book(&[(px, 10.0)], &[(px + 0.1, 10.0)])).unwrap();
            assert!(metrics.volatility.is_none(), "only {} points", i + 1);
        }
        let metrics = analyzer.analyze(&book(&[(102.0, 10.0)], &[(102.1, 10.0)])).unwrap();
        assert!(metrics.volatility.unwrap() > 0.0);
    }

    #[test]
    fn test_volatility_flat_prices_is_zero() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let mut last = None;
        for _ in 0..25 {
            last = Some(analyzer.analyze(&reference_book()).unwrap());
        }
        assert_eq!(last.unwrap().volatility, Some(0.0));
    }

    #[test]
    fn test_volatility_matches_log_return_std() {
        let mut analyzer = MicrostructureAnalyzer::new();
        // Alternating mids: returns are +r, -r, ... so std == |r| (to rounding)
        let mut metrics = None;
        for i in 0..20 {
            let px = if i % 2 == 0 { 100.0 } else { 101.0 };
            metrics = Some(analyzer.analyze(&book(&[(px, 1.0)], &[(px + 0.2, 1.0)])).unwrap());
        }
        let r = (101.1_f64 / 100.1).ln();
        let vol = metrics.unwrap().volatility.unwrap();
        assert!((vol - r).abs() < 1e-3, "vol {vol} vs {r}");
    }

    #[test]
    fn test_empty_side_is_invalid_input() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let one_sided = OrderBook::new(vec![OrderBookLevel::new(100.0, 1.0)], vec![], None);
        let err = analyzer.analyze(&one_sided).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidInput(_)));

        // Rejected call leaves no trace: next call is still a first call
        let metrics = analyzer.analyze(&reference_book()).unwrap();
        assert_eq!(metrics.ofi, 0.0);
    }

    #[test]
    fn test_vpin_requires_ten_buckets() {
        let mut analyzer = MicrostructureAnalyzer::with_config(AnalyzerConfig {
            vpin_bucket_size: 100.0,
            ..Default::default()
        });

        for bucket in 0..9 {
            assert!(analyzer.update_vpin(75.0, true).is_none());
            assert!(analyzer.update_vpin(25.0, false).is_none(), "bucket {bucket}");
        }
        assert_eq!(analyzer.completed_buckets(), 9);

        analyzer.update_vpin(75.0, true);
        let vpin = analyzer.update_vpin(25.0, false).unwrap();
        assert!((vpin - 0.5).abs() < 1e-12);
        assert_eq!(ToxicityLevel::from_vpin(vpin), ToxicityLevel::High);

        let metrics = analyzer.analyze(&reference_book()).unwrap();
        assert_eq!(metrics.vpin, Some(0.5));
    }

    #[test]
    fn test_vpin_ignores_unusable_volume() {
        let mut analyzer = MicrostructureAnalyzer::with_config(AnalyzerConfig {
            vpin_bucket_size: 100.0,
            ..Default::default()
        });

        analyzer.update_vpin(60.0, true);
        assert!(analyzer.update_vpin(f64::NAN, true).is_none());
        assert!(analyzer.update_vpin(f64::INFINITY, false).is_none());
        assert!(analyzer.update_vpin(-500.0, false).is_none());
        assert_eq!(analyzer.completed_buckets(), 0);

        // The open bucket still closes on real volume
        analyzer.update_vpin(40.0, false);
        assert_eq!(analyzer.completed_buckets(), 1);
        for _ in 0..9 {
            analyzer.update_vpin(60.0, true);
            analyzer.update_vpin(40.0, false);
        }
        let vpin = analyzer.current_vpin().unwrap();
        assert!((vpin - 0.2).abs() < 1e-12, "vpin {vpin}");
        assert_eq!(analyzer.update_vpin(f64::NAN, false), Some(vpin));
    }

    #[test]
    fn test_vpin_bucket_history_bounded() {
        let mut analyzer = MicrostructureAnalyzer::with_config(AnalyzerConfig {
            vpin_bucket_size: 10.0,
            ..Default::default()
        });
        for _ in 0..80 {
            analyzer.update_vpin(10.0, true);
        }
        assert_eq!(analyzer.completed_buckets(), 50);
        assert_eq!(analyzer.current_vpin(), Some(1.0));
    }

    #[test]
    fn test_process_trade_rejects_bad_volume() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let err = analyzer
            .process_trade(TradePrint { volume: -1.0, is_buy: true })
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidInput(_)));
        assert!(analyzer
            .process_trade(TradePrint { volume: 5.0, is_buy: false })
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reset_matches_fresh_instance() {
        let mut generator = RandomBookGenerator::new(42);
        let warmup: Vec<_> = (0..60).map(|_| generator.next_book()).collect();
        let sequence: Vec<_> = (0..40).map(|_| generator.next_book()).collect();

        let mut used = MicrostructureAnalyzer::new();
        for b in &warmup {
            used.analyze(b).unwrap();
        }
        for _ in 0..30 {
            used.update_vpin(400.0, true);
        }
        used.reset();

        let mut fresh = MicrostructureAnalyzer::new();
        for b in &sequence {
            assert_eq!(used.analyze(b).unwrap(), fresh.analyze(b).unwrap());
        }
        assert_eq!(used.current_vpin(), fresh.current_vpin());
    }

    #[test]
    fn test_interpretation_thresholds() {
        let mut analyzer = MicrostructureAnalyzer::new();
        let mut metrics = analyzer.analyze(&reference_book()).unwrap();
        assert_eq!(
            metrics.interpret(),
            MetricsInterpretation {
                ofi_signal: FlowSignal::Neutral,
                obi_signal: BookSkew::Balanced,
                price_pressure: PricePressure::Neutral,
            }
        );

        metrics.ofi = -0.5;
        metrics.obi = 0.31;
        let reading = metrics.interpret();
        assert_eq!(reading.ofi_signal, FlowSignal::Bearish);
        assert_eq!(reading.obi_signal, BookSkew::BidHeavy);
        assert_eq!(serde_json::to_string(&reading.obi_signal).unwrap(), "\"bid-heavy\"");
    }

    #[test]
    fn test_analyze_spread() {
        let analysis = analyze_spread(100.0, 100.02).unwrap();
        assert_eq!(analysis.mid_price, 100.01);
        assert_eq!(analysis.spread_basis_points, 2.0);
        assert_eq!(analysis.liquidity_classification, LiquidityClass::High);

        assert_eq!(
            analyze_spread(100.0, 100.1).unwrap().liquidity_classification,
            LiquidityClass::Medium
        );
        assert_eq!(
            analyze_spread(100.0, 101.0).unwrap().liquidity_classification,
            LiquidityClass::Low
        );
        assert!(analyze_spread(101.0, 100.0).is_err());
        assert!(analyze_spread(100.0, 100.0).is_err());
    }

    #[test]
    fn test_analyze_spread_rejects_non_finite_prices() {
        for (bid, ask) in [
            (f64::NAN, 100.0),
            (100.0, f64::NAN),
            (100.0, f64::INFINITY),
            (f64::NEG_INFINITY, 100.0),
        ] {
            let err = analyze_spread(bid, ask).unwrap_err();
            assert!(matches!(err, AnalyticsError::InvalidInput(_)), "bid {bid} ask {ask}");
        }
    }

    #[test]
    fn test_toxicity_levels() {
        assert_eq!(ToxicityLevel::from_vpin(0.2), ToxicityLevel::Low);
        assert_eq!(ToxicityLevel::from_vpin(0.4), ToxicityLevel::Medium);
        assert_eq!(ToxicityLevel::from_vpin(0.6), ToxicityLevel::High);
        assert_eq!(ToxicityLevel::from_vpin(0.9), ToxicityLevel::Extreme);
    }
}
