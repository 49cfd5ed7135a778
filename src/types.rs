//! Core order book types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnalyticsError, Result};

/// One price level of an L2 book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub volume: f64,
}

impl OrderBookLevel {
    pub fn new(price: f64, volume: f64) -> Self {
        Self { price, volume }
    }
}

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookSide::Bid => "BID",
            BookSide::Ask => "ASK",
        }
    }
}

impl std::fmt::Display for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggressor side of a trade print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single trade used for VPIN bucketing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub volume: f64,
    pub is_buy: bool,
}

impl TradePrint {
    pub fn side(&self) -> TradeSide {
        if self.is_buy {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        }
    }
}

/// L2 order book snapshot.
///
/// Bids are ordered best (highest) first, asks best (lowest) first. The book
/// does not check its own invariants; run it through
/// [`DataValidator`](crate::validation::DataValidator) before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new(
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            bids,
            asks,
            timestamp,
        }
    }

    /// Build from `[price, volume]` pairs
    pub fn from_raw(bids: &[[f64; 2]], asks: &[[f64; 2]], timestamp: Option<DateTime<Utc>>) -> Self {
        let to_levels = |pairs: &[[f64; 2]]| {
            pairs
                .iter()
                .map(|[price, volume]| OrderBookLevel::new(*price, *volume))
                .collect()
        };
        Self::new(to_levels(bids), to_levels(asks), timestamp)
    }

    /// Build from a raw `{bids: [[p, v], ...], asks: [[p, v], ...]}` snapshot.
    ///
    /// Numeric strings are accepted. Every level is checked, not only the
    /// ones the validator inspects: a non-finite number, a price <= 0 or a
    /// negative volume is an `InvalidInput` error.
    pub fn from_snapshot(snapshot: &Value, timestamp: Option<DateTime<Utc>>) -> Result<Self> {
        let bids = parse_side(snapshot, "bids")?;
        let asks = parse_side(snapshot, "asks")?;
        Ok(Self::new(bids, asks, timestamp))
    }

    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    pub fn is_two_sided(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    pub fn mid_price(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        Some((bid.price + ask.price) / 2.0)
    }

    pub fn spread(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        Some(ask.price - bid.price)
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let spread = self.spread()?;
        let mid = self.mid_price()?;
        if mid == 0.0 {
            return None;
        }
        Some(spread / mid * 10_000.0)
    }

    /// Volume over the first `levels` levels of one side
    pub fn depth(&self, side: BookSide, levels: usize) -> f64 {
        self.levels(side).iter().take(levels).map(|l| l.volume).sum()
    }

    pub fn levels(&self, side: BookSide) -> &[OrderBookLevel] {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }
}

/// Finite number from a JSON number or numeric string
pub(crate) fn as_finite(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn parse_side(snapshot: &Value, field: &str) -> Result<Vec<OrderBookLevel>> {
    let levels = snapshot
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| AnalyticsError::InvalidInput(format!("missing or non-list field: {field}")))?;

    levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            let pair = level.as_array().filter(|p| p.len() >= 2).ok_or_else(|| {
                AnalyticsError::InvalidInput(format!("{field} level {i}: must be [price, volume]"))
            })?;
            match (as_finite(&pair[0]), as_finite(&pair[1])) {
                (Some(price), Some(volume)) if price > 0.0 && volume >= 0.0 => {
                    Ok(OrderBookLevel::new(price, volume))
                }
                (Some(price), Some(volume)) => Err(AnalyticsError::InvalidInput(format!(
                    "{field} level {i}: price must be > 0 and volume >= 0, got [{price}, {volume}]"
                ))),
                _ => Err(AnalyticsError::InvalidInput(format!(
                    "{field} level {i}: non-numeric price or volume"
                ))),
            }
        })
        .collect()
}
