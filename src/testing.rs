//! Test fixtures: hand-built books and a seeded random book stream

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::types::{OrderBook, OrderBookLevel};

/// 2023-11-14T22:13:20Z, so fixture output is reproducible
pub const FIXTURE_EPOCH_SECS: i64 = 1_700_000_000;

pub fn fixture_time() -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(FIXTURE_EPOCH_SECS, 0)
}

/// Book from `(price, volume)` pairs with a fixed timestamp
pub fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
    let levels = |pairs: &[(f64, f64)]| {
        pairs
            .iter()
            .map(|&(price, volume)| OrderBookLevel::new(price, volume))
            .collect()
    };
    OrderBook::new(levels(bids), levels(asks), fixture_time())
}

/// Book with `depth` evenly spaced levels of constant volume per side
pub fn uniform_book(best_bid: f64, best_ask: f64, tick: f64, depth: usize, volume: f64) -> OrderBook {
    let bids: Vec<_> = (0..depth).map(|i| (best_bid - i as f64 * tick, volume)).collect();
    let asks: Vec<_> = (0..depth).map(|i| (best_ask + i as f64 * tick, volume)).collect();
    book(&bids, &asks)
}

/// Raw JSON snapshot in the collaborator wire shape
pub fn snapshot_json(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Value {
    let ladder = |pairs: &[(f64, f64)]| pairs.iter().map(|&(p, v)| json!([p, v])).collect::<Vec<_>>();
    json!({ "bids": ladder(bids), "asks": ladder(asks) })
}

/// Deterministic stream of valid, uncrossed books following a random walk
pub struct RandomBookGenerator {
    rng: StdRng,
    mid: f64,
    tick: f64,
    sequence: i64,
}

impl RandomBookGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            mid: 100.0,
            tick: 0.01,
            sequence: 0,
        }
    }

    pub fn next_book(&mut self) -> OrderBook {
        let step: i32 = self.rng.random_range(-3..=3);
        self.mid = (self.mid + f64::from(step) * self.tick).max(1.0);

        let half_spread_ticks: u32 = self.rng.random_range(1..=4);
        let half_spread = f64::from(half_spread_ticks) * self.tick;
        let best_bid = self.mid - half_spread;
        let best_ask = self.mid + half_spread;

        let bid_depth: usize = self.rng.random_range(1..=10);
        let ask_depth: usize = self.rng.random_range(1..=10);

        let bids = (0..bid_depth)
            .map(|i| OrderBookLevel::new(best_bid - i as f64 * self.tick, self.volume()))
            .collect();
        let asks = (0..ask_depth)
            .map(|i| OrderBookLevel::new(best_ask + i as f64 * self.tick, self.volume()))
            .collect();

        self.sequence += 1;
        let timestamp = fixture_time().map(|t| t + Duration::milliseconds(self.sequence * 100));
        OrderBook::new(bids, asks, timestamp)
    }

    /// Mostly ordinary size, occasionally an outsized level
    fn volume(&mut self) -> f64 {
        if self.rng.random_bool(0.05) {
            self.rng.random_range(1_000.0..5_000.0)
        } else {
            self.rng.random_range(1.0..300.0)
        }
    }
}
