//! Rolling-state primitives shared by the engines
//!
//! - `RollingWindow`: fixed-capacity FIFO, oldest evicted first
//! - `Ewma`: recursive exponentially weighted average
//! - decimal rounding used at the output boundary

use std::collections::VecDeque;

/// Values below this are treated as zero in ratio denominators
pub const EPSILON: f64 = 1e-9;

/// Bounded FIFO window
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a value, evicting the oldest once the window is full.
    /// A zero-capacity window retains nothing.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    /// The most recent `n` values, oldest first
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> {
        self.buf.iter().skip(self.buf.len().saturating_sub(n))
    }

    pub fn back(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl RollingWindow<f64> {
    pub fn max(&self) -> Option<f64> {
        self.buf.iter().copied().reduce(f64::max)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.iter().sum::<f64>() / self.buf.len() as f64)
    }
}

/// Exponentially weighted moving average: `v = (1 - alpha) * v + alpha * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    initial: f64,
    value: f64,
}

impl Ewma {
    pub fn new(alpha: f64, initial: f64) -> Self {
        Self {
            alpha,
            initial,
            value: initial,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.value = (1.0 - self.alpha) * self.value + self.alpha * sample;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Back to the seed value the average was created with
    pub fn reset(&mut self) {
        self.value = self.initial;
    }
}

/// Round to `dp` decimal places against the exact binary value.
///
/// Exact ties go to the even digit, so `0.00035` (stored just below the
/// tie) rounds to `0.0003`. Scaling by `10^dp` first would push such values
/// over the tie.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", dp as usize, value)
        .parse()
        .unwrap_or(value)
}

/// `serialize_with` helpers for fields that are stored raw but published rounded
pub mod serde_round {
    use serde::Serializer;

    pub fn one<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::round_dp(*value, 1))
    }
}
