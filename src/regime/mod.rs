//! Market Regime Classification Module
//!
//! Coarse classification of current book conditions from the anomalies a
//! snapshot produced and its overall risk score:
//! - **Manipulation Suspected**: spoofing or layering seen, or 2+ critical anomalies
//! - **Stressed**: overall risk above 70, or 3+ high-severity anomalies
//! - **Execution Hot**: overall risk above 40
//! - **Calm**: everything else
//!
//! Rules are evaluated in that order; the first match wins.

use serde::{Deserialize, Serialize};

use crate::anomaly::{Anomaly, AnomalySeverity, AnomalyType};

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    #[serde(rename = "Calm")]
    Calm,
    #[serde(rename = "Stressed")]
    Stressed,
    #[serde(rename = "Execution Hot")]
    ExecutionHot,
    #[serde(rename = "Manipulation Suspected")]
    ManipulationSuspected,
}

impl MarketRegime {
    /// Human-readable tag, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Calm => "Calm",
            MarketRegime::Stressed => "Stressed",
            MarketRegime::ExecutionHot => "Execution Hot",
            MarketRegime::ManipulationSuspected => "Manipulation Suspected",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MarketRegime::Calm => "Market is stable with normal trading activity",
            MarketRegime::Stressed => "Elevated volatility and potential instability",
            MarketRegime::ExecutionHot => "High trading activity with large order flow",
            MarketRegime::ManipulationSuspected => "Warning: Potential market manipulation detected",
        }
    }

    /// Execution guidance for downstream strategy layers
    pub fn recommendation(&self) -> &'static str {
        match self {
            MarketRegime::Calm => "Normal trading conditions - standard execution",
            MarketRegime::Stressed => "Exercise caution - consider reducing position size",
            MarketRegime::ExecutionHot => "Use limit orders - expect slippage on market orders",
            MarketRegime::ManipulationSuspected => "Avoid trading - wait for market to stabilize",
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bucketed overall risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            RiskLevel::Low
        } else if score < 50.0 {
            RiskLevel::Medium
        } else if score < 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Classify the regime for one snapshot's anomalies and overall risk
pub fn classify_regime(anomalies: &[Anomaly], overall_risk: f64) -> MarketRegime {
    let critical_count = anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::Critical)
        .count();
    let high_count = anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::High)
        .count();
    let manipulation_seen = anomalies
        .iter()
        .any(|a| matches!(a.anomaly_type, AnomalyType::Spoofing | AnomalyType::Layering));

    if critical_count >= 2 || manipulation_seen {
        return MarketRegime::ManipulationSuspected;
    }

    if overall_risk > 70.0 || high_count >= 3 {
        return MarketRegime::Stressed;
    }

    if overall_risk > 40.0 {
        return MarketRegime::ExecutionHot;
    }

    MarketRegime::Calm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyDetails;
    use crate::testing::fixture_time;
    use crate::types::BookSide;
    use chrono::Utc;

    fn anomaly(anomaly_type: AnomalyType, severity: AnomalySeverity) -> Anomaly {
        let details = match anomaly_type {
            AnomalyType::Spoofing => AnomalyDetails::Spoofing {
                side: BookSide::Bid,
                level: 1,
                price: 100.0,
                volume: 5_000.0,
                avg_volume: 100.0,
            },
            AnomalyType::Layering => AnomalyDetails::Layering {
                side: BookSide::Ask,
                large_order_count: 4,
            },
            _ => AnomalyDetails::HeavyImbalance {
                side: BookSide::Bid,
                imbalance: 0.9,
                bid_depth: 950.0,
                ask_depth: 50.0,
            },
        };
        Anomaly {
            anomaly_type,
            severity,
            message: "test".into(),
            timestamp: fixture_time().unwrap_or_else(Utc::now),
            risk_score: 50.0,
            details,
        }
    }

    #[test]
    fn test_calm_by_default() {
        assert_eq!(classify_regime(&[], 0.0), MarketRegime::Calm);
        assert_eq!(classify_regime(&[], 40.0), MarketRegime::Calm);
    }

    #[test]
    fn test_execution_hot_and_stressed_thresholds() {
        assert_eq!(classify_regime(&[], 40.1), MarketRegime::ExecutionHot);
        assert_eq!(classify_regime(&[], 70.0), MarketRegime::ExecutionHot);
        assert_eq!(classify_regime(&[], 70.1), MarketRegime::Stressed);

        let highs = vec![anomaly(AnomalyType::HeavyImbalance, AnomalySeverity::High); 3];
        assert_eq!(classify_regime(&highs, 0.0), MarketRegime::Stressed);
        assert_eq!(classify_regime(&highs[..2], 0.0), MarketRegime::Calm);
    }

    #[test]
    fn test_manipulation_overrides_risk() {
        let spoof = vec![anomaly(AnomalyType::Spoofing, AnomalySeverity::Medium)];
        for risk in [0.0, 50.0, 100.0] {
            assert_eq!(classify_regime(&spoof, risk), MarketRegime::ManipulationSuspected);
        }

        let layering = vec![anomaly(AnomalyType::Layering, AnomalySeverity::High)];
        assert_eq!(classify_regime(&layering, 0.0), MarketRegime::ManipulationSuspected);

        let criticals = vec![anomaly(AnomalyType::SpreadShock, AnomalySeverity::Critical); 2];
        assert_eq!(classify_regime(&criticals, 0.0), MarketRegime::ManipulationSuspected);
        assert_eq!(classify_regime(&criticals[..1], 0.0), MarketRegime::Calm);
    }

    #[test]
    fn test_regime_serialization() {
        assert_eq!(serde_json::to_string(&MarketRegime::Calm).unwrap(), "\"Calm\"");
        assert_eq!(
            serde_json::to_string(&MarketRegime::ExecutionHot).unwrap(),
            "\"Execution Hot\""
        );
        let parsed: MarketRegime = serde_json::from_str("\"Manipulation Suspected\"").unwrap();
        assert_eq!(parsed, MarketRegime::ManipulationSuspected);
        assert_eq!(MarketRegime::Stressed.to_string(), "Stressed");
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_score(10.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(74.9), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75.0), RiskLevel::Critical);
    }

    #[test]
    fn test_descriptions_present() {
        for regime in [
            MarketRegime::Calm,
            MarketRegime::Stressed,
            MarketRegime::ExecutionHot,
            MarketRegime::ManipulationSuspected,
        ] {
            assert!(!regime.description().is_empty());
            assert!(!regime.recommendation().is_empty());
        }
    }
}
