//! Heuristic risk interpretation of a metrics snapshot.
//!
//! A pure function from metrics to indicators, concerns, an accumulated
//! score, and a Low/Moderate/High band. The thresholds and point values live
//! in the protocol's [`RiskThresholds`] table and are screening heuristics,
//! not a validated clinical scale.

use serde::{Deserialize, Serialize};

use super::metrics::CptMetrics;
use super::protocol::{RiskDirection, RiskMetric, RiskThresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interpretation {
    pub indicators: Vec<String>,
    pub concerns: Vec<String>,
    pub score: u32,
    pub band: RiskBand,
}

impl Interpretation {
    pub fn empty() -> Self {
        Self {
            indicators: Vec::new(),
            concerns: Vec::new(),
            score: 0,
            band: RiskBand::Low,
        }
    }
}

pub fn interpret(metrics: &CptMetrics, thresholds: &RiskThresholds) -> Interpretation {
    if metrics.total_trials == 0 {
        return Interpretation::empty();
    }

    let mut indicators = Vec::new();
    let mut concerns = Vec::new();
    let mut score = 0u32;

    for rule in &thresholds.rules {
        let Some(value) = metric_value(metrics, rule.metric) else {
            continue;
        };

        let crossed = |threshold: f64| match rule.direction {
            RiskDirection::Above => value > threshold,
            RiskDirection::Below => value < threshold,
        };

        let (severity, points) = if crossed(rule.elevated) {
            ("elevated", rule.elevated_points)
        } else if crossed(rule.moderate) {
            ("moderate", rule.moderate_points)
        } else {
            continue;
        };

        indicators.push(format!("{} ({severity})", rule.indicator));
        concerns.push(rule.concern.to_string());
        score += points;
    }

    let band = if score >= thresholds.high_cutoff {
        RiskBand::High
    } else if score >= thresholds.moderate_cutoff {
        RiskBand::Moderate
    } else {
        RiskBand::Low
    };

    Interpretation {
        indicators,
        concerns,
        score,
        band,
    }
}

/// Rule input value, or `None` when the snapshot cannot support the rule
/// (insufficient-sample sentinel, or a stratification the run never reached).
fn metric_value(metrics: &CptMetrics, metric: RiskMetric) -> Option<f64> {
    match metric {
        RiskMetric::OmissionRate => Some(metrics.omission_rate),
        RiskMetric::CommissionRate => Some(metrics.commission_rate),
        RiskMetric::Variability => (metrics.variability >= 0.0).then_some(metrics.variability),
        RiskMetric::AnticipatoryRate => Some(metrics.anticipatory_rate),
        RiskMetric::RtDrift => Some(metrics.rt_drift_ms_per_phase),
        RiskMetric::Detectability => {
            (metrics.target_trials > 0 && metrics.non_target_trials > 0)
                .then_some(metrics.detectability)
        }
        RiskMetric::PhaseGap => Some(metrics.phase_gap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::cpt::protocol::ProtocolConfig;

    fn metrics_with(f: impl FnOnce(&mut CptMetrics)) -> CptMetrics {
        let mut metrics = CptMetrics::empty();
        metrics.total_trials = 100;
        metrics.target_trials = 50;
        metrics.non_target_trials = 50;
        metrics.detectability = 3.5;
        f(&mut metrics);
        metrics
    }

    #[test]
    fn clean_run_scores_low() {
        let interpretation = interpret(&metrics_with(|_| {}), &ProtocolConfig::letter().risk);
        assert_eq!(interpretation.score, 0);
        assert_eq!(interpretation.band, RiskBand::Low);
        assert!(interpretation.indicators.is_empty());
    }

    #[test]
    fn elevated_crossing_scores_elevated_points_only() {
        let metrics = metrics_with(|m| m.omission_rate = 0.25);
        let interpretation = interpret(&metrics, &ProtocolConfig::letter().risk);
        assert_eq!(interpretation.score, 2);
        assert_eq!(interpretation.indicators.len(), 1);
        assert!(interpretation.indicators[0].contains("elevated"));
        assert_eq!(interpretation.concerns.len(), 1);
    }

    #[test]
    fn moderate_crossing_scores_moderate_points() {
        let metrics = metrics_with(|m| m.commission_rate = 0.20);
        let interpretation = interpret(&metrics, &ProtocolConfig::letter().risk);
        assert_eq!(interpretation.score, 1);
        assert!(interpretation.indicators[0].contains("moderate"));
    }

    #[test]
    fn accumulated_score_maps_to_band() {
        let metrics = metrics_with(|m| {
            m.omission_rate = 0.25; // +2
            m.commission_rate = 0.35; // +2
            m.variability = 40.0; // +2
        });
        let interpretation = interpret(&metrics, &ProtocolConfig::letter().risk);
        assert_eq!(interpretation.score, 6);
        assert_eq!(interpretation.band, RiskBand::High);
    }

    #[test]
    fn variability_sentinel_skips_the_rule() {
        let metrics = metrics_with(|m| m.variability = -1.0);
        let interpretation = interpret(&metrics, &ProtocolConfig::letter().risk);
        assert!(interpretation
            .indicators
            .iter()
            .all(|indicator| !indicator.contains("variability")));
        assert_eq!(interpretation.score, 0);
    }

    #[test]
    fn reduced_detectability_fires_a_below_rule() {
        let metrics = metrics_with(|m| m.detectability = 0.5);
        let interpretation = interpret(&metrics, &ProtocolConfig::letter().risk);
        assert_eq!(interpretation.score, 2);
        assert!(interpretation.indicators[0].contains("discriminability"));
    }

    #[test]
    fn empty_metrics_interpret_as_empty() {
        let interpretation = interpret(&CptMetrics::empty(), &ProtocolConfig::letter().risk);
        assert_eq!(interpretation, Interpretation::empty());
    }
}
