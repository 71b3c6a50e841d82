//! Metric definitions and aggregation for continuous-performance runs.
//!
//! [`CptMetrics::from_trials`] is a pure function over the committed trial
//! log, recomputed wholesale after every commit; nothing here is mutated
//! incrementally.

use serde::{Deserialize, Serialize};

use super::engine::Trial;
use super::protocol::{DetectabilityIndex, ProtocolConfig};

/// Sentinel for statistics that need at least two qualifying hits: one hit
/// gives no spread, which is distinct from a true zero.
pub const INSUFFICIENT_SAMPLE: f64 = -1.0;

/// Response-style label for the letter protocol, derived from hit and
/// false-alarm rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStyle {
    Accurate,
    Cautious,
    Balanced,
    FastImpulsive,
}

/// Error counts and rates for one stratum (overall, one phase, or one ISI).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StratumMetrics {
    pub trials: usize,
    pub targets: usize,
    pub non_targets: usize,
    pub omissions: u32,
    pub commissions: u32,
    pub omission_rate: f64,
    pub commission_rate: f64,
    /// Qualifying (non-anticipatory) hits in this stratum.
    pub hit_count: u32,
    pub mean_hit_rt_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseStratum {
    pub phase: usize,
    pub stats: StratumMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsiStratum {
    pub isi_ms: u64,
    pub stats: StratumMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CptMetrics {
    pub total_trials: usize,
    pub target_trials: usize,
    pub non_target_trials: usize,
    pub omission_errors: u32,
    pub commission_errors: u32,
    pub omission_rate: f64,
    pub commission_rate: f64,
    /// Target trials with any response, anticipatory included; together with
    /// omissions this partitions the targets.
    pub targets_responded: u32,
    /// Responses faster than the anticipatory threshold, on any trial kind.
    pub anticipatory_responses: u32,
    /// Anticipatory responses over all responses.
    pub anticipatory_rate: f64,
    pub hit_rate: f64,
    pub false_alarm_rate: f64,
    pub mean_hit_rt_ms: f64,
    /// Population SD of qualifying hit latencies; 0 with no hits,
    /// [`INSUFFICIENT_SAMPLE`] with exactly one.
    pub sd_hit_rt_ms: f64,
    /// Coefficient of variation (`sd / mean × 100`), same sentinel rule.
    pub variability: f64,
    pub detectability: f64,
    pub response_style: Option<ResponseStyle>,
    /// OLS slope of per-phase mean hit RT against phase index.
    pub rt_drift_ms_per_phase: f64,
    /// Spread between the best and worst per-phase omission rate.
    pub phase_gap: f64,
    pub by_phase: Vec<PhaseStratum>,
    pub by_isi: Vec<IsiStratum>,
    pub meets_min_trial_requirement: bool,
}

impl CptMetrics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_trials(trials: &[Trial], config: &ProtocolConfig) -> Self {
        let threshold = config.anticipatory_threshold_ms;

        let mut overall = StratumAccum::default();
        let mut by_phase: Vec<StratumAccum> = (0..config.phase_count())
            .map(|_| StratumAccum::default())
            .collect();
        let mut by_isi: Vec<(u64, StratumAccum)> = config
            .isi_set_ms
            .iter()
            .map(|&isi| (isi, StratumAccum::default()))
            .collect();

        let mut targets_responded = 0u32;
        let mut responses = 0u32;
        let mut anticipatory = 0u32;
        let mut hit_rts = Vec::new();

        for trial in trials {
            overall.push(trial, threshold);
            if let Some(stratum) = by_phase.get_mut(trial.phase) {
                stratum.push(trial, threshold);
            }
            if let Some((_, stratum)) = by_isi.iter_mut().find(|(isi, _)| *isi == trial.isi_ms) {
                stratum.push(trial, threshold);
            }

            if trial.responded {
                responses += 1;
                if trial.rt_ms.map_or(false, |rt| rt < threshold) {
                    anticipatory += 1;
                }
                if trial.is_target {
                    targets_responded += 1;
                    if let Some(rt) = trial.rt_ms.filter(|&rt| rt >= threshold) {
                        hit_rts.push(rt);
                    }
                }
            }
        }

        let target_trials = overall.targets;
        let non_target_trials = overall.non_targets;
        let hit_rate = rate(targets_responded, target_trials);
        let false_alarm_rate = rate(overall.commissions, non_target_trials);

        let (mean_hit_rt_ms, sd_hit_rt_ms, variability) = spread(&hit_rts);

        let detectability = match config.detectability {
            DetectabilityIndex::Linear => (hit_rate - false_alarm_rate) * 100.0,
            DetectabilityIndex::DPrime => d_prime(hit_rate, false_alarm_rate),
        };

        let response_style = config
            .classify_response_style
            .then(|| classify_style(hit_rate, false_alarm_rate));

        let by_phase: Vec<PhaseStratum> = by_phase
            .into_iter()
            .enumerate()
            .map(|(phase, accum)| PhaseStratum {
                phase,
                stats: accum.finish(),
            })
            .collect();
        let by_isi: Vec<IsiStratum> = by_isi
            .into_iter()
            .map(|(isi_ms, accum)| IsiStratum {
                isi_ms,
                stats: accum.finish(),
            })
            .collect();

        let rt_drift_ms_per_phase = drift_slope(&by_phase);
        let phase_gap = omission_gap(&by_phase);

        Self {
            total_trials: overall.trials,
            target_trials,
            non_target_trials,
            omission_errors: overall.omissions,
            commission_errors: overall.commissions,
            omission_rate: rate(overall.omissions, target_trials),
            commission_rate: rate(overall.commissions, non_target_trials),
            targets_responded,
            anticipatory_responses: anticipatory,
            anticipatory_rate: rate(anticipatory, responses as usize),
            hit_rate,
            false_alarm_rate,
            mean_hit_rt_ms,
            sd_hit_rt_ms,
            variability,
            detectability,
            response_style,
            rt_drift_ms_per_phase,
            phase_gap,
            by_phase,
            by_isi,
            meets_min_trial_requirement: overall.trials >= config.min_trials,
        }
    }
}

/// Per-stratum accumulation pass.
#[derive(Debug, Default)]
struct StratumAccum {
    trials: usize,
    targets: usize,
    non_targets: usize,
    omissions: u32,
    commissions: u32,
    hit_rts: Vec<f64>,
}

impl StratumAccum {
    fn push(&mut self, trial: &Trial, anticipatory_threshold_ms: f64) {
        self.trials += 1;
        if trial.is_target {
            self.targets += 1;
            if trial.responded {
                if let Some(rt) = trial.rt_ms.filter(|&rt| rt >= anticipatory_threshold_ms) {
                    self.hit_rts.push(rt);
                }
            } else {
                self.omissions += 1;
            }
        } else {
            self.non_targets += 1;
            if trial.responded {
                self.commissions += 1;
            }
        }
    }

    fn finish(self) -> StratumMetrics {
        StratumMetrics {
            omission_rate: rate(self.omissions, self.targets),
            commission_rate: rate(self.commissions, self.non_targets),
            hit_count: self.hit_rts.len() as u32,
            mean_hit_rt_ms: mean(&self.hit_rts),
            trials: self.trials,
            targets: self.targets,
            non_targets: self.non_targets,
            omissions: self.omissions,
            commissions: self.commissions,
        }
    }
}

fn rate(numerator: u32, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.iter().sum::<f64>() / data.len() as f64
    }
}

/// Mean, population SD, and coefficient of variation of the qualifying hit
/// latencies, under the sentinel policy: no hits gives zeros, a single hit
/// gives [`INSUFFICIENT_SAMPLE`] for the spread statistics.
fn spread(data: &[f64]) -> (f64, f64, f64) {
    match data.len() {
        0 => (0.0, 0.0, 0.0),
        1 => (data[0], INSUFFICIENT_SAMPLE, INSUFFICIENT_SAMPLE),
        n => {
            let mean = mean(data);
            let variance = data
                .iter()
                .map(|value| {
                    let diff = value - mean;
                    diff * diff
                })
                .sum::<f64>()
                / n as f64;
            let sd = variance.sqrt();
            let cv = if mean > 0.0 { sd / mean * 100.0 } else { 0.0 };
            (mean, sd, cv)
        }
    }
}

fn classify_style(hit_rate: f64, false_alarm_rate: f64) -> ResponseStyle {
    if hit_rate >= 0.85 && false_alarm_rate <= 0.15 {
        ResponseStyle::Accurate
    } else if false_alarm_rate > 0.30 {
        ResponseStyle::FastImpulsive
    } else if hit_rate < 0.65 {
        ResponseStyle::Cautious
    } else {
        ResponseStyle::Balanced
    }
}

/// Signal-detection d′: `Z(hit) − Z(fa)` with both rates clamped to
/// [0.01, 0.99] so perfect or empty runs stay finite.
fn d_prime(hit_rate: f64, false_alarm_rate: f64) -> f64 {
    let hit = hit_rate.clamp(0.01, 0.99);
    let fa = false_alarm_rate.clamp(0.01, 0.99);
    inverse_normal_cdf(hit) - inverse_normal_cdf(fa)
}

/// OLS slope of per-phase mean hit RT against phase index, over phases with
/// at least one qualifying hit. Needs two such phases, else 0.
fn drift_slope(by_phase: &[PhaseStratum]) -> f64 {
    let points: Vec<(f64, f64)> = by_phase
        .iter()
        .filter(|stratum| stratum.stats.hit_count > 0)
        .map(|stratum| (stratum.phase as f64, stratum.stats.mean_hit_rt_ms))
        .collect();
    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denominator
    }
}

/// Spread between the worst and best per-phase omission rate, over phases
/// that actually contained targets.
fn omission_gap(by_phase: &[PhaseStratum]) -> f64 {
    let rates: Vec<f64> = by_phase
        .iter()
        .filter(|stratum| stratum.stats.targets > 0)
        .map(|stratum| stratum.stats.omission_rate)
        .collect();
    match (
        rates.iter().cloned().fold(f64::INFINITY, f64::min),
        rates.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    ) {
        (min, max) if min.is_finite() && max.is_finite() => max - min,
        _ => 0.0,
    }
}

/// Acklam's rational approximation for the inverse CDF of the standard
/// normal distribution. Maximum error ~4.5e-4 across (0, 1).
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }

    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        return (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0);
    }

    if p > P_HIGH {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        return -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0);
    }

    let q = p - 0.5;
    let r = q * q;
    (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
        / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::cpt::protocol::{PhasePlan, PhaseSpec};

    fn test_config() -> ProtocolConfig {
        let mut config = ProtocolConfig::letter();
        config.phases = vec![
            PhaseSpec {
                target: "X".to_string(),
                target_probability: 0.5,
            };
            3
        ];
        config.phase_plan = PhasePlan::Blocks {
            trials_per_sub_block: 4,
            sub_blocks_per_block: 3,
            block_count: 1,
        };
        config.isi_set_ms = vec![1_000, 2_000];
        config.min_trials = 1;
        config
    }

    fn trial(seq: u32, is_target: bool, rt_ms: Option<f64>) -> Trial {
        Trial {
            seq,
            symbol: if is_target { "X" } else { "A" }.to_string(),
            is_target,
            phase: ((seq - 1) / 4) as usize,
            isi_ms: 1_000,
            onset_ms: Some(seq as f64 * 1_000.0),
            responded: rt_ms.is_some(),
            rt_ms,
        }
    }

    #[test]
    fn omissions_and_responded_targets_partition_targets() {
        let trials = vec![
            trial(1, true, Some(400.0)),
            trial(2, true, None),
            trial(3, true, Some(50.0)), // anticipatory, still responded
            trial(4, false, None),
            trial(5, false, Some(300.0)),
        ];
        let metrics = CptMetrics::from_trials(&trials, &test_config());

        assert_eq!(metrics.target_trials, 3);
        assert_eq!(
            metrics.omission_errors + metrics.targets_responded,
            metrics.target_trials as u32
        );
        assert_eq!(metrics.commission_errors, 1);
        assert_eq!(metrics.non_target_trials, 2);
        assert_eq!(metrics.anticipatory_responses, 1);
    }

    #[test]
    fn sd_sentinel_policy() {
        let config = test_config();

        let none = CptMetrics::from_trials(&[trial(1, true, None)], &config);
        assert_eq!(none.mean_hit_rt_ms, 0.0);
        assert_eq!(none.sd_hit_rt_ms, 0.0);
        assert_eq!(none.variability, 0.0);

        let one = CptMetrics::from_trials(&[trial(1, true, Some(420.0))], &config);
        assert_eq!(one.mean_hit_rt_ms, 420.0);
        assert_eq!(one.sd_hit_rt_ms, INSUFFICIENT_SAMPLE);
        assert_eq!(one.variability, INSUFFICIENT_SAMPLE);

        let two = CptMetrics::from_trials(
            &[trial(1, true, Some(400.0)), trial(2, true, Some(600.0))],
            &config,
        );
        assert_eq!(two.mean_hit_rt_ms, 500.0);
        assert_eq!(two.sd_hit_rt_ms, 100.0); // population SD
        assert!((two.variability - 20.0).abs() < 1e-9);
    }

    #[test]
    fn anticipatory_responses_are_excluded_from_hit_rt() {
        let trials = vec![
            trial(1, true, Some(40.0)),
            trial(2, true, Some(500.0)),
            trial(3, true, Some(700.0)),
        ];
        let metrics = CptMetrics::from_trials(&trials, &test_config());
        assert_eq!(metrics.mean_hit_rt_ms, 600.0);
        assert_eq!(metrics.anticipatory_responses, 1);
        assert_eq!(metrics.targets_responded, 3);
    }

    #[test]
    fn d_prime_stays_finite_at_the_extremes() {
        let value = d_prime(0.99, 0.01);
        assert!(value.is_finite());
        assert!(value > 4.0);
        assert!(d_prime(1.0, 0.0).is_finite());
    }

    #[test]
    fn linear_detectability_uses_raw_rates() {
        let mut config = test_config();
        config.detectability = DetectabilityIndex::Linear;
        let trials = vec![
            trial(1, true, Some(400.0)),
            trial(2, true, None),
            trial(3, false, None),
            trial(4, false, None),
        ];
        let metrics = CptMetrics::from_trials(&trials, &config);
        // hit rate 0.5, false-alarm rate 0.0
        assert!((metrics.detectability - 50.0).abs() < 1e-9);
    }

    #[test]
    fn drift_slope_matches_hand_computation() {
        // Phase means 400, 450, 500 over phases 0, 1, 2: slope 50 ms/phase.
        let trials = vec![
            trial(1, true, Some(400.0)),
            trial(5, true, Some(450.0)),
            trial(9, true, Some(500.0)),
        ];
        let metrics = CptMetrics::from_trials(&trials, &test_config());
        assert!((metrics.rt_drift_ms_per_phase - 50.0).abs() < 1e-9);
    }

    #[test]
    fn drift_needs_two_phases_with_hits() {
        let trials = vec![trial(1, true, Some(400.0)), trial(2, true, Some(410.0))];
        let metrics = CptMetrics::from_trials(&trials, &test_config());
        assert_eq!(metrics.rt_drift_ms_per_phase, 0.0);
    }

    #[test]
    fn strata_rates_are_zero_guarded() {
        let trials = vec![trial(1, true, Some(400.0))];
        let metrics = CptMetrics::from_trials(&trials, &test_config());

        // Phase 1 and 2 saw no trials at all.
        assert_eq!(metrics.by_phase.len(), 3);
        assert_eq!(metrics.by_phase[1].stats.omission_rate, 0.0);
        assert_eq!(metrics.by_phase[1].stats.commission_rate, 0.0);

        // The 2000 ms ISI stratum is empty.
        assert_eq!(metrics.by_isi.len(), 2);
        assert_eq!(metrics.by_isi[1].stats.trials, 0);
        assert_eq!(metrics.by_isi[1].stats.omission_rate, 0.0);
    }

    #[test]
    fn response_style_labels() {
        assert_eq!(classify_style(0.95, 0.05), ResponseStyle::Accurate);
        assert_eq!(classify_style(0.95, 0.40), ResponseStyle::FastImpulsive);
        assert_eq!(classify_style(0.50, 0.05), ResponseStyle::Cautious);
        assert_eq!(classify_style(0.75, 0.20), ResponseStyle::Balanced);
    }

    #[test]
    fn empty_log_yields_empty_metrics() {
        let metrics = CptMetrics::from_trials(&[], &test_config());
        assert_eq!(metrics.total_trials, 0);
        assert_eq!(metrics.omission_rate, 0.0);
        assert_eq!(metrics.sd_hit_rt_ms, 0.0);
        assert!(!metrics.meets_min_trial_requirement);
    }
}
