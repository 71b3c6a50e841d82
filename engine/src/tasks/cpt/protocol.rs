//! Protocol configuration for the continuous-performance task engine.
//!
//! The letter and shape protocols are two configurations of one engine: the
//! caller hands a [`ProtocolConfig`] to [`super::engine::CptEngine`] and the
//! engine hard-codes nothing. The [`letter`](ProtocolConfig::letter) and
//! [`shape`](ProtocolConfig::shape) presets carry the defaults the battery
//! ships with; the risk tables in particular are heuristic screening values,
//! not a validated clinical scale, and are exposed as data precisely so a
//! deployment can substitute its own.

/// One analysis phase: a block/sub-block for the letter protocol, a half for
/// the shape protocol. The target rule can change between phases (the shape
/// protocol's dual condition swaps targets at the half split).
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    /// Symbol classified as target while this phase is active.
    pub target: String,
    /// Probability that a scheduled stimulus is the target.
    pub target_probability: f64,
}

/// How the phase index is derived. Deterministic in the trial number or the
/// elapsed session time; never stored as separate mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhasePlan {
    /// Fixed-size sub-blocks; the phase index is the sub-block ordinal.
    Blocks {
        trials_per_sub_block: u32,
        sub_blocks_per_block: u32,
        block_count: u32,
    },
    /// Two halves split at an elapsed-time point.
    Halves { split_ms: u64 },
}

/// Which discriminability index the metrics pass reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectabilityIndex {
    /// `(hit rate − false-alarm rate) × 100`.
    Linear,
    /// Signal-detection d′ with rates clamped to [0.01, 0.99].
    DPrime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Stable identifier used in summary records ("cpt-letter", "cpt-shape").
    pub task_id: &'static str,
    /// Full stimulus alphabet. Non-target identity is drawn uniformly from
    /// this set minus the active phase's target.
    pub symbols: Vec<String>,
    /// One entry per phase; length must match the plan's phase count.
    pub phases: Vec<PhaseSpec>,
    pub phase_plan: PhasePlan,
    /// Candidate inter-stimulus intervals, drawn uniformly per trial. A
    /// single-element set yields a fixed ISI.
    pub isi_set_ms: Vec<u64>,
    pub stimulus_visible_ms: u64,
    /// Delay from session start to the first stimulus onset.
    pub lead_in_ms: u64,
    /// Session ends once this many trials have been presented.
    pub trial_cap: Option<u32>,
    /// Session ends once this much wall-clock time has elapsed.
    pub session_budget_ms: Option<u64>,
    /// Responses faster than this are anticipatory: counted, but excluded
    /// from hit reaction-time statistics.
    pub anticipatory_threshold_ms: f64,
    pub detectability: DetectabilityIndex,
    /// Letter protocol only: derive the Accurate/Cautious/Balanced/Fast
    /// response-style label.
    pub classify_response_style: bool,
    /// Below this many committed trials the run is flagged in QC.
    pub min_trials: usize,
    pub risk: RiskThresholds,
}

impl ProtocolConfig {
    /// Total number of analysis phases in this protocol.
    pub fn phase_count(&self) -> usize {
        match self.phase_plan {
            PhasePlan::Blocks {
                sub_blocks_per_block,
                block_count,
                ..
            } => (sub_blocks_per_block * block_count) as usize,
            PhasePlan::Halves { .. } => 2,
        }
    }

    /// Phase index for a trial, from its 1-based number and the elapsed
    /// session time at its onset. Clamped so stray trials past the nominal
    /// plan end still land in the final phase.
    pub fn phase_for(&self, trial_number: u32, elapsed_ms: f64) -> usize {
        let last = self.phase_count().saturating_sub(1);
        match self.phase_plan {
            PhasePlan::Blocks {
                trials_per_sub_block,
                ..
            } => {
                let index = (trial_number.saturating_sub(1) / trials_per_sub_block.max(1)) as usize;
                index.min(last)
            }
            PhasePlan::Halves { split_ms } => {
                if elapsed_ms < split_ms as f64 {
                    0
                } else {
                    last
                }
            }
        }
    }

    pub fn phase_spec(&self, phase: usize) -> &PhaseSpec {
        &self.phases[phase.min(self.phases.len() - 1)]
    }

    /// Sustained-attention letter protocol: 6 blocks of 3 sub-blocks of 20
    /// trials, variable ISI, single target letter with per-sub-block target
    /// density.
    pub fn letter() -> Self {
        let symbols = ["X", "A", "B", "C", "D", "E", "F", "H", "K", "L", "M", "T"]
            .into_iter()
            .map(str::to_string)
            .collect();

        // Target density cycles across the three sub-blocks of each block.
        let densities = [0.25, 0.50, 0.75];
        let phases = (0..18)
            .map(|index| PhaseSpec {
                target: "X".to_string(),
                target_probability: densities[index % densities.len()],
            })
            .collect();

        Self {
            task_id: "cpt-letter",
            symbols,
            phases,
            phase_plan: PhasePlan::Blocks {
                trials_per_sub_block: 20,
                sub_blocks_per_block: 3,
                block_count: 6,
            },
            isi_set_ms: vec![1_000, 2_000, 4_000],
            stimulus_visible_ms: 250,
            lead_in_ms: 1_000,
            trial_cap: Some(360),
            session_budget_ms: Some(840_000),
            anticipatory_threshold_ms: 100.0,
            detectability: DetectabilityIndex::DPrime,
            classify_response_style: true,
            min_trials: 60,
            risk: RiskThresholds::letter(),
        }
    }

    /// Dual-condition shape protocol: two time-split halves with a different
    /// target shape per half and a fixed ISI.
    pub fn shape() -> Self {
        let symbols = ["circle", "square", "triangle", "star", "diamond"]
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            task_id: "cpt-shape",
            symbols,
            phases: vec![
                PhaseSpec {
                    target: "circle".to_string(),
                    target_probability: 0.30,
                },
                PhaseSpec {
                    target: "square".to_string(),
                    target_probability: 0.30,
                },
            ],
            phase_plan: PhasePlan::Halves { split_ms: 150_000 },
            isi_set_ms: vec![1_500],
            stimulus_visible_ms: 500,
            lead_in_ms: 1_500,
            trial_cap: Some(200),
            session_budget_ms: Some(300_000),
            anticipatory_threshold_ms: 100.0,
            detectability: DetectabilityIndex::Linear,
            classify_response_style: false,
            min_trials: 40,
            risk: RiskThresholds::shape(),
        }
    }
}

/// Which metric a risk rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMetric {
    OmissionRate,
    CommissionRate,
    Variability,
    AnticipatoryRate,
    RtDrift,
    Detectability,
    PhaseGap,
}

/// Adverse direction for a rule's metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDirection {
    Above,
    Below,
}

/// One two-threshold indicator rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRule {
    pub metric: RiskMetric,
    pub direction: RiskDirection,
    pub moderate: f64,
    pub elevated: f64,
    pub moderate_points: u32,
    pub elevated_points: u32,
    pub indicator: &'static str,
    pub concern: &'static str,
}

/// Full heuristic risk table for one protocol: indicator rules plus the two
/// score cutoffs mapping to the Low/Moderate/High band.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskThresholds {
    pub rules: Vec<RiskRule>,
    pub moderate_cutoff: u32,
    pub high_cutoff: u32,
}

impl RiskThresholds {
    pub fn letter() -> Self {
        Self {
            rules: vec![
                RiskRule {
                    metric: RiskMetric::OmissionRate,
                    direction: RiskDirection::Above,
                    moderate: 0.10,
                    elevated: 0.20,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated omission rate",
                    concern: "Missed targets suggest lapses in sustained attention.",
                },
                RiskRule {
                    metric: RiskMetric::CommissionRate,
                    direction: RiskDirection::Above,
                    moderate: 0.15,
                    elevated: 0.30,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated commission rate",
                    concern: "Responses to non-targets suggest impulsive responding.",
                },
                RiskRule {
                    metric: RiskMetric::Variability,
                    direction: RiskDirection::Above,
                    moderate: 20.0,
                    elevated: 35.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated reaction-time variability",
                    concern: "Inconsistent response speed suggests fluctuating attention.",
                },
                RiskRule {
                    metric: RiskMetric::AnticipatoryRate,
                    direction: RiskDirection::Above,
                    moderate: 0.05,
                    elevated: 0.10,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Frequent anticipatory responses",
                    concern: "Premature key presses suggest guessing rather than detection.",
                },
                RiskRule {
                    metric: RiskMetric::RtDrift,
                    direction: RiskDirection::Above,
                    moderate: 10.0,
                    elevated: 25.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Slowing over time",
                    concern: "Reaction time drifting upward across blocks suggests fatigue.",
                },
                RiskRule {
                    metric: RiskMetric::Detectability,
                    direction: RiskDirection::Below,
                    moderate: 2.0,
                    elevated: 1.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Reduced discriminability",
                    concern: "Weak target/non-target separation suggests degraded vigilance.",
                },
                RiskRule {
                    metric: RiskMetric::PhaseGap,
                    direction: RiskDirection::Above,
                    moderate: 0.15,
                    elevated: 0.30,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Uneven performance across blocks",
                    concern: "Large block-to-block swings suggest unstable engagement.",
                },
            ],
            moderate_cutoff: 3,
            high_cutoff: 6,
        }
    }

    pub fn shape() -> Self {
        Self {
            rules: vec![
                RiskRule {
                    metric: RiskMetric::OmissionRate,
                    direction: RiskDirection::Above,
                    moderate: 0.15,
                    elevated: 0.25,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated omission rate",
                    concern: "Missed targets suggest lapses in sustained attention.",
                },
                RiskRule {
                    metric: RiskMetric::CommissionRate,
                    direction: RiskDirection::Above,
                    moderate: 0.20,
                    elevated: 0.35,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated commission rate",
                    concern: "Responses to non-targets suggest impulsive responding.",
                },
                RiskRule {
                    metric: RiskMetric::Variability,
                    direction: RiskDirection::Above,
                    moderate: 25.0,
                    elevated: 40.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Elevated reaction-time variability",
                    concern: "Inconsistent response speed suggests fluctuating attention.",
                },
                RiskRule {
                    metric: RiskMetric::RtDrift,
                    direction: RiskDirection::Above,
                    moderate: 15.0,
                    elevated: 40.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Slowing between halves",
                    concern: "Reaction time rising in the second half suggests fatigue.",
                },
                RiskRule {
                    metric: RiskMetric::Detectability,
                    direction: RiskDirection::Below,
                    moderate: 40.0,
                    elevated: 20.0,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Reduced discriminability",
                    concern: "Weak target/non-target separation suggests degraded vigilance.",
                },
                RiskRule {
                    metric: RiskMetric::PhaseGap,
                    direction: RiskDirection::Above,
                    moderate: 0.15,
                    elevated: 0.30,
                    moderate_points: 1,
                    elevated_points: 2,
                    indicator: "Uneven performance between halves",
                    concern: "A large half-to-half swing suggests unstable engagement.",
                },
            ],
            moderate_cutoff: 3,
            high_cutoff: 6,
        }
    }
}
