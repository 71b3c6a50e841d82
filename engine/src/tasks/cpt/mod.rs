//! Generic continuous-performance task: one engine, two protocol presets
//! (letter and shape), a pure metrics pass, and a heuristic risk interpreter.

pub mod engine;
pub mod metrics;
pub mod protocol;
pub mod risk;
pub mod runner;

pub use engine::{
    CptEngine, EngineState, OffOutcome, OnsetOutcome, PlannedStimulus, RandomSource,
    ResponseOutcome, ScheduledOnset, ScriptedSource, SessionView, StartPlan, Trial, TrialLog,
    TrialSource,
};
pub use metrics::{CptMetrics, IsiStratum, PhaseStratum, ResponseStyle, StratumMetrics};
pub use protocol::{
    DetectabilityIndex, PhasePlan, PhaseSpec, ProtocolConfig, RiskDirection, RiskMetric, RiskRule,
    RiskThresholds,
};
pub use risk::{interpret, Interpretation, RiskBand};
pub use runner::{drive, CptEvent, CptSession};
