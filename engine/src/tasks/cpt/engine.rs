//! State machine for a continuous-performance run.
//!
//! The engine never reads the clock or sleeps. Every operation takes the
//! caller's timestamp, and timer work is returned as plain schedule values
//! ([`ScheduledOnset`], visible-duration, deadline) for the hosting shell to
//! honour. One trial is in flight at a time; it is committed to the
//! [`TrialLog`] when the *following* stimulus appears, or at session end.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::qc::QualityFlags;
use crate::core::summary::SummaryRecord;
use crate::core::timing::InstantStamp;

use super::metrics::CptMetrics;
use super::protocol::ProtocolConfig;
use super::risk::{interpret, Interpretation};

/// One stimulus presentation.
///
/// Mutated at most once (by an accepted response) while in flight; immutable
/// once committed to the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trial {
    /// 1-based, strictly increasing across the session.
    pub seq: u32,
    pub symbol: String,
    pub is_target: bool,
    /// Phase index at onset (block/sub-block ordinal or half).
    pub phase: usize,
    /// Nominal onset-to-onset interval; also the response-window length.
    pub isi_ms: u64,
    pub onset_ms: Option<InstantStamp>,
    pub responded: bool,
    /// Latency from onset, in `0.0..=isi_ms`.
    pub rt_ms: Option<f64>,
}

impl Trial {
    pub fn is_presented(&self) -> bool {
        self.onset_ms.is_some()
    }
}

/// Append-only, strictly ordered record of committed trials; the single
/// source of truth for scoring.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialLog {
    entries: Vec<Trial>,
}

impl TrialLog {
    /// Insert at the tail, or overwrite the existing slot when the sequence
    /// number is already present. The upsert covers a late response that
    /// lands after its trial was appended but before metrics recompute.
    pub fn commit(&mut self, trial: Trial) {
        if let Some(slot) = self.entries.iter_mut().find(|t| t.seq == trial.seq) {
            *slot = trial;
        } else {
            self.entries.push(trial);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.entries
    }

    /// Entries fit for scoring; anything never presented is discarded before
    /// the metrics pass sees it.
    pub fn completed(&self) -> Vec<Trial> {
        self.entries
            .iter()
            .filter(|t| t.is_presented())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    /// Waiting out the lead-in before the first onset; `seq` names the trial
    /// about to appear.
    Armed { seq: u32 },
    /// Stimulus on screen; response window open.
    StimulusVisible { seq: u32 },
    /// Stimulus hidden; window stays open until the next onset is due.
    WindowOpen { seq: u32 },
    Finished,
}

/// Timer the shell must arm: deliver a stimulus-on event for `seq` after
/// `wait_ms`. Stale deliveries are screened by `run_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledOnset {
    pub run_id: u64,
    pub seq: u32,
    pub wait_ms: u64,
}

/// Returned by [`CptEngine::start`]: the first onset timer plus the session
/// deadline, if the protocol carries a wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub first: ScheduledOnset,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnsetOutcome {
    /// Stimulus is now visible; hide it after `visible_ms`.
    Visible { visible_ms: u64 },
    /// The session ended instead of presenting this trial (cap or budget).
    Completed,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffOutcome {
    NextOnset(ScheduledOnset),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseOutcome {
    Accepted { rt_ms: f64 },
    /// Outside the window, duplicate, or no trial active. Silently dropped.
    Ignored,
}

/// Next stimulus as chosen by a [`TrialSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStimulus {
    pub symbol: String,
    pub is_target: bool,
    pub isi_ms: u64,
}

/// Stimulus/ISI selection seam. The default [`RandomSource`] draws per the
/// protocol's phase probabilities; a scripted source reproduces exact runs.
pub trait TrialSource: std::fmt::Debug {
    fn next(&mut self, config: &ProtocolConfig, phase: usize) -> PlannedStimulus;
}

#[derive(Debug)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TrialSource for RandomSource {
    fn next(&mut self, config: &ProtocolConfig, phase: usize) -> PlannedStimulus {
        let spec = config.phase_spec(phase);
        let is_target = self
            .rng
            .gen_bool(spec.target_probability.clamp(0.0, 1.0));

        let symbol = if is_target {
            spec.target.clone()
        } else {
            let pool: Vec<&String> = config
                .symbols
                .iter()
                .filter(|symbol| **symbol != spec.target)
                .collect();
            if pool.is_empty() {
                spec.target.clone()
            } else {
                pool[self.rng.gen_range(0..pool.len())].clone()
            }
        };

        let isi_ms = if config.isi_set_ms.is_empty() {
            1_000
        } else {
            config.isi_set_ms[self.rng.gen_range(0..config.isi_set_ms.len())]
        };

        PlannedStimulus {
            symbol,
            is_target,
            isi_ms,
        }
    }
}

/// Fixed trial plan, consumed in order. Used by test harnesses and scripted
/// demo runs; falls back to the final entry if the session outlives the
/// script.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    plan: Vec<PlannedStimulus>,
    cursor: usize,
}

impl ScriptedSource {
    pub fn new(plan: Vec<PlannedStimulus>) -> Self {
        Self { plan, cursor: 0 }
    }
}

impl TrialSource for ScriptedSource {
    fn next(&mut self, _config: &ProtocolConfig, _phase: usize) -> PlannedStimulus {
        let index = self.cursor.min(self.plan.len().saturating_sub(1));
        self.cursor += 1;
        self.plan[index].clone()
    }
}

/// Read-only view for rendering: current stimulus, progress, time budget.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionView {
    pub running: bool,
    pub finished: bool,
    pub trial_number: u32,
    pub phase: usize,
    pub stimulus: Option<String>,
    pub stimulus_visible: bool,
    pub time_remaining_ms: Option<f64>,
}

#[derive(Debug)]
pub struct CptEngine {
    pub config: ProtocolConfig,
    /// Bumped on every start/abort; schedule values carry it so late timer
    /// callbacks from a torn-down run are no-ops.
    pub run_id: u64,
    pub state: EngineState,
    source: Box<dyn TrialSource>,
    log: TrialLog,
    current: Option<Trial>,
    started_at: Option<InstantStamp>,
    finished_at: Option<InstantStamp>,
    metrics: CptMetrics,
    interpretation: Interpretation,
}

impl CptEngine {
    pub fn new(config: ProtocolConfig) -> Self {
        Self::with_source(config, Box::new(RandomSource::from_entropy()))
    }

    /// Deterministic schedules for a given seed.
    pub fn with_seed(config: ProtocolConfig, seed: u64) -> Self {
        Self::with_source(config, Box::new(RandomSource::seeded(seed)))
    }

    pub fn with_source(config: ProtocolConfig, source: Box<dyn TrialSource>) -> Self {
        Self {
            config,
            run_id: 0,
            state: EngineState::Idle,
            source,
            log: TrialLog::default(),
            current: None,
            started_at: None,
            finished_at: None,
            metrics: CptMetrics::empty(),
            interpretation: Interpretation::empty(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            EngineState::Armed { .. }
                | EngineState::StimulusVisible { .. }
                | EngineState::WindowOpen { .. }
        )
    }

    pub fn is_finished(&self) -> bool {
        self.state == EngineState::Finished
    }

    /// Begin a fresh run. Returns `None` while a run is already in progress.
    pub fn start(&mut self, now: InstantStamp) -> Option<StartPlan> {
        if self.is_running() {
            return None;
        }

        self.run_id += 1;
        self.log = TrialLog::default();
        self.current = None;
        self.metrics = CptMetrics::empty();
        self.interpretation = Interpretation::empty();
        self.started_at = Some(now);
        self.finished_at = None;
        self.state = EngineState::Armed { seq: 1 };

        Some(StartPlan {
            first: ScheduledOnset {
                run_id: self.run_id,
                seq: 1,
                wait_ms: self.config.lead_in_ms,
            },
            deadline_ms: self.config.session_budget_ms,
        })
    }

    /// Tear down the run and invalidate every outstanding timer.
    pub fn abort(&mut self) {
        self.run_id += 1;
        self.current = None;
        self.state = EngineState::Idle;
    }

    /// The onset timer fired: the previous trial's window closes and is
    /// flushed, then trial `seq` is presented — unless a session limit has
    /// been reached, in which case the run finalizes instead.
    pub fn mark_stimulus_on(&mut self, run_id: u64, seq: u32, now: InstantStamp) -> OnsetOutcome {
        if run_id != self.run_id || !self.expects_onset(seq) {
            return OnsetOutcome::Ignored;
        }

        self.flush_current();

        let elapsed = now - self.started_at.unwrap_or(now);
        let capped = self.config.trial_cap.map_or(false, |cap| seq > cap);
        let over_budget = self
            .config
            .session_budget_ms
            .map_or(false, |budget| elapsed >= budget as f64);
        if capped || over_budget {
            self.finish(now);
            return OnsetOutcome::Completed;
        }

        let phase = self.config.phase_for(seq, elapsed);
        let planned = self.source.next(&self.config, phase);
        self.current = Some(Trial {
            seq,
            symbol: planned.symbol,
            is_target: planned.is_target,
            phase,
            isi_ms: planned.isi_ms,
            onset_ms: Some(now),
            responded: false,
            rt_ms: None,
        });
        self.state = EngineState::StimulusVisible { seq };

        OnsetOutcome::Visible {
            visible_ms: self.config.stimulus_visible_ms,
        }
    }

    /// The visible-duration timer fired: hide the stimulus and schedule the
    /// next onset. The wait is the nominal ISI minus the time already spent
    /// since this onset, clamped at zero, so onsets stay spaced
    /// onset-to-onset regardless of scheduling jitter while visible.
    pub fn mark_stimulus_off(&mut self, run_id: u64, seq: u32, now: InstantStamp) -> OffOutcome {
        if run_id != self.run_id || self.state != (EngineState::StimulusVisible { seq }) {
            return OffOutcome::Ignored;
        }

        let (onset, isi_ms) = match self.current.as_ref() {
            Some(trial) => (trial.onset_ms.unwrap_or(now), trial.isi_ms),
            None => return OffOutcome::Ignored,
        };

        self.state = EngineState::WindowOpen { seq };
        let wait = (onset + isi_ms as f64 - now).max(0.0);

        OffOutcome::NextOnset(ScheduledOnset {
            run_id,
            seq: seq + 1,
            wait_ms: wait.round() as u64,
        })
    }

    /// A response event arrived. Accepted iff a trial's window is open, it
    /// has no response yet, and the latency does not exceed its ISI (a
    /// latency of exactly the ISI is accepted). Everything else is a silent
    /// no-op.
    pub fn register_response(&mut self, now: InstantStamp) -> ResponseOutcome {
        if !matches!(
            self.state,
            EngineState::StimulusVisible { .. } | EngineState::WindowOpen { .. }
        ) {
            return ResponseOutcome::Ignored;
        }
        let Some(trial) = self.current.as_mut() else {
            return ResponseOutcome::Ignored;
        };
        if trial.responded {
            return ResponseOutcome::Ignored;
        }
        let Some(onset) = trial.onset_ms else {
            return ResponseOutcome::Ignored;
        };

        let latency = now - onset;
        if latency < 0.0 || latency > trial.isi_ms as f64 {
            return ResponseOutcome::Ignored;
        }

        trial.responded = true;
        trial.rt_ms = Some(latency);
        ResponseOutcome::Accepted { rt_ms: latency }
    }

    /// The session countdown fired. Returns whether the run actually ended
    /// here (false for stale or already-finished runs).
    pub fn deadline(&mut self, run_id: u64, now: InstantStamp) -> bool {
        if run_id != self.run_id || !self.is_running() {
            return false;
        }
        self.finish(now);
        true
    }

    pub fn current_trial(&self) -> Option<&Trial> {
        self.current.as_ref()
    }

    pub fn started_at(&self) -> Option<InstantStamp> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<InstantStamp> {
        self.finished_at
    }

    pub fn trial_log(&self) -> &TrialLog {
        &self.log
    }

    pub fn metrics(&self) -> &CptMetrics {
        &self.metrics
    }

    pub fn interpretation(&self) -> &Interpretation {
        &self.interpretation
    }

    pub fn time_remaining_ms(&self, now: InstantStamp) -> Option<f64> {
        let budget = self.config.session_budget_ms? as f64;
        let started = self.started_at?;
        Some((budget - (now - started)).max(0.0))
    }

    pub fn view(&self, now: InstantStamp) -> SessionView {
        let trial_number = self
            .current
            .as_ref()
            .map(|t| t.seq)
            .unwrap_or(self.log.len() as u32);
        SessionView {
            running: self.is_running(),
            finished: self.is_finished(),
            trial_number,
            phase: self.current.as_ref().map(|t| t.phase).unwrap_or(0),
            stimulus: self.current.as_ref().map(|t| t.symbol.clone()),
            stimulus_visible: matches!(self.state, EngineState::StimulusVisible { .. }),
            time_remaining_ms: self.time_remaining_ms(now),
        }
    }

    /// Summary record for the hosting app; meaningful once finished.
    pub fn summary(&self, qc: QualityFlags) -> serde_json::Result<SummaryRecord> {
        Ok(SummaryRecord::new(
            self.config.task_id,
            serde_json::to_value(&self.metrics)?,
            serde_json::to_value(&self.interpretation)?,
            qc,
        ))
    }

    fn expects_onset(&self, seq: u32) -> bool {
        match self.state {
            EngineState::Armed { seq: armed } => armed == seq,
            EngineState::WindowOpen { seq: open } => open + 1 == seq,
            _ => false,
        }
    }

    fn flush_current(&mut self) {
        if let Some(trial) = self.current.take() {
            self.log.commit(trial);
            self.recompute();
        }
    }

    fn finish(&mut self, now: InstantStamp) {
        self.flush_current();
        self.recompute();
        self.finished_at = Some(now);
        self.state = EngineState::Finished;
    }

    fn recompute(&mut self) {
        let completed = self.log.completed();
        self.metrics = CptMetrics::from_trials(&completed, &self.config);
        self.interpretation = interpret(&self.metrics, &self.config.risk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProtocolConfig {
        let mut config = ProtocolConfig::letter();
        config.trial_cap = Some(4);
        config.session_budget_ms = None;
        config.lead_in_ms = 1_000;
        config
    }

    fn scripted(config: ProtocolConfig, targets: &[bool], isi_ms: u64) -> CptEngine {
        let plan = targets
            .iter()
            .map(|&is_target| PlannedStimulus {
                symbol: if is_target { "X" } else { "A" }.to_string(),
                is_target,
                isi_ms,
            })
            .collect();
        CptEngine::with_source(config, Box::new(ScriptedSource::new(plan)))
    }

    #[test]
    fn log_commit_upserts_by_sequence_number() {
        let mut log = TrialLog::default();
        let mut trial = Trial {
            seq: 1,
            symbol: "X".into(),
            is_target: true,
            phase: 0,
            isi_ms: 1_000,
            onset_ms: Some(0.0),
            responded: false,
            rt_ms: None,
        };
        log.commit(trial.clone());

        trial.responded = true;
        trial.rt_ms = Some(612.0);
        log.commit(trial.clone());

        assert_eq!(log.len(), 1);
        assert_eq!(log.trials()[0].rt_ms, Some(612.0));
    }

    #[test]
    fn committed_sequence_numbers_increase_strictly() {
        let mut engine = scripted(test_config(), &[true, false, true, false], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        let mut t = plan.first.wait_ms as f64;
        for seq in 1..=4 {
            assert_eq!(
                engine.mark_stimulus_on(run, seq, t),
                OnsetOutcome::Visible { visible_ms: 250 }
            );
            engine.mark_stimulus_off(run, seq, t + 250.0);
            t += 1_000.0;
        }
        assert_eq!(engine.mark_stimulus_on(run, 5, t), OnsetOutcome::Completed);

        let seqs: Vec<u32> = engine.trial_log().trials().iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(engine.is_finished());
    }

    #[test]
    fn response_at_exact_isi_is_accepted() {
        let mut engine = scripted(test_config(), &[true], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        engine.mark_stimulus_on(run, 1, 1_000.0);
        engine.mark_stimulus_off(run, 1, 1_250.0);
        assert_eq!(
            engine.register_response(2_000.0),
            ResponseOutcome::Accepted { rt_ms: 1_000.0 }
        );
    }

    #[test]
    fn response_after_window_is_dropped_and_scored_omission() {
        let mut engine = scripted(test_config(), &[true, false], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        engine.mark_stimulus_on(run, 1, 1_000.0);
        engine.mark_stimulus_off(run, 1, 1_250.0);
        // 1 ms past the window.
        assert_eq!(engine.register_response(2_001.0), ResponseOutcome::Ignored);

        engine.mark_stimulus_on(run, 2, 2_000.0);
        let metrics = engine.metrics();
        assert_eq!(metrics.omission_errors, 1);
        assert_eq!(metrics.commission_errors, 0);
    }

    #[test]
    fn second_response_for_a_trial_is_ignored() {
        let mut engine = scripted(test_config(), &[true], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        engine.mark_stimulus_on(run, 1, 1_000.0);
        assert_eq!(
            engine.register_response(1_400.0),
            ResponseOutcome::Accepted { rt_ms: 400.0 }
        );
        assert_eq!(engine.register_response(1_500.0), ResponseOutcome::Ignored);
        assert_eq!(engine.current_trial().unwrap().rt_ms, Some(400.0));
    }

    #[test]
    fn stale_run_id_events_are_noops() {
        let mut engine = scripted(test_config(), &[true], 1_000);
        let plan = engine.start(0.0).unwrap();
        let stale = plan.first.run_id;
        engine.abort();

        assert_eq!(engine.mark_stimulus_on(stale, 1, 1_000.0), OnsetOutcome::Ignored);
        assert_eq!(engine.mark_stimulus_off(stale, 1, 1_250.0), OffOutcome::Ignored);
        assert!(!engine.deadline(stale, 5_000.0));
        assert_eq!(engine.state, EngineState::Idle);
    }

    #[test]
    fn deadline_flushes_the_pending_trial() {
        let mut engine = scripted(test_config(), &[true, true], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        engine.mark_stimulus_on(run, 1, 1_000.0);
        engine.register_response(1_300.0);
        assert!(engine.deadline(run, 1_600.0));

        assert_eq!(engine.trial_log().len(), 1);
        let trial = &engine.trial_log().trials()[0];
        assert!(trial.responded);
        assert_eq!(engine.metrics().targets_responded, 1);
        assert!(engine.is_finished());
    }

    #[test]
    fn next_onset_wait_absorbs_visible_jitter() {
        let mut engine = scripted(test_config(), &[true], 1_000);
        let plan = engine.start(0.0).unwrap();
        let run = plan.first.run_id;

        engine.mark_stimulus_on(run, 1, 1_000.0);
        // Hide callback ran 37 ms late.
        let OffOutcome::NextOnset(next) = engine.mark_stimulus_off(run, 1, 1_287.0) else {
            panic!("expected a scheduled onset");
        };
        assert_eq!(next.wait_ms, 713);
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn start_while_running_is_refused() {
        let mut engine = scripted(test_config(), &[true], 1_000);
        assert!(engine.start(0.0).is_some());
        assert!(engine.start(5.0).is_none());
    }
}
