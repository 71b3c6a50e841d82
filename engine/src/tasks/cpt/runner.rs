//! Event-driven session runner.
//!
//! The hosting shell owns a [`CptSession`] and a channel of [`CptEvent`]s.
//! User input and timer callbacks all arrive as events on that one channel,
//! so every engine mutation happens on a single logical thread, in arrival
//! order. Timers are spawned here ([`queue_onset`], [`queue_off`],
//! [`queue_deadline`]) and tagged with the engine's run id; anything that
//! fires after its run was torn down is dropped.

use futures_channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;

use crate::core::platform;
use crate::core::qc::QualityFlags;
use crate::core::summary::SummaryRecord;
use crate::core::timing::{self, InstantStamp};

use super::engine::{CptEngine, OffOutcome, OnsetOutcome, ScheduledOnset};
use super::protocol::ProtocolConfig;

#[derive(Debug, Clone)]
pub enum CptEvent {
    Start,
    Abort,
    /// User pressed/tapped; the timestamp is captured at the input handler.
    Respond { timestamp: InstantStamp },
    StimulusOn { run_id: u64, seq: u32 },
    StimulusOff { run_id: u64, seq: u32 },
    Deadline { run_id: u64 },
    FocusLost,
}

pub struct CptSession {
    pub engine: CptEngine,
    pub qc: QualityFlags,
    /// Set once a run finishes; the shell takes it for display or export.
    pub last_summary: Option<SummaryRecord>,
    pub last_error: Option<String>,
    tx: UnboundedSender<CptEvent>,
}

impl CptSession {
    /// Build a session plus the receiver the shell's event loop drains.
    pub fn new(config: ProtocolConfig) -> (Self, UnboundedReceiver<CptEvent>) {
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                engine: CptEngine::new(config),
                qc: QualityFlags::pristine(),
                last_summary: None,
                last_error: None,
                tx,
            },
            rx,
        )
    }

    /// Sender for input handlers (respond/abort buttons, key handlers).
    pub fn sender(&self) -> UnboundedSender<CptEvent> {
        self.tx.clone()
    }

    pub fn handle_event(&mut self, event: CptEvent) {
        match event {
            CptEvent::Start => {
                self.last_summary = None;
                self.last_error = None;
                self.qc = QualityFlags::pristine();

                if let Some(plan) = self.engine.start(timing::now()) {
                    queue_onset(&self.tx, plan.first);
                    if let Some(deadline_ms) = plan.deadline_ms {
                        queue_deadline(&self.tx, plan.first.run_id, deadline_ms);
                    }
                }
            }
            CptEvent::Abort => {
                self.engine.abort();
            }
            CptEvent::Respond { timestamp } => {
                // Out-of-window and duplicate responses drop silently.
                let _ = self.engine.register_response(timestamp);
            }
            CptEvent::StimulusOn { run_id, seq } => {
                match self.engine.mark_stimulus_on(run_id, seq, timing::now()) {
                    OnsetOutcome::Visible { visible_ms } => {
                        queue_off(&self.tx, run_id, seq, visible_ms);
                    }
                    OnsetOutcome::Completed => self.finalize(),
                    OnsetOutcome::Ignored => self.note_stale(),
                }
            }
            CptEvent::StimulusOff { run_id, seq } => {
                match self.engine.mark_stimulus_off(run_id, seq, timing::now()) {
                    OffOutcome::NextOnset(schedule) => queue_onset(&self.tx, schedule),
                    OffOutcome::Ignored => self.note_stale(),
                }
            }
            CptEvent::Deadline { run_id } => {
                if self.engine.deadline(run_id, timing::now()) {
                    self.finalize();
                } else {
                    self.note_stale();
                }
            }
            CptEvent::FocusLost => {
                self.qc.log_focus_loss();
                self.qc.log_visibility_blur();
            }
        }
    }

    fn finalize(&mut self) {
        self.qc
            .mark_min_trials(self.engine.metrics().meets_min_trial_requirement);

        match self.engine.summary(self.qc.clone()) {
            Ok(record) => {
                self.last_summary = Some(record);
                self.last_error = None;
            }
            Err(err) => {
                self.last_error = Some(format!("Failed to serialise summary: {err}"));
            }
        }
    }

    /// A timer outlived its run. Expected after finish/abort; anomalous (and
    /// QC-flagged) while a run is live.
    fn note_stale(&mut self) {
        if self.engine.is_running() {
            self.qc.log_stale_timer();
        }
    }
}

/// Drain the event channel until it closes, invoking `on_update` after every
/// processed event so the shell can re-render from the session's state.
pub async fn drive(
    mut session: CptSession,
    mut rx: UnboundedReceiver<CptEvent>,
    mut on_update: impl FnMut(&CptSession),
) -> CptSession {
    while let Some(event) = rx.next().await {
        session.handle_event(event);
        on_update(&session);
    }
    session
}

fn queue_onset(sender: &UnboundedSender<CptEvent>, schedule: ScheduledOnset) {
    let sender = sender.clone();
    platform::spawn_future(async move {
        timing::sleep_ms(schedule.wait_ms).await;
        let _ = sender.unbounded_send(CptEvent::StimulusOn {
            run_id: schedule.run_id,
            seq: schedule.seq,
        });
    });
}

fn queue_off(sender: &UnboundedSender<CptEvent>, run_id: u64, seq: u32, visible_ms: u64) {
    let sender = sender.clone();
    platform::spawn_future(async move {
        timing::sleep_ms(visible_ms).await;
        let _ = sender.unbounded_send(CptEvent::StimulusOff { run_id, seq });
    });
}

fn queue_deadline(sender: &UnboundedSender<CptEvent>, run_id: u64, deadline_ms: u64) {
    let sender = sender.clone();
    platform::spawn_future(async move {
        timing::sleep_ms(deadline_ms).await;
        let _ = sender.unbounded_send(CptEvent::Deadline { run_id });
    });
}
