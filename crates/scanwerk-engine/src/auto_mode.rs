// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Auto-mode sequencer: barcode first, text recognition as fallback.
//
// Owns the warning, hard-timeout and switch-delay timers of one automatic
// session and the quality window that can cut the barcode phase short.
// Transitions only move forward; `Success` is terminal. Every switch is
// published on a watch channel so the coordinator can react without polling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use scanwerk_core::config::TimingBudget;
use scanwerk_core::events::{EventSink, ScanEvent};
use scanwerk_core::types::{AutoModeState, FallbackReason, QualityInput, ReaderKind};

use crate::quality::{QualityAssessment, QualitySettings, QualityWindow};
use crate::timers::{TimerHandle, TimerRegistry};

/// Decides whether a switch the sequencer starts on its own may go ahead.
///
/// Consulted for quality and hard-timeout switches; a declined switch leaves
/// the state machine untouched.
pub type SwitchGate = Arc<dyn Fn(FallbackReason) -> bool + Send + Sync>;

struct SequencerState {
    state: AutoModeState,
    started_at: Option<Instant>,
    timers: Vec<TimerHandle>,
    switch_reason: Option<FallbackReason>,
    warning_threshold: Duration,
    switch_delay: Duration,
    window: QualityWindow,
    gate: Option<SwitchGate>,
    active: bool,
    /// Bumped on every start/cancel so late timers from an older run are ignored.
    generation: u64,
}

struct Shared {
    state: Mutex<SequencerState>,
    registry: TimerRegistry,
    sink: Arc<dyn EventSink>,
    switch_tx: watch::Sender<Option<FallbackReason>>,
}

/// Drives the automatic strategy's state machine.
#[derive(Clone)]
pub struct AutoModeSequencer {
    shared: Arc<Shared>,
}

impl AutoModeSequencer {
    pub fn new(registry: TimerRegistry, sink: Arc<dyn EventSink>, quality: QualitySettings) -> Self {
        let (switch_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SequencerState {
                    state: AutoModeState::InitialStructured,
                    started_at: None,
                    timers: Vec::new(),
                    switch_reason: None,
                    warning_threshold: Duration::ZERO,
                    switch_delay: Duration::ZERO,
                    window: QualityWindow::new(quality),
                    gate: None,
                    active: false,
                    generation: 0,
                }),
                registry,
                sink,
                switch_tx,
            }),
        }
    }

    /// Begin a new automatic session and arm the warning and hard-timeout timers.
    pub fn start(&self, budget: &TimingBudget) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut st = shared.lock();
            shared.disarm(&mut st);
            st.generation += 1;
            st.active = true;
            st.started_at = Some(Instant::now());
            st.switch_reason = None;
            st.warning_threshold = budget.warning_threshold();
            st.switch_delay = budget.switch_delay;
            st.window.clear();
            shared.switch_tx.send_replace(None);

            let old = std::mem::replace(&mut st.state, AutoModeState::InitialStructured);
            if old != AutoModeState::InitialStructured {
                events.push(ScanEvent::AutoModeStateChanged {
                    old_state: old,
                    new_state: AutoModeState::InitialStructured,
                });
            }

            let warning = st.warning_threshold;
            shared.arm(&mut st, warning, Shared::on_warning);
            shared.arm(&mut st, budget.structured_timeout, Shared::on_hard_timeout);
            debug!(
                warning_ms = warning.as_millis() as u64,
                timeout_ms = budget.structured_timeout.as_millis() as u64,
                "auto mode started"
            );
        }
        shared.emit_all(events);
    }

    /// Feed one quality reading into the window.
    ///
    /// A recommended switch is honoured only while still in
    /// `InitialStructured`, and only once per session. Returns `None` when no
    /// session is running.
    pub fn process_quality_metrics(&self, input: QualityInput) -> Option<QualityAssessment> {
        let shared = &self.shared;
        let mut events = Vec::new();
        let assessment = {
            let mut st = shared.lock();
            if !st.active {
                return None;
            }
            let assessment = st.window.observe(input);
            events.push(ScanEvent::QualityAssessed {
                score: assessment.score,
                average: assessment.average,
                trend: assessment.trend,
                should_switch: assessment.should_switch,
            });
            if assessment.should_switch
                && st.state == AutoModeState::InitialStructured
                && st.switch_reason.is_none()
            {
                if permits(&st, FallbackReason::Quality) {
                    info!(
                        average = assessment.average,
                        "sustained poor quality; switching to text recognition"
                    );
                    shared.begin_switch(&mut st, FallbackReason::Quality, &mut events);
                } else {
                    debug!(
                        average = assessment.average,
                        "poor quality but fallback not affordable; staying on barcode"
                    );
                }
            }
            assessment
        };
        shared.emit_all(events);
        Some(assessment)
    }

    /// Install the gate for the next session. Cleared by [`cancel`](Self::cancel).
    pub fn set_switch_gate(&self, gate: SwitchGate) {
        self.shared.lock().gate = Some(gate);
    }

    /// Start a switch on behalf of the coordinator. The gate is not consulted.
    ///
    /// Returns `true` only if this call initiated the switch.
    pub fn request_switch(&self, reason: FallbackReason) -> bool {
        let shared = &self.shared;
        let mut events = Vec::new();
        let started = {
            let mut st = shared.lock();
            let eligible = st.active
                && matches!(
                    st.state,
                    AutoModeState::InitialStructured | AutoModeState::StructuredTimeoutWarning
                );
            if eligible {
                shared.begin_switch(&mut st, reason, &mut events);
            }
            eligible
        };
        shared.emit_all(events);
        started
    }

    /// Terminal: cancel every pending timer and enter `Success`.
    pub fn mark_success(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut st = shared.lock();
            if !st.active {
                return;
            }
            shared.disarm(&mut st);
            advance(&mut st, AutoModeState::Success, &mut events);
        }
        shared.emit_all(events);
    }

    /// Stop the session silently: cancel timers and forget quality history.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let mut st = self.shared.lock();
        self.shared.disarm(&mut st);
        st.generation += 1;
        st.active = false;
        st.started_at = None;
        st.switch_reason = None;
        st.state = AutoModeState::InitialStructured;
        st.gate = None;
        st.window.clear();
    }

    /// Teardown at the end of an engine's life. Same guarantees as [`cancel`](Self::cancel).
    pub fn destroy(&self) {
        self.cancel();
    }

    pub fn state(&self) -> AutoModeState {
        self.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// Time since `start`, if a session is running.
    pub fn elapsed(&self) -> Option<Duration> {
        self.shared.lock().started_at.map(|t| t.elapsed())
    }

    pub fn switch_reason(&self) -> Option<FallbackReason> {
        self.shared.lock().switch_reason
    }

    /// Watch the reason of the current session's switch; `None` until one starts.
    pub fn subscribe(&self) -> watch::Receiver<Option<FallbackReason>> {
        self.shared.switch_tx.subscribe()
    }

    pub fn set_quality_settings(&self, settings: QualitySettings) {
        self.shared.lock().window.set_settings(settings);
    }

    pub fn quality_samples(&self) -> usize {
        self.shared.lock().window.len()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_all(&self, events: Vec<ScanEvent>) {
        for event in events {
            self.sink.emit(event);
        }
    }

    fn arm(
        self: &Arc<Self>,
        st: &mut SequencerState,
        delay: Duration,
        on_fire: fn(&Arc<Shared>, u64),
    ) {
        let weak = Arc::downgrade(self);
        let generation = st.generation;
        let handle = self.registry.schedule(delay, move || {
            if let Some(shared) = weak.upgrade() {
                on_fire(&shared, generation);
            }
        });
        st.timers.push(handle);
    }

    fn disarm(&self, st: &mut SequencerState) {
        for handle in st.timers.drain(..) {
            self.registry.cancel(handle);
        }
    }

    fn current<'a>(&'a self, generation: u64) -> Option<MutexGuard<'a, SequencerState>> {
        let st = self.lock();
        (st.active && st.generation == generation).then_some(st)
    }

    fn on_warning(self: &Arc<Self>, generation: u64) {
        let mut events = Vec::new();
        {
            let Some(mut st) = self.current(generation) else {
                return;
            };
            if st.state != AutoModeState::InitialStructured {
                return;
            }
            advance(&mut st, AutoModeState::StructuredTimeoutWarning, &mut events);
            let elapsed_ms = st
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or_default();
            debug!(elapsed_ms, "barcode phase past warning threshold");
            events.push(ScanEvent::WarningThreshold {
                elapsed_ms,
                threshold_ms: st.warning_threshold.as_millis() as u64,
            });
        }
        self.emit_all(events);
    }

    fn on_hard_timeout(self: &Arc<Self>, generation: u64) {
        let mut events = Vec::new();
        {
            let Some(mut st) = self.current(generation) else {
                return;
            };
            if !matches!(
                st.state,
                AutoModeState::InitialStructured | AutoModeState::StructuredTimeoutWarning
            ) {
                return;
            }
            if !permits(&st, FallbackReason::Timeout) {
                info!("barcode phase timed out but fallback not affordable; staying on barcode");
                return;
            }
            info!("barcode phase timed out; switching to text recognition");
            self.begin_switch(&mut st, FallbackReason::Timeout, &mut events);
        }
        self.emit_all(events);
    }

    fn on_switch_delay(self: &Arc<Self>, generation: u64) {
        let mut events = Vec::new();
        {
            let Some(mut st) = self.current(generation) else {
                return;
            };
            if st.state != AutoModeState::SwitchingToText {
                return;
            }
            advance(&mut st, AutoModeState::TextActive, &mut events);
            if let Some(reason) = st.switch_reason {
                events.push(ScanEvent::ModeRecommendation {
                    mode: ReaderKind::Text,
                    reason,
                });
            }
        }
        self.emit_all(events);
    }

    fn begin_switch(
        self: &Arc<Self>,
        st: &mut SequencerState,
        reason: FallbackReason,
        events: &mut Vec<ScanEvent>,
    ) {
        if !advance(st, AutoModeState::SwitchingToText, events) {
            return;
        }
        self.disarm(st);
        st.switch_reason = Some(reason);
        self.switch_tx.send_replace(Some(reason));
        let delay = st.switch_delay;
        self.arm(st, delay, Shared::on_switch_delay);
    }
}

fn permits(st: &SequencerState, reason: FallbackReason) -> bool {
    st.gate.as_ref().is_none_or(|gate| gate(reason))
}

fn advance(st: &mut SequencerState, next: AutoModeState, events: &mut Vec<ScanEvent>) -> bool {
    if !st.state.can_advance_to(next) {
        return false;
    }
    let old = std::mem::replace(&mut st.state, next);
    debug!(?old, new = ?next, "auto mode transition");
    events.push(ScanEvent::AutoModeStateChanged {
        old_state: old,
        new_state: next,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use scanwerk_core::types::DetailedQuality;

    fn sequencer() -> (AutoModeSequencer, Arc<RecordingSink>, TimerRegistry) {
        let registry = TimerRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let seq = AutoModeSequencer::new(registry.clone(), sink.clone(), QualitySettings::default());
        (seq, sink, registry)
    }

    fn poor() -> QualityInput {
        QualityInput::Detailed(DetailedQuality {
            blur: Some(0.9),
            alignment: Some(0.1),
            ..Default::default()
        })
    }

    fn transitions(sink: &RecordingSink) -> Vec<(AutoModeState, AutoModeState)> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::AutoModeStateChanged {
                    old_state,
                    new_state,
                } => Some((old_state, new_state)),
                _ => None,
            })
            .collect()
    }

    async fn advance_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_path_warns_then_switches() {
        use AutoModeState::*;
        let (seq, sink, _) = sequencer();
        let mut switch_rx = seq.subscribe();
        seq.start(&TimingBudget::default());
        assert_eq!(seq.state(), InitialStructured);

        advance_ms(2101).await;
        assert_eq!(seq.state(), StructuredTimeoutWarning);
        assert!(sink.events().contains(&ScanEvent::WarningThreshold {
            elapsed_ms: 2100,
            threshold_ms: 2100,
        }));

        advance_ms(900).await;
        assert_eq!(seq.state(), SwitchingToText);
        assert!(switch_rx.has_changed().unwrap());
        assert_eq!(*switch_rx.borrow_and_update(), Some(FallbackReason::Timeout));

        advance_ms(500).await;
        assert_eq!(seq.state(), TextActive);
        assert_eq!(
            transitions(&sink),
            vec![
                (InitialStructured, StructuredTimeoutWarning),
                (StructuredTimeoutWarning, SwitchingToText),
                (SwitchingToText, TextActive),
            ]
        );
        assert_eq!(
            sink.events().last(),
            Some(&ScanEvent::ModeRecommendation {
                mode: ReaderKind::Text,
                reason: FallbackReason::Timeout,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quality_switch_is_honoured_once() {
        let (seq, sink, _) = sequencer();
        seq.start(&TimingBudget::default());

        seq.process_quality_metrics(poor());
        seq.process_quality_metrics(poor());
        assert_eq!(seq.state(), AutoModeState::InitialStructured);

        let third = seq.process_quality_metrics(poor()).unwrap();
        assert!(third.should_switch);
        assert_eq!(seq.state(), AutoModeState::SwitchingToText);
        assert_eq!(seq.switch_reason(), Some(FallbackReason::Quality));

        // Still reported, never re-triggered.
        let fourth = seq.process_quality_metrics(poor()).unwrap();
        assert!(fourth.should_switch);
        let switches = transitions(&sink)
            .iter()
            .filter(|(_, new)| *new == AutoModeState::SwitchingToText)
            .count();
        assert_eq!(switches, 1);
        let assessed = sink
            .names()
            .into_iter()
            .filter(|n| *n == "quality_assessed")
            .count();
        assert_eq!(assessed, 4);

        // The hard timeout no longer applies once switching.
        advance_ms(5000).await;
        assert_eq!(seq.state(), AutoModeState::TextActive);
        assert_eq!(seq.switch_reason(), Some(FallbackReason::Quality));
    }

    #[tokio::test(start_paused = true)]
    async fn quality_after_warning_does_not_switch() {
        let (seq, _, _) = sequencer();
        seq.start(&TimingBudget::default());
        advance_ms(2200).await;
        for _ in 0..5 {
            seq.process_quality_metrics(poor());
        }
        assert_eq!(seq.state(), AutoModeState::StructuredTimeoutWarning);
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_terminal() {
        let (seq, sink, registry) = sequencer();
        seq.start(&TimingBudget::default());
        advance_ms(100).await;
        seq.mark_success();
        assert_eq!(seq.state(), AutoModeState::Success);
        assert_eq!(registry.active_count(), 0);

        let before = sink.len();
        advance_ms(10_000).await;
        assert_eq!(sink.len(), before);
        assert!(!seq.request_switch(FallbackReason::Failure));
        assert_eq!(seq.state(), AutoModeState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent_and_silent() {
        let (seq, sink, registry) = sequencer();
        seq.start(&TimingBudget::default());
        seq.process_quality_metrics(poor());
        advance_ms(50).await;

        seq.destroy();
        seq.destroy();
        seq.cancel();
        assert_eq!(registry.active_count(), 0);
        assert_eq!(seq.quality_samples(), 0);

        let before = sink.len();
        advance_ms(10_000).await;
        assert!(seq.process_quality_metrics(poor()).is_none());
        assert_eq!(sink.len(), before);
        assert_eq!(seq.elapsed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn request_switch_uses_given_reason() {
        let (seq, sink, _) = sequencer();
        seq.start(&TimingBudget::default());
        assert!(seq.request_switch(FallbackReason::Failure));
        assert!(!seq.request_switch(FallbackReason::Failure));
        advance_ms(501).await;
        assert_eq!(seq.state(), AutoModeState::TextActive);
        assert!(sink.events().contains(&ScanEvent::ModeRecommendation {
            mode: ReaderKind::Text,
            reason: FallbackReason::Failure,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn declined_switches_leave_state_alone() {
        let (seq, sink, _) = sequencer();
        let asked = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&asked);
        seq.set_switch_gate(Arc::new(move |reason: FallbackReason| {
            log.lock().unwrap().push(reason);
            false
        }));
        seq.start(&TimingBudget::default());

        for _ in 0..4 {
            seq.process_quality_metrics(poor());
        }
        assert_eq!(seq.state(), AutoModeState::InitialStructured);
        assert_eq!(seq.switch_reason(), None);

        advance_ms(4000).await;
        assert_eq!(seq.state(), AutoModeState::StructuredTimeoutWarning);
        assert!(!sink.names().contains(&"mode_recommendation"));
        let asked = asked.lock().unwrap().clone();
        assert_eq!(asked.first(), Some(&FallbackReason::Quality));
        assert_eq!(asked.last(), Some(&FallbackReason::Timeout));

        // The coordinator can still force a switch.
        assert!(seq.request_switch(FallbackReason::Failure));
        assert_eq!(seq.state(), AutoModeState::SwitchingToText);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_the_gate() {
        let (seq, _, _) = sequencer();
        seq.set_switch_gate(Arc::new(|_: FallbackReason| false));
        seq.cancel();
        seq.start(&TimingBudget::default());
        for _ in 0..3 {
            seq.process_quality_metrics(poor());
        }
        assert_eq!(seq.state(), AutoModeState::SwitchingToText);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_previous_history() {
        let (seq, _, _) = sequencer();
        seq.start(&TimingBudget::default());
        seq.process_quality_metrics(poor());
        seq.process_quality_metrics(poor());
        seq.start(&TimingBudget::default());
        assert_eq!(seq.quality_samples(), 0);

        // Two more bad frames are not enough on their own after a restart.
        seq.process_quality_metrics(poor());
        seq.process_quality_metrics(poor());
        assert_eq!(seq.state(), AutoModeState::InitialStructured);
    }
}
