// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session coordinator: the top-level scan state machine.
//
// Idle -> StructuredActive | TextActive -> (Transitioning -> TextActive) ->
// Completed | Failed. One session is live per engine; starting another
// cancels the first. Every mutation and notification is gated on the
// session's own cancellation token, so a superseded or cancelled call can
// never touch its successor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use scanwerk_bridge::traits::{QualitySource, StructuredReader, TextReader};
use scanwerk_core::config::{EngineConfig, MAX_ATTEMPTS_PER_RETRY, MIN_FALLBACK_HEADROOM, TimingBudget};
use scanwerk_core::error::{ErrorKind, FailureKind, Result, ScanError};
use scanwerk_core::events::{EventSink, ScanEvent};
use scanwerk_core::types::{
    FallbackReason, LicenseData, QualityInput, ReaderKind, ScanInput, ScanState, ScanStrategy,
    SessionId, TextObservation,
};

use crate::auto_mode::{AutoModeSequencer, SwitchGate};
use crate::events::TracingSink;
use crate::quality::{QualityAssessment, QualitySettings};
use crate::retry::{RetryConfig, RetryManager};
use crate::telemetry::{
    Checkpoint, PerformanceMonitor, PerformanceSummary, PerformanceTargets, ResourceProbe,
    SysinfoProbe,
};
use crate::timers::TimerRegistry;

// ---------------------------------------------------------------------------
// Fallback eligibility
// ---------------------------------------------------------------------------

/// Everything the fallback rule looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackContext {
    pub strategy: ScanStrategy,
    pub elapsed: Duration,
    pub structured_timeout: Duration,
    pub total_budget: Duration,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_kind: ErrorKind,
}

/// Whether a failed barcode phase may hand over to text recognition.
///
/// Requires the automatic strategy and at least [`MIN_FALLBACK_HEADROOM`]
/// left in the session budget, plus one of: the barcode budget is spent, the
/// attempt limit is reached, or the failure kind is fallback-eligible.
pub fn should_trigger_fallback(ctx: &FallbackContext) -> bool {
    if ctx.strategy != ScanStrategy::Automatic {
        return false;
    }
    let remaining = ctx.total_budget.saturating_sub(ctx.elapsed);
    if remaining < MIN_FALLBACK_HEADROOM {
        return false;
    }
    ctx.elapsed >= ctx.structured_timeout
        || ctx.attempts >= ctx.max_attempts
        || matches!(ctx.error_kind, ErrorKind::Operation(kind) if kind.is_fallback_eligible())
}

// ---------------------------------------------------------------------------
// Session snapshot
// ---------------------------------------------------------------------------

/// Immutable view of the current session; replaced wholesale on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub requested: Option<ScanStrategy>,
    pub state: ScanState,
    pub active: Option<ReaderKind>,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    pub fallback: Option<FallbackReason>,
}

impl Session {
    fn idle() -> Self {
        Self {
            id: SessionId::new(),
            requested: None,
            state: ScanState::Idle,
            active: None,
            started_at: Utc::now(),
            attempts: 0,
            fallback: None,
        }
    }

    fn begin(strategy: ScanStrategy) -> Self {
        Self {
            requested: Some(strategy),
            ..Self::idle()
        }
    }

    fn advance(&self, state: ScanState, active: Option<ReaderKind>) -> Self {
        Self {
            state,
            active,
            ..self.clone()
        }
    }

    fn with_attempts(&self, attempts: u32) -> Self {
        Self {
            attempts,
            ..self.clone()
        }
    }

    fn with_fallback(&self, reason: FallbackReason) -> Self {
        Self {
            fallback: Some(reason),
            ..self.clone()
        }
    }
}

/// Result of a successful scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub data: LicenseData,
    pub final_strategy: ReaderKind,
    pub fallback: Option<FallbackReason>,
    pub total_time: Duration,
    /// Barcode attempts made during the session.
    pub attempts: u32,
}

impl ScanOutcome {
    pub fn fallback_triggered(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.data.confidence()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`ScanEngine`] from its collaborators.
#[derive(Default)]
pub struct EngineBuilder {
    structured: Option<Arc<dyn StructuredReader>>,
    text: Option<Arc<dyn TextReader>>,
    sink: Option<Arc<dyn EventSink>>,
    quality: Option<Arc<dyn QualitySource>>,
    probe: Option<Box<dyn ResourceProbe>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn structured_reader(mut self, reader: Arc<dyn StructuredReader>) -> Self {
        self.structured = Some(reader);
        self
    }

    pub fn text_reader(mut self, reader: Arc<dyn TextReader>) -> Self {
        self.text = Some(reader);
        self
    }

    /// Where notifications go. Defaults to [`TracingSink`].
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Frame-quality feed consulted during automatic sessions.
    pub fn quality_source(mut self, source: Arc<dyn QualitySource>) -> Self {
        self.quality = Some(source);
        self
    }

    /// Resource sampler for telemetry. Defaults to [`SysinfoProbe`].
    pub fn resource_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ScanEngine> {
        self.config.validate()?;
        warn_if_no_timeout_fallback(&self.config);
        let structured = self
            .structured
            .ok_or_else(|| ScanError::Config("a barcode reader is required".into()))?;
        let text = self
            .text
            .ok_or_else(|| ScanError::Config("a text reader is required".into()))?;
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let probe = self.probe.unwrap_or_else(|| Box::new(SysinfoProbe::new()));

        let registry = TimerRegistry::new();
        let sequencer = AutoModeSequencer::new(
            registry.clone(),
            Arc::clone(&sink),
            QualitySettings::from(&self.config),
        );
        let targets = PerformanceTargets::from(&self.config.timing_budget());

        Ok(ScanEngine {
            shared: Arc::new(EngineShared {
                structured,
                text,
                quality: self.quality,
                sink,
                registry,
                sequencer,
                monitor: Mutex::new(PerformanceMonitor::new(targets, probe)),
                inner: Mutex::new(EngineState {
                    config: self.config,
                    session: Session::idle(),
                }),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineState {
    config: EngineConfig,
    session: Session,
}

struct EngineShared {
    structured: Arc<dyn StructuredReader>,
    text: Arc<dyn TextReader>,
    quality: Option<Arc<dyn QualitySource>>,
    sink: Arc<dyn EventSink>,
    registry: TimerRegistry,
    sequencer: AutoModeSequencer,
    monitor: Mutex<PerformanceMonitor>,
    inner: Mutex<EngineState>,
}

/// Orchestrates barcode and text readers under the configured budgets.
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct ScanEngine {
    shared: Arc<EngineShared>,
}

impl ScanEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Run one scan session to completion.
    ///
    /// A session already in flight is cancelled first and its caller receives
    /// `ScanError::Cancelled`.
    #[instrument(skip(self, input))]
    pub async fn scan(&self, input: ScanInput, strategy: ScanStrategy) -> Result<ScanOutcome> {
        let plan = Plan::for_input(&input, strategy)?;
        let run = self.shared.begin(strategy);
        match plan {
            Plan::Structured(payload) => run.structured_only(payload).await,
            Plan::Text(observations) => run.text_only(observations).await,
            Plan::Automatic {
                payload,
                observations,
            } => run.automatic(payload, observations).await,
        }
    }

    /// Abort the live session, if any. Emits nothing; idempotent.
    pub fn cancel(&self) {
        let shared = &self.shared;
        let timers = shared.registry.cancel_all();
        shared.sequencer.cancel();
        shared.monitor().abandon_session();

        let mut inner = shared.lock();
        if inner.session.state.is_live() {
            info!(session = %inner.session.id, timers, "session cancelled");
        }
        inner.session = inner.session.advance(ScanState::Idle, None);
    }

    /// Tear the engine down: cancel everything and release sequencer state.
    pub fn shutdown(&self) {
        self.cancel();
        self.shared.sequencer.destroy();
    }

    /// Feed a quality reading from outside the configured quality source.
    ///
    /// Ignored unless an automatic session is live.
    pub fn process_quality(&self, input: QualityInput) -> Option<QualityAssessment> {
        let accepting = {
            let inner = self.shared.lock();
            inner.session.requested == Some(ScanStrategy::Automatic)
                && inner.session.state.is_live()
        };
        if !accepting {
            debug!("no automatic session; quality reading ignored");
            return None;
        }
        self.shared.sequencer.process_quality_metrics(input)
    }

    /// Swap the configuration. Rejected while a session is live.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        warn_if_no_timeout_fallback(&config);
        {
            let mut inner = self.shared.lock();
            if inner.session.state.is_live() {
                return Err(ScanError::Config(
                    "configuration cannot change during a session".into(),
                ));
            }
            inner.config = config.clone();
        }
        self.shared
            .sequencer
            .set_quality_settings(QualitySettings::from(&config));
        self.shared
            .monitor()
            .set_targets(PerformanceTargets::from(&config.timing_budget()));
        info!("engine configuration updated");
        Ok(())
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.lock().config.clone()
    }

    pub fn session(&self) -> Session {
        self.shared.lock().session.clone()
    }

    pub fn performance_summary(&self) -> Option<PerformanceSummary> {
        self.shared.monitor().summary()
    }

    /// Timers currently armed on behalf of the live session.
    pub fn pending_timers(&self) -> usize {
        self.shared.registry.active_count()
    }
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn monitor(&self) -> MutexGuard<'_, PerformanceMonitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel whatever came before and open a fresh session.
    fn begin(self: &Arc<Self>, strategy: ScanStrategy) -> Run<'_> {
        let previous = {
            let inner = self.lock();
            inner.session.state.is_live().then_some(inner.session.id)
        };
        if let Some(previous) = previous {
            info!(%previous, "superseding live session");
        }
        self.registry.cancel_all();
        self.sequencer.cancel();
        let token = self.registry.rearm();

        let (config, session_id) = {
            let mut inner = self.lock();
            inner.session = Session::begin(strategy);
            (inner.config.clone(), inner.session.id)
        };
        self.monitor().start_session(strategy);
        info!(session = %session_id, ?strategy, "scan started");

        let budget = config.timing_budget();
        let started = Instant::now();
        Run {
            engine: self,
            switch_gate: switch_gate(Arc::downgrade(self), token.clone(), strategy, budget, started),
            token,
            session_id,
            strategy,
            budget,
            retry: RetryManager::new(self.registry.clone(), RetryConfig::from(&config)),
            started,
        }
    }
}

/// Let the sequencer start its own switch only when the fallback rule
/// would accept it at that moment.
fn switch_gate(
    engine: Weak<EngineShared>,
    token: CancellationToken,
    strategy: ScanStrategy,
    budget: TimingBudget,
    started: Instant,
) -> SwitchGate {
    Arc::new(move |reason: FallbackReason| {
        let Some(engine) = engine.upgrade() else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        let attempts = engine.lock().session.attempts;
        should_trigger_fallback(&FallbackContext {
            strategy,
            elapsed: started.elapsed(),
            structured_timeout: budget.structured_timeout,
            total_budget: budget.max_total_time,
            attempts,
            max_attempts: budget.max_structured_attempts,
            error_kind: switch_error(reason, &budget).kind(),
        })
    })
}

/// How a validated input will be processed.
enum Plan<'i> {
    Structured(&'i str),
    Text(&'i [TextObservation]),
    Automatic {
        payload: &'i str,
        observations: &'i [TextObservation],
    },
}

impl<'i> Plan<'i> {
    fn for_input(input: &'i ScanInput, strategy: ScanStrategy) -> Result<Self> {
        let payload = input.payload.as_deref();
        let observations = input.observations.as_slice();
        match (strategy, payload) {
            (ScanStrategy::Structured, Some(payload)) => Ok(Self::Structured(payload)),
            (ScanStrategy::Structured, None) => Err(ScanError::InvalidInput(
                "barcode strategy needs a payload".into(),
            )),
            (ScanStrategy::Text, _) if input.has_observations() => Ok(Self::Text(observations)),
            (ScanStrategy::Text, _) => Err(ScanError::InvalidInput(
                "text strategy needs text observations".into(),
            )),
            (ScanStrategy::Automatic, Some(payload)) => Ok(Self::Automatic {
                payload,
                observations,
            }),
            (ScanStrategy::Automatic, None) if input.has_observations() => {
                Ok(Self::Text(observations))
            }
            (ScanStrategy::Automatic, None) => Err(ScanError::InvalidInput(
                "automatic strategy needs a payload or text observations".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// One session in flight
// ---------------------------------------------------------------------------

struct Run<'a> {
    engine: &'a EngineShared,
    switch_gate: SwitchGate,
    token: CancellationToken,
    session_id: SessionId,
    strategy: ScanStrategy,
    budget: TimingBudget,
    retry: RetryManager,
    started: Instant,
}

impl<'a> Run<'a> {
    fn ensure_live(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn attempts(&self) -> u32 {
        self.engine.lock().session.attempts
    }

    fn emit(&self, event: ScanEvent) -> Result<()> {
        self.ensure_live()?;
        self.engine.sink.emit(event);
        Ok(())
    }

    fn checkpoint(&self, checkpoint: Checkpoint) {
        if !self.token.is_cancelled() {
            self.engine.monitor().checkpoint(checkpoint);
        }
    }

    /// Replace the session with its next state and report the change.
    fn transition(
        &self,
        state: ScanState,
        active: Option<ReaderKind>,
        message: impl Into<String>,
    ) -> Result<()> {
        let event = {
            let mut inner = self.engine.lock();
            self.ensure_live()?;
            inner.session = inner.session.advance(state, active);
            let session = &inner.session;
            ScanEvent::Progress {
                session_id: session.id,
                state,
                strategy: active,
                started_at: session.started_at,
                attempt_count: session.attempts,
                elapsed_ms: ms(self.elapsed()),
                message: message.into(),
            }
        };
        debug!(session = %self.session_id, ?state, "session transition");
        self.engine.sink.emit(event);
        Ok(())
    }

    fn record_attempt(&self) -> u32 {
        let mut inner = self.engine.lock();
        if !self.token.is_cancelled() {
            inner.session = inner.session.with_attempts(inner.session.attempts + 1);
        }
        inner.session.attempts
    }

    async fn read_structured(&self, payload: &str) -> Result<LicenseData> {
        let run = self;
        let reader = self.engine.structured.as_ref();
        let attempts = self.budget.structured_attempts_per_call();
        let attempt = move |n: u32| {
            let total = run.record_attempt();
            debug!(attempt = n, total, "barcode attempt");
            reader.read_payload(payload)
        };
        self.retry
            .run_with_budget(
                self.retry.retry(attempt, attempts),
                self.budget.structured_timeout,
            )
            .await
    }

    async fn read_text(&self, observations: &[TextObservation]) -> Result<LicenseData> {
        let reader = self.engine.text.as_ref();
        let attempt = move |n: u32| {
            debug!(attempt = n, lines = observations.len(), "text attempt");
            reader.recognize(observations)
        };
        self.retry
            .run_with_budget(
                self.retry.retry(attempt, MAX_ATTEMPTS_PER_RETRY),
                self.budget.text_timeout,
            )
            .await
    }

    async fn structured_only(&self, payload: &str) -> Result<ScanOutcome> {
        self.transition(
            ScanState::StructuredActive,
            Some(ReaderKind::Structured),
            "reading barcode",
        )?;
        self.checkpoint(Checkpoint::StructuredStarted);
        let result = self.read_structured(payload).await;
        self.checkpoint(Checkpoint::StructuredFinished);
        self.settle(result, ReaderKind::Structured, None)
    }

    async fn text_only(&self, observations: &[TextObservation]) -> Result<ScanOutcome> {
        self.transition(ScanState::TextActive, Some(ReaderKind::Text), "reading text")?;
        self.checkpoint(Checkpoint::TextStarted);
        let result = self.read_text(observations).await;
        self.checkpoint(Checkpoint::TextFinished);
        self.settle(result, ReaderKind::Text, None)
    }

    async fn automatic(
        &self,
        payload: &str,
        observations: &[TextObservation],
    ) -> Result<ScanOutcome> {
        let engine = self.engine;
        self.ensure_live()?;
        engine.sequencer.set_switch_gate(Arc::clone(&self.switch_gate));
        engine.sequencer.start(&self.budget);
        let mut switch_rx = engine.sequencer.subscribe();
        self.transition(
            ScanState::StructuredActive,
            Some(ReaderKind::Structured),
            "reading barcode",
        )?;
        self.checkpoint(Checkpoint::StructuredStarted);

        let mut structured = Box::pin(self.read_structured(payload));
        let mut switch_open = true;
        let mut quality_open = engine.quality.is_some();

        let (error, switched_by) = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(ScanError::Cancelled),
                result = &mut structured => match result {
                    Ok(data) => {
                        self.checkpoint(Checkpoint::StructuredFinished);
                        return self.settle(Ok(data), ReaderKind::Structured, None);
                    }
                    Err(error) => break (error, None),
                },
                changed = switch_rx.changed(), if switch_open => {
                    if changed.is_err() {
                        switch_open = false;
                        continue;
                    }
                    // The sequencer only switches once the gate has accepted it.
                    let requested = *switch_rx.borrow_and_update();
                    if let Some(reason) = requested {
                        break (switch_error(reason, &self.budget), Some(reason));
                    }
                },
                reading = next_reading(engine.quality.as_deref()), if quality_open => match reading {
                    Some(input) => {
                        engine.sequencer.process_quality_metrics(input);
                    }
                    None => {
                        debug!("quality feed ended");
                        quality_open = false;
                    }
                },
            }
        };

        // Abandon the barcode reader; its result is no longer wanted.
        drop(structured);
        self.checkpoint(Checkpoint::StructuredFinished);

        if matches!(error, ScanError::Cancelled) {
            return Err(ScanError::Cancelled);
        }
        self.ensure_live()?;

        if switched_by.is_none() && !self.fallback_eligible(&error) {
            warn!(error = %error, "barcode failure not eligible for fallback");
            return self.settle(Err(error), ReaderKind::Structured, None);
        }

        let reason = switched_by.unwrap_or(if error.is_timeout() {
            FallbackReason::Timeout
        } else {
            FallbackReason::Failure
        });
        self.fall_back(reason, &error, observations).await
    }

    fn fallback_eligible(&self, error: &ScanError) -> bool {
        should_trigger_fallback(&FallbackContext {
            strategy: self.strategy,
            elapsed: self.elapsed(),
            structured_timeout: self.budget.structured_timeout,
            total_budget: self.budget.max_total_time,
            attempts: self.attempts(),
            max_attempts: self.budget.max_structured_attempts,
            error_kind: error.kind(),
        })
    }

    /// Hand over to text recognition after the barcode phase gave up.
    async fn fall_back(
        &self,
        reason: FallbackReason,
        cause: &ScanError,
        observations: &[TextObservation],
    ) -> Result<ScanOutcome> {
        info!(session = %self.session_id, %reason, cause = %cause, "falling back to text recognition");
        {
            let mut inner = self.engine.lock();
            self.ensure_live()?;
            inner.session = inner.session.with_fallback(reason);
        }
        self.emit(ScanEvent::ModeSwitch {
            session_id: self.session_id,
            from: ReaderKind::Structured,
            to: ReaderKind::Text,
            reason,
        })?;
        self.transition(
            ScanState::Transitioning,
            Some(ReaderKind::Text),
            format!("switching to text recognition ({reason})"),
        )?;
        self.engine.sequencer.request_switch(reason);

        self.checkpoint(Checkpoint::TransitionStarted);
        let began = Instant::now();
        let warmed = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(ScanError::Cancelled),
            warmed = self.engine.text.warm_up() => warmed,
        };
        let took = began.elapsed();
        self.checkpoint(Checkpoint::TransitionFinished);

        let slow = self.engine.monitor().record_transition(took);
        if let Some(alert) = slow {
            self.emit(ScanEvent::Alert(alert))?;
        }
        if let Err(e) = warmed {
            let error = ScanError::Transition(format!("text reader failed to start: {e}"));
            return self.settle(Err(error), ReaderKind::Text, Some(reason));
        }

        self.transition(ScanState::TextActive, Some(ReaderKind::Text), "reading text")?;
        self.checkpoint(Checkpoint::TextStarted);
        let result = self.read_text(observations).await;
        self.checkpoint(Checkpoint::TextFinished);
        self.settle(result, ReaderKind::Text, Some(reason))
    }

    /// Enter the terminal state and publish the session's outcome.
    fn settle(
        &self,
        result: Result<LicenseData>,
        reader: ReaderKind,
        fallback: Option<FallbackReason>,
    ) -> Result<ScanOutcome> {
        self.ensure_live()?;
        if matches!(result, Err(ScanError::Cancelled)) {
            return Err(ScanError::Cancelled);
        }

        let total_time = self.elapsed();
        match &result {
            Ok(_) => {
                self.transition(ScanState::Completed, Some(reader), "scan complete")?;
                self.engine.sequencer.mark_success();
            }
            Err(e) => {
                self.transition(ScanState::Failed, Some(reader), format!("scan failed: {e}"))?;
                self.engine.sequencer.cancel();
            }
        }

        self.emit(ScanEvent::Metrics {
            session_id: self.session_id,
            success: result.is_ok(),
            fallback_triggered: fallback.is_some(),
            fallback_reason: fallback,
            final_strategy: Some(reader),
            total_processing_time_ms: ms(total_time),
            confidence_score: result.as_ref().ok().and_then(LicenseData::confidence),
        })?;

        let report = self.engine.monitor().end_session();
        if let Some(report) = report {
            self.emit(ScanEvent::Performance(report.metrics))?;
            for alert in report.alerts {
                self.emit(ScanEvent::Alert(alert))?;
            }
        }

        match &result {
            Ok(_) => info!(session = %self.session_id, reader = reader.label(), ?fallback, total_ms = ms(total_time), "scan completed"),
            Err(e) => warn!(session = %self.session_id, reader = reader.label(), error = %e, "scan failed"),
        }

        let attempts = self.attempts();
        result.map(|data| ScanOutcome {
            data,
            final_strategy: reader,
            fallback,
            total_time,
            attempts,
        })
    }
}

fn warn_if_no_timeout_fallback(config: &EngineConfig) {
    if !config.timeout_fallback_possible() {
        warn!(
            structured_timeout_ms = config.structured_timeout_ms,
            max_total_time_ms = config.max_total_time_ms,
            headroom_ms = ms(MIN_FALLBACK_HEADROOM),
            "total budget leaves no room for a text fallback after a barcode timeout"
        );
    }
}

/// The failure a sequencer-initiated switch stands in for.
fn switch_error(reason: FallbackReason, budget: &TimingBudget) -> ScanError {
    match reason {
        FallbackReason::Timeout => ScanError::Timeout {
            budget_ms: ms(budget.structured_timeout),
        },
        FallbackReason::Quality => {
            ScanError::operation(FailureKind::PoorQuality, "sustained poor frame quality")
        }
        FallbackReason::Failure => {
            ScanError::operation(FailureKind::Unclassified, "barcode reader abandoned")
        }
    }
}

async fn next_reading(source: Option<&dyn QualitySource>) -> Option<QualityInput> {
    match source {
        Some(source) => source.next_reading().await,
        None => None,
    }
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}
