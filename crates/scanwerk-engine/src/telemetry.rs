// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-session performance measurement and cross-session percentiles.
//
// A session is bracketed by `start_session` / `end_session`; phases are
// derived from checkpoints recorded in between. Memory and CPU come from a
// `ResourceProbe`, sampled at every checkpoint to track peaks.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::time::Instant;
use tracing::{debug, warn};

use scanwerk_core::config::{TRANSITION_CEILING, TimingBudget};
use scanwerk_core::types::{
    AlertCategory, AlertSeverity, PerformanceAlert, PerformanceMetrics, ScanStrategy, SloFlags,
};

/// Session totals kept for percentile summaries.
const MAX_HISTORY: usize = 100;

const MB: u64 = 1024 * 1024;

/// Service-level objectives for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceTargets {
    pub structured: Duration,
    pub text: Duration,
    pub total: Duration,
    pub transition: Duration,
    pub memory_delta_bytes: u64,
    pub cpu_percent: f32,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self::from(&TimingBudget::default())
    }
}

impl From<&TimingBudget> for PerformanceTargets {
    fn from(budget: &TimingBudget) -> Self {
        Self {
            structured: budget.structured_timeout,
            text: budget.text_timeout,
            total: budget.max_total_time,
            transition: TRANSITION_CEILING,
            memory_delta_bytes: 50 * MB,
            cpu_percent: 60.0,
        }
    }
}

/// One reading of process resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Source of process resource readings.
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Samples the current process through `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());
        // CPU usage is a delta between refreshes; establish the baseline.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        Self { system, pid }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));
        match self.system.process(self.pid) {
            Some(process) => ResourceSample {
                memory_bytes: process.memory(),
                cpu_percent: process.cpu_usage(),
            },
            None => ResourceSample::default(),
        }
    }
}

/// Named points inside a session used to derive phase timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    StructuredStarted,
    StructuredFinished,
    TransitionStarted,
    TransitionFinished,
    TextStarted,
    TextFinished,
}

/// Metrics and violated objectives for one finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub metrics: PerformanceMetrics,
    pub alerts: Vec<PerformanceAlert>,
}

/// Percentiles over recent session totals, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub count: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub mean_ms: f64,
}

struct ActiveSession {
    strategy: ScanStrategy,
    started: Instant,
    baseline: ResourceSample,
    peak_memory: u64,
    peak_cpu: f32,
    marks: Vec<(Checkpoint, Instant)>,
}

impl ActiveSession {
    fn absorb(&mut self, sample: ResourceSample) {
        self.peak_memory = self.peak_memory.max(sample.memory_bytes);
        self.peak_cpu = self.peak_cpu.max(sample.cpu_percent);
    }

    /// From the first `start` mark to the last `finish` mark, or to `end`
    /// if the phase never finished.
    fn phase(&self, start: Checkpoint, finish: Checkpoint, end: Instant) -> Option<Duration> {
        let began = self.marks.iter().find(|(c, _)| *c == start)?.1;
        let ended = self
            .marks
            .iter()
            .rev()
            .find(|(c, _)| *c == finish)
            .map_or(end, |(_, t)| *t);
        Some(ended.saturating_duration_since(began))
    }
}

/// Measures sessions one at a time and keeps a bounded history of totals.
pub struct PerformanceMonitor {
    targets: PerformanceTargets,
    probe: Box<dyn ResourceProbe>,
    session: Option<ActiveSession>,
    history: VecDeque<u64>,
}

impl PerformanceMonitor {
    pub fn new(targets: PerformanceTargets, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            targets,
            probe,
            session: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    pub fn targets(&self) -> &PerformanceTargets {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: PerformanceTargets) {
        self.targets = targets;
    }

    /// Begin measuring. Any unfinished session is discarded.
    pub fn start_session(&mut self, strategy: ScanStrategy) {
        let baseline = self.probe.sample();
        self.session = Some(ActiveSession {
            strategy,
            started: Instant::now(),
            baseline,
            peak_memory: baseline.memory_bytes,
            peak_cpu: baseline.cpu_percent,
            marks: Vec::new(),
        });
    }

    pub fn checkpoint(&mut self, checkpoint: Checkpoint) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.marks.push((checkpoint, Instant::now()));
        let sample = self.probe.sample();
        session.absorb(sample);
    }

    /// Check a handoff against the transition ceiling.
    pub fn record_transition(&self, took: Duration) -> Option<PerformanceAlert> {
        if took <= self.targets.transition {
            return None;
        }
        let alert = alert(
            AlertSeverity::Critical,
            AlertCategory::Transition,
            format!(
                "reader transition took {} ms (ceiling {} ms)",
                took.as_millis(),
                self.targets.transition.as_millis()
            ),
            self.targets.transition.as_millis() as f64,
            took.as_millis() as f64,
        );
        warn!(took_ms = took.as_millis() as u64, "transition exceeded ceiling");
        Some(alert)
    }

    /// Drop the current session without recording it.
    pub fn abandon_session(&mut self) {
        self.session = None;
    }

    /// Finish the current session, evaluate every objective and record the total.
    pub fn end_session(&mut self) -> Option<SessionReport> {
        let mut session = self.session.take()?;
        let sample = self.probe.sample();
        session.absorb(sample);

        let now = Instant::now();
        let total = now.saturating_duration_since(session.started);
        let structured = session.phase(Checkpoint::StructuredStarted, Checkpoint::StructuredFinished, now);
        let transition = session.phase(Checkpoint::TransitionStarted, Checkpoint::TransitionFinished, now);
        let text = session.phase(Checkpoint::TextStarted, Checkpoint::TextFinished, now);
        let memory_delta = session.peak_memory as i64 - session.baseline.memory_bytes as i64;

        let t = &self.targets;
        let slo = SloFlags {
            structured_within_budget: structured.is_none_or(|d| d <= t.structured),
            text_within_budget: text.is_none_or(|d| d <= t.text),
            total_within_budget: total <= t.total,
            memory_within_budget: memory_delta <= t.memory_delta_bytes as i64,
            cpu_within_budget: session.peak_cpu <= t.cpu_percent,
        };

        let mut alerts = Vec::new();
        if let (false, Some(d)) = (slo.structured_within_budget, structured) {
            alerts.push(timing_alert(AlertSeverity::Warning, "barcode phase", d, t.structured));
        }
        if let (false, Some(d)) = (slo.text_within_budget, text) {
            alerts.push(timing_alert(AlertSeverity::Warning, "text phase", d, t.text));
        }
        if !slo.total_within_budget {
            alerts.push(timing_alert(AlertSeverity::Critical, "session", total, t.total));
        }
        if !slo.memory_within_budget {
            alerts.push(alert(
                AlertSeverity::Warning,
                AlertCategory::Memory,
                format!("memory grew by {} MB", memory_delta / MB as i64),
                t.memory_delta_bytes as f64,
                memory_delta as f64,
            ));
        }
        if !slo.cpu_within_budget {
            alerts.push(alert(
                AlertSeverity::Warning,
                AlertCategory::Cpu,
                format!("cpu peaked at {:.1}%", session.peak_cpu),
                f64::from(t.cpu_percent),
                f64::from(session.peak_cpu),
            ));
        }

        let total_ms = total.as_millis() as u64;
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(total_ms);

        let as_ms = |d: Duration| d.as_millis() as u64;
        let metrics = PerformanceMetrics {
            strategy: session.strategy,
            total_ms,
            structured_ms: structured.map(as_ms),
            text_ms: text.map(as_ms),
            transition_ms: transition.map(as_ms),
            peak_memory_bytes: session.peak_memory,
            memory_delta_bytes: memory_delta,
            peak_cpu_percent: session.peak_cpu,
            slo,
        };
        debug!(total_ms, slo_met = slo.all_met(), alerts = alerts.len(), "session measured");
        Some(SessionReport { metrics, alerts })
    }

    /// Percentiles over the most recent session totals.
    pub fn summary(&self) -> Option<PerformanceSummary> {
        let mut sorted: Vec<u64> = self.history.iter().copied().collect();
        sorted.sort_unstable();
        let mean_ms = sorted.iter().sum::<u64>() as f64 / sorted.len().max(1) as f64;
        Some(PerformanceSummary {
            count: sorted.len(),
            p50_ms: percentile(&sorted, 0.50)?,
            p95_ms: percentile(&sorted, 0.95)?,
            p99_ms: percentile(&sorted, 0.99)?,
            mean_ms,
        })
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceTargets::default(), Box::new(SysinfoProbe::new()))
    }
}

/// Value at index `floor(len * p)`, clamped to the last element.
pub fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let index = (sorted.len() as f64 * p.clamp(0.0, 1.0)).floor() as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

fn alert(
    severity: AlertSeverity,
    category: AlertCategory,
    message: String,
    threshold: f64,
    observed: f64,
) -> PerformanceAlert {
    PerformanceAlert {
        severity,
        category,
        message,
        timestamp: Utc::now(),
        threshold,
        observed,
    }
}

fn timing_alert(
    severity: AlertSeverity,
    what: &str,
    took: Duration,
    budget: Duration,
) -> PerformanceAlert {
    alert(
        severity,
        AlertCategory::Timeout,
        format!(
            "{what} took {} ms (budget {} ms)",
            took.as_millis(),
            budget.as_millis()
        ),
        budget.as_millis() as f64,
        took.as_millis() as f64,
    )
}

#[cfg(test)]
pub(crate) use fixed::FixedProbe;
