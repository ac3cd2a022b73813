// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk Engine: orchestrates the barcode and text readers of a scan
// session under hard time budgets: timer bookkeeping, timeout/retry, frame
// quality assessment, the auto-mode fallback sequencer, the session
// coordinator and performance telemetry.

pub mod auto_mode;
pub mod coordinator;
pub mod events;
pub mod quality;
pub mod retry;
pub mod telemetry;
pub mod timers;

pub use auto_mode::{AutoModeSequencer, SwitchGate};
pub use coordinator::{
    EngineBuilder, FallbackContext, ScanEngine, ScanOutcome, Session, should_trigger_fallback,
};
pub use events::{ChannelSink, NullSink, TracingSink};
pub use quality::{QualityAssessment, QualitySettings, QualityWindow};
pub use retry::{Raced, RetryConfig, RetryManager, classify_error};
pub use telemetry::{
    Checkpoint, PerformanceMonitor, PerformanceSummary, PerformanceTargets, ResourceProbe,
    ResourceSample, SessionReport, SysinfoProbe, percentile,
};
pub use timers::{TimerHandle, TimerRegistry, TimerSleep};
