// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Notifications emitted by the scan engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AutoModeState, FallbackReason, PerformanceAlert, PerformanceMetrics, QualityTrend,
    ReaderKind, ScanState, SessionId,
};

/// Every notification the engine emits, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Session state transition.
    Progress {
        session_id: SessionId,
        state: ScanState,
        strategy: Option<ReaderKind>,
        started_at: DateTime<Utc>,
        attempt_count: u32,
        elapsed_ms: u64,
        message: String,
    },

    /// Barcode reader abandoned for text recognition (once per fallback).
    ModeSwitch {
        session_id: SessionId,
        from: ReaderKind,
        to: ReaderKind,
        reason: FallbackReason,
    },

    /// Session outcome, emitted once when a session settles.
    Metrics {
        session_id: SessionId,
        success: bool,
        fallback_triggered: bool,
        fallback_reason: Option<FallbackReason>,
        final_strategy: Option<ReaderKind>,
        total_processing_time_ms: u64,
        confidence_score: Option<f64>,
    },

    /// A service-level objective was violated.
    Alert(PerformanceAlert),

    /// Timing and resource measurements for a finished session.
    Performance(PerformanceMetrics),

    /// Auto-mode sequencer transition.
    AutoModeStateChanged {
        old_state: AutoModeState,
        new_state: AutoModeState,
    },

    /// Barcode phase crossed its warning threshold.
    WarningThreshold { elapsed_ms: u64, threshold_ms: u64 },

    /// Sequencer recommends a reader once its switch delay has elapsed.
    ModeRecommendation {
        mode: ReaderKind,
        reason: FallbackReason,
    },

    /// Result of feeding one quality reading into the window.
    QualityAssessed {
        score: f64,
        average: f64,
        trend: QualityTrend,
        should_switch: bool,
    },
}

impl ScanEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::ModeSwitch { .. } => "mode_switch",
            Self::Metrics { .. } => "metrics",
            Self::Alert(_) => "alert",
            Self::Performance(_) => "performance",
            Self::AutoModeStateChanged { .. } => "auto_mode_state_changed",
            Self::WarningThreshold { .. } => "warning_threshold",
            Self::ModeRecommendation { .. } => "mode_recommendation",
            Self::QualityAssessed { .. } => "quality_assessed",
        }
    }
}

/// Receiver for engine notifications.
///
/// Called synchronously on the engine's task, in transition order; keep
/// implementations cheap and non-blocking.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = ScanEvent::ModeRecommendation {
            mode: ReaderKind::Text,
            reason: FallbackReason::Timeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mode_recommendation");
        assert_eq!(json["mode"], "text");
        assert_eq!(json["reason"], "timeout");
        assert_eq!(event.name(), "mode_recommendation");
    }
}
