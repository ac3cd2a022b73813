// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event sinks shipped with the engine.

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use scanwerk_core::events::{EventSink, ScanEvent};
use scanwerk_core::types::AlertSeverity;

/// Forwards every event into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped; discarding event");
        }
    }
}

/// Writes events as structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ScanEvent) {
        match &event {
            ScanEvent::Progress {
                session_id,
                state,
                strategy,
                attempt_count,
                elapsed_ms,
                message,
                ..
            } => info!(
                session = %session_id,
                ?state,
                reader = strategy.map(|s| s.label()),
                attempts = attempt_count,
                elapsed_ms,
                "{message}"
            ),
            ScanEvent::ModeSwitch {
                session_id,
                from,
                to,
                reason,
            } => info!(
                session = %session_id,
                from = from.label(),
                to = to.label(),
                %reason,
                "switching reader"
            ),
            ScanEvent::Alert(alert) => match alert.severity {
                AlertSeverity::Critical => error!(
                    category = ?alert.category,
                    threshold = alert.threshold,
                    observed = alert.observed,
                    "{}",
                    alert.message
                ),
                AlertSeverity::Warning => warn!(
                    category = ?alert.category,
                    threshold = alert.threshold,
                    observed = alert.observed,
                    "{}",
                    alert.message
                ),
            },
            other => match serde_json::to_string(other) {
                Ok(json) => debug!(event = other.name(), %json, "engine event"),
                Err(e) => debug!(event = other.name(), error = %e, "engine event"),
            },
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ScanEvent) {}
}

#[cfg(test)]
pub(crate) use recording::RecordingSink;


#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::types::{FallbackReason, ReaderKind};

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(ScanEvent::WarningThreshold {
            elapsed_ms: 2100,
            threshold_ms: 2100,
        });
        sink.emit(ScanEvent::ModeRecommendation {
            mode: ReaderKind::Text,
            reason: FallbackReason::Timeout,
        });
        assert_eq!(rx.recv().await.unwrap().name(), "warning_threshold");
        assert_eq!(rx.recv().await.unwrap().name(), "mode_recommendation");
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(ScanEvent::WarningThreshold {
            elapsed_ms: 1,
            threshold_ms: 1,
        });
    }
}
