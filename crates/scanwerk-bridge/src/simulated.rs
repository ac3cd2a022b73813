// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted readers for desktop/CI builds where no camera or decoder exists.
//
// Each reader replays a queue of outcomes after a fixed latency, then repeats
// its default outcome forever. Used by the `scanwerk` binary and by the engine
// tests to reproduce timing scenarios under tokio's paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use scanwerk_core::error::{FailureKind, Result, ScanError};
use scanwerk_core::types::{LicenseData, QualityInput, TextObservation};

use crate::traits::{QualitySource, StructuredReader, TextReader};

/// What a scripted reader does on one call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(LicenseData),
    Fail(FailureKind),
    /// Never settles; only a timeout or cancellation ends the call.
    Never,
}

/// A reader whose behaviour is fixed up front.
///
/// Implements both [`StructuredReader`] and [`TextReader`].
#[derive(Debug)]
pub struct ScriptedReader {
    latency: Duration,
    warm_up: Duration,
    warm_up_fails: bool,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    calls: AtomicU32,
}

impl ScriptedReader {
    pub fn new(default: Outcome) -> Self {
        Self {
            latency: Duration::ZERO,
            warm_up: Duration::ZERO,
            warm_up_fails: false,
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(data: LicenseData) -> Self {
        Self::new(Outcome::Succeed(data))
    }

    pub fn failing(kind: FailureKind) -> Self {
        Self::new(Outcome::Fail(kind))
    }

    pub fn never() -> Self {
        Self::new(Outcome::Never)
    }

    /// Delay applied before every outcome.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Time spent in [`TextReader::warm_up`].
    pub fn with_warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }

    /// Make [`TextReader::warm_up`] fail.
    pub fn with_failing_warm_up(mut self) -> Self {
        self.warm_up_fails = true;
        self
    }

    /// Queue an outcome to be used before the default one.
    pub fn then(self, outcome: Outcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    /// Number of read calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self) -> Result<LicenseData> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        tracing::debug!(call, ?outcome, "scripted reader invoked");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            Outcome::Succeed(data) => Ok(data),
            Outcome::Fail(kind) => Err(ScanError::operation(
                kind,
                format!("scripted failure on call {call}"),
            )),
            Outcome::Never => std::future::pending().await,
        }
    }
}

#[async_trait]
impl StructuredReader for ScriptedReader {
    async fn read_payload(&self, _payload: &str) -> Result<LicenseData> {
        self.run().await
    }
}

#[async_trait]
impl TextReader for ScriptedReader {
    async fn warm_up(&self) -> Result<()> {
        if !self.warm_up.is_zero() {
            tokio::time::sleep(self.warm_up).await;
        }
        if self.warm_up_fails {
            return Err(ScanError::Internal("recogniser failed to load".into()));
        }
        Ok(())
    }

    async fn recognize(&self, _observations: &[TextObservation]) -> Result<LicenseData> {
        self.run().await
    }
}

/// Quality feed backed by a bounded channel.
pub struct ChannelQualitySource {
    rx: tokio::sync::Mutex<mpsc::Receiver<QualityInput>>,
}

impl ChannelQualitySource {
    /// Create a feed and the sender that drives it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<QualityInput>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl QualitySource for ChannelQualitySource {
    async fn next_reading(&self) -> Option<QualityInput> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::types::SimpleQuality;

    fn sample() -> LicenseData {
        LicenseData {
            document_number: Some("D1234567".into()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn script_runs_before_default() {
        let reader = ScriptedReader::succeeding(sample()).then(Outcome::Fail(FailureKind::NotFound));

        let first = reader.read_payload("@ANSI").await;
        assert!(matches!(
            first,
            Err(ScanError::Operation { kind: FailureKind::NotFound, .. })
        ));
        assert_eq!(reader.read_payload("@ANSI").await.unwrap(), sample());
        assert_eq!(reader.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_applied() {
        let reader = ScriptedReader::succeeding(sample()).with_latency(Duration::from_millis(300));
        let start = tokio::time::Instant::now();
        reader.recognize(&[]).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn never_outcome_does_not_settle() {
        let reader = ScriptedReader::never();
        let raced = tokio::time::timeout(Duration::from_secs(60), reader.read_payload("x")).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn channel_source_ends_when_sender_drops() {
        let (tx, source) = ChannelQualitySource::channel(4);
        let reading = QualityInput::Simple(SimpleQuality {
            blur: 0.1,
            brightness: 0.8,
            document_detected: true,
        });
        tx.send(reading).await.unwrap();
        drop(tx);
        assert_eq!(source.next_reading().await, Some(reading));
        assert_eq!(source.next_reading().await, None);
    }
}
