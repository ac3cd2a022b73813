// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Timeout and retry engine for reader calls.
//
// `run_with_budget` races a reader call against a registry timer; the loser is
// dropped. `retry` repeats a call sequentially with exponential backoff plus
// jitter. Reader failures are retried and passed through unchanged on
// exhaustion; the synthetic timeout and cancellation are never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{FailureKind, Result, ScanError};
use scanwerk_core::types::ErrorClass;

use crate::timers::TimerRegistry;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries, before jitter.
    pub max_delay: Duration,
    /// Upper bound of the random jitter, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: 0.1,
        }
    }
}

impl From<&EngineConfig> for RetryConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            ..Default::default()
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: the failure did not come from the reader.
    GiveUp(ErrorClass),
    /// Maximum attempts exhausted.
    Exhausted,
}

/// Outcome of racing an operation against a timer.
#[derive(Debug, Clone, PartialEq)]
pub enum Raced<T> {
    Settled(T),
    TimedOut,
}

/// Classify a `ScanError` into an `ErrorClass` for retry and UI decisions.
pub fn classify_error(err: &ScanError) -> ErrorClass {
    match err {
        ScanError::Operation { kind, .. } => match kind {
            // Transient: the next frame may well decode
            FailureKind::DecodeError | FailureKind::Unclassified => ErrorClass::Transient,
            // User action: reposition the card, improve lighting
            FailureKind::NotFound | FailureKind::PoorQuality => ErrorClass::UserAction,
            // Permanent: the document itself is not supported
            FailureKind::BadFormat => ErrorClass::Permanent,
        },
        ScanError::Timeout { .. } | ScanError::Transition(_) | ScanError::Io(_) => {
            ErrorClass::Transient
        }
        ScanError::Cancelled => ErrorClass::UserAction,
        ScanError::InvalidInput(_)
        | ScanError::Config(_)
        | ScanError::Serialization(_)
        | ScanError::Internal(_) => ErrorClass::Permanent,
    }
}

/// Decide whether to retry after `attempt` (1-based) failed with `err`.
pub fn should_retry(
    err: &ScanError,
    attempt: u32,
    max_attempts: u32,
    config: &RetryConfig,
) -> RetryDecision {
    match err {
        ScanError::Operation { .. } => {
            if attempt >= max_attempts {
                RetryDecision::Exhausted
            } else {
                RetryDecision::RetryAfter(compute_delay(attempt, config))
            }
        }
        other => RetryDecision::GiveUp(classify_error(other)),
    }
}

/// Backoff before the next attempt once `completed` attempts have failed.
///
/// delay = min(base * 2^completed, max_delay) + jitter, jitter in [0, 10%].
pub fn compute_delay(completed: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << completed.min(20));
    let capped_ms = exp_ms.min(config.max_delay.as_millis() as u64);
    let jitter_ms = jitter(capped_ms, config.jitter);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn jitter(delay_ms: u64, fraction: f64) -> u64 {
    if delay_ms == 0 || fraction <= 0.0 {
        return 0;
    }
    let frac = rand::thread_rng().gen_range(0.0..=fraction);
    (delay_ms as f64 * frac).floor() as u64
}

/// Budgeted, retrying executor for reader calls.
#[derive(Clone)]
pub struct RetryManager {
    registry: TimerRegistry,
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(registry: TimerRegistry, config: RetryConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RetryConfig) {
        self.config = config;
    }

    /// Race `operation` against a `timeout` timer; the first to settle wins.
    ///
    /// Errors only with `ScanError::Cancelled` when the registry is cancelled
    /// while the race is running.
    pub async fn race<T, F>(&self, operation: F, timeout: Duration) -> Result<Raced<T>>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            out = operation => Ok(Raced::Settled(out)),
            slept = self.registry.sleep(timeout) => {
                slept?;
                Ok(Raced::TimedOut)
            }
        }
    }

    /// Run `operation` with a hard `timeout`, mapping expiry to `ScanError::Timeout`.
    pub async fn run_with_budget<T, F>(&self, operation: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.race(operation, timeout).await? {
            Raced::Settled(result) => result,
            Raced::TimedOut => {
                let budget_ms = timeout.as_millis() as u64;
                warn!(budget_ms, "operation exceeded its budget; abandoning it");
                Err(ScanError::Timeout { budget_ms })
            }
        }
    }

    /// Call `operation(attempt)` up to `max_attempts` times, sequentially.
    ///
    /// On exhaustion the last failure is returned unmodified.
    pub async fn retry<T, F, Fut>(&self, mut operation: F, max_attempts: u32) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match should_retry(&err, attempt, max_attempts, &self.config) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "scheduling retry"
                    );
                    self.registry.sleep(delay).await?;
                    attempt += 1;
                }
                RetryDecision::GiveUp(class) => {
                    debug!(attempt, ?class, error = %err, "not retrying");
                    return Err(err);
                }
                RetryDecision::Exhausted => {
                    warn!(attempt, max = max_attempts, error = %err, "retry limit exhausted");
                    return Err(err);
                }
            }
        }
    }
}
