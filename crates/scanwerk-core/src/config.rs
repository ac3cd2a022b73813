// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration and per-session timing budgets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Hard ceiling for the handoff between the two readers.
pub const TRANSITION_CEILING: Duration = Duration::from_millis(200);

/// Minimum session time that must remain for a fallback to be worth starting.
pub const MIN_FALLBACK_HEADROOM: Duration = Duration::from_millis(1000);

/// Upper bound on attempts made by a single retry call.
pub const MAX_ATTEMPTS_PER_RETRY: u32 = 3;

/// Persistent engine settings. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget for the barcode reader.
    pub structured_timeout_ms: u64,
    /// Budget for the text reader.
    pub text_timeout_ms: u64,
    /// Attempts allowed for the barcode reader (capped per retry call).
    pub max_structured_attempts: u32,
    /// Wall-clock ceiling for a whole session.
    ///
    /// A barcode timeout only falls back to text when at least
    /// [`MIN_FALLBACK_HEADROOM`] of this remains once `structured_timeout_ms`
    /// has elapsed. Smaller gaps are accepted but turn every barcode timeout
    /// into a failed session; see [`EngineConfig::timeout_fallback_possible`].
    pub max_total_time_ms: u64,
    /// Let sustained poor frame quality trigger the text fallback.
    pub quality_auto_switch: bool,
    /// Rolling average below which quality counts as poor.
    pub min_quality: f64,
    /// Readings older than this are evicted from the quality window.
    pub quality_window_ms: u64,
    /// Maximum number of readings kept in the quality window.
    pub max_quality_samples: usize,
    /// Fraction of the barcode budget at which a warning is raised.
    pub warning_fraction: f64,
    /// Pause between starting a switch and the text reader becoming active.
    pub switch_delay_ms: u64,
    /// First backoff delay between retry attempts.
    pub retry_base_delay_ms: u64,
    /// Largest backoff delay between retry attempts.
    pub retry_max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            structured_timeout_ms: 3000,
            text_timeout_ms: 2000,
            max_structured_attempts: 5,
            max_total_time_ms: 4000,
            quality_auto_switch: true,
            min_quality: 0.4,
            quality_window_ms: 2000,
            max_quality_samples: 10,
            warning_fraction: 0.7,
            switch_delay_ms: 500,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.structured_timeout_ms == 0 || self.text_timeout_ms == 0 {
            return Err(ScanError::Config("reader timeouts must be non-zero".into()));
        }
        if self.max_total_time_ms == 0 {
            return Err(ScanError::Config("total session time must be non-zero".into()));
        }
        if self.max_structured_attempts == 0 {
            return Err(ScanError::Config("at least one barcode attempt is required".into()));
        }
        if !(self.warning_fraction > 0.0 && self.warning_fraction < 1.0) {
            return Err(ScanError::Config(format!(
                "warning fraction must be in (0, 1), got {}",
                self.warning_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(ScanError::Config(format!(
                "minimum quality must be in [0, 1], got {}",
                self.min_quality
            )));
        }
        if self.max_quality_samples == 0 {
            return Err(ScanError::Config("quality window needs at least one slot".into()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ScanError::Config(
                "retry base delay exceeds retry max delay".into(),
            ));
        }
        Ok(())
    }

    /// Whether a barcode timeout leaves enough session time to fall back.
    pub fn timeout_fallback_possible(&self) -> bool {
        self.max_total_time_ms.saturating_sub(self.structured_timeout_ms)
            >= MIN_FALLBACK_HEADROOM.as_millis() as u64
    }

    /// Snapshot the timing-related settings for one session.
    pub fn timing_budget(&self) -> TimingBudget {
        TimingBudget {
            structured_timeout: Duration::from_millis(self.structured_timeout_ms),
            text_timeout: Duration::from_millis(self.text_timeout_ms),
            max_structured_attempts: self.max_structured_attempts,
            max_total_time: Duration::from_millis(self.max_total_time_ms),
            transition_ceiling: TRANSITION_CEILING,
            warning_fraction: self.warning_fraction,
            switch_delay: Duration::from_millis(self.switch_delay_ms),
        }
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Persist settings as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// Immutable timing limits for a single session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingBudget {
    pub structured_timeout: Duration,
    pub text_timeout: Duration,
    pub max_structured_attempts: u32,
    pub max_total_time: Duration,
    pub transition_ceiling: Duration,
    pub warning_fraction: f64,
    pub switch_delay: Duration,
}

impl TimingBudget {
    /// Point at which the barcode phase raises its warning.
    pub fn warning_threshold(&self) -> Duration {
        self.structured_timeout.mul_f64(self.warning_fraction)
    }

    /// Attempts one retry call may make against the barcode reader.
    pub fn structured_attempts_per_call(&self) -> u32 {
        self.max_structured_attempts.clamp(1, MAX_ATTEMPTS_PER_RETRY)
    }
}

impl Default for TimingBudget {
    fn default() -> Self {
        EngineConfig::default().timing_budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_total_budget_rules_out_timeout_fallback() {
        assert!(EngineConfig::default().timeout_fallback_possible());
        let narrow = EngineConfig {
            max_total_time_ms: 3500,
            ..Default::default()
        };
        narrow.validate().unwrap();
        assert!(!narrow.timeout_fallback_possible());
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        let budget = config.timing_budget();
        assert_eq!(budget.structured_timeout, Duration::from_millis(3000));
        assert_eq!(budget.text_timeout, Duration::from_millis(2000));
        assert_eq!(budget.max_total_time, Duration::from_millis(4000));
        assert_eq!(budget.transition_ceiling, Duration::from_millis(200));
        assert_eq!(budget.warning_threshold(), Duration::from_millis(2100));
        assert_eq!(budget.structured_attempts_per_call(), 3);
    }

    #[test]
    fn rejects_bad_warning_fraction() {
        let config = EngineConfig {
            warning_fraction: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = EngineConfig {
            text_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn attempts_floor_at_one() {
        let budget = TimingBudget {
            max_structured_attempts: 0,
            ..Default::default()
        };
        assert_eq!(budget.structured_attempts_per_call(), 1);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            structured_timeout_ms: 2500,
            quality_auto_switch: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "text_timeout_ms": 5000 }"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.text_timeout_ms, 5000);
        assert_eq!(config.structured_timeout_ms, 3000);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "min_quality": 4.0 }"#).unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ScanError::Config(_))));
    }
}
