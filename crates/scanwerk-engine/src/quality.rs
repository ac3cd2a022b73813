// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rolling frame-quality assessment.
//
// Every reading is scored, pushed into a bounded time window and checked for
// sustained degradation. A switch is only ever recommended once the window
// holds enough samples to rule out a single bad frame.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use scanwerk_core::config::EngineConfig;
use scanwerk_core::types::{QualityInput, QualityReading, QualityTrend};

const BLUR_WEIGHT: f64 = 0.3;
const BRIGHTNESS_WEIGHT: f64 = 0.25;
const DETECTION_WEIGHT: f64 = 0.25;

/// Score of a reading that carries none of the scored components.
pub const NEUTRAL_SCORE: f64 = 0.5;
/// Blur above which the latest frame alone justifies a switch.
pub const BLUR_SWITCH_THRESHOLD: f64 = 0.7;
/// Samples required before any switch can be recommended.
pub const MIN_SAMPLES_FOR_SWITCH: usize = 3;
/// Minimum score change between first and last sample to count as a trend.
pub const TREND_DEADBAND: f64 = 0.1;

/// Tunables for the quality window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySettings {
    pub auto_switch: bool,
    pub min_quality: f64,
    pub window: Duration,
    pub max_samples: usize,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for QualitySettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            auto_switch: config.quality_auto_switch,
            min_quality: config.min_quality,
            window: Duration::from_millis(config.quality_window_ms),
            max_samples: config.max_quality_samples.max(1),
        }
    }
}

/// Result of observing one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub should_switch: bool,
    /// Score of the reading just observed.
    pub score: f64,
    /// Mean score across the window, including this reading.
    pub average: f64,
    pub trend: QualityTrend,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    reading: QualityReading,
    score: f64,
    at: Instant,
}

/// Weighted [0, 1] score of one reading, renormalised over present components.
pub fn score(reading: &QualityReading) -> f64 {
    let components = [
        reading.blur.map(|b| (1.0 - b, BLUR_WEIGHT)),
        reading.brightness.map(|b| (b, BRIGHTNESS_WEIGHT)),
        reading
            .document_detected
            .map(|d| (if d { 1.0 } else { 0.0 }, DETECTION_WEIGHT)),
    ];

    let (weighted, total) = components
        .iter()
        .flatten()
        .fold((0.0, 0.0), |(sum, weights), (value, weight)| {
            (sum + value * weight, weights + weight)
        });

    if total == 0.0 {
        NEUTRAL_SCORE
    } else {
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Bounded, time-windowed history of quality readings for one session.
#[derive(Debug, Clone)]
pub struct QualityWindow {
    settings: QualitySettings,
    samples: VecDeque<Sample>,
}

impl QualityWindow {
    pub fn new(settings: QualitySettings) -> Self {
        Self {
            settings,
            samples: VecDeque::with_capacity(settings.max_samples),
        }
    }

    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    /// Replace the settings. Existing samples are kept but re-capped.
    pub fn set_settings(&mut self, settings: QualitySettings) {
        self.settings = settings;
        while self.samples.len() > settings.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn observe(&mut self, input: QualityInput) -> QualityAssessment {
        self.observe_at(input, Instant::now())
    }

    /// Record a reading taken at `now` and decide whether to switch.
    pub fn observe_at(&mut self, input: QualityInput, now: Instant) -> QualityAssessment {
        let reading = QualityReading::from(input);
        let score = score(&reading);

        let window = self.settings.window;
        self.samples
            .retain(|s| now.saturating_duration_since(s.at) <= window);
        self.samples.push_back(Sample {
            reading,
            score,
            at: now,
        });
        while self.samples.len() > self.settings.max_samples {
            self.samples.pop_front();
        }

        let average = self.average_quality().unwrap_or(score);
        QualityAssessment {
            should_switch: self.should_switch(average, &reading),
            score,
            average,
            trend: self.trend(),
        }
    }

    fn should_switch(&self, average: f64, latest: &QualityReading) -> bool {
        if !self.settings.auto_switch || self.samples.len() < MIN_SAMPLES_FOR_SWITCH {
            return false;
        }
        average < self.settings.min_quality
            || latest.document_detected == Some(false)
            || latest.blur.is_some_and(|b| b > BLUR_SWITCH_THRESHOLD)
    }

    /// Mean score of the readings currently in the window.
    pub fn average_quality(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.score).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Compare the oldest and newest scores in the window.
    pub fn trend(&self) -> QualityTrend {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return QualityTrend::Stable;
        };
        let delta = last.score - first.score;
        if delta > TREND_DEADBAND {
            QualityTrend::Improving
        } else if delta < -TREND_DEADBAND {
            QualityTrend::Declining
        } else {
            QualityTrend::Stable
        }
    }

    /// Most recent normalised reading, if any.
    pub fn latest(&self) -> Option<QualityReading> {
        self.samples.back().map(|s| s.reading)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for QualityWindow {
    fn default() -> Self {
        Self::new(QualitySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::types::{DetailedQuality, SimpleQuality};

    fn simple(blur: f64, brightness: f64, document_detected: bool) -> QualityInput {
        QualityInput::Simple(SimpleQuality {
            blur,
            brightness,
            document_detected,
        })
    }

    fn detailed(blur: f64, alignment: f64) -> QualityInput {
        QualityInput::Detailed(DetailedQuality {
            blur: Some(blur),
            alignment: Some(alignment),
            ..Default::default()
        })
    }

    #[test]
    fn score_weights_present_components() {
        let perfect = QualityReading::from(simple(0.0, 1.0, true));
        assert!((score(&perfect) - 1.0).abs() < 1e-9);

        let blur_only = QualityReading {
            blur: Some(0.2),
            ..Default::default()
        };
        assert!((score(&blur_only) - 0.8).abs() < 1e-9);

        let mixed = QualityReading::from(simple(1.0, 1.0, false));
        // (0 * 0.3 + 1 * 0.25 + 0 * 0.25) / 0.8
        assert!((score(&mixed) - 0.3125).abs() < 1e-9);
    }

    #[test]
    fn reading_without_scored_components_is_neutral() {
        let glare_only = QualityReading {
            glare: Some(0.9),
            ..Default::default()
        };
        assert_eq!(score(&glare_only), NEUTRAL_SCORE);
    }

    #[tokio::test(start_paused = true)]
    async fn fewer_than_three_readings_never_switch() {
        let mut window = QualityWindow::default();
        assert!(!window.observe(detailed(0.9, 0.1)).should_switch);
        assert!(!window.observe(detailed(0.9, 0.1)).should_switch);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_blur_and_misalignment_switches_by_fifth_reading() {
        let mut window = QualityWindow::default();
        let switched_at = (1..=5).find(|_| window.observe(detailed(0.9, 0.1)).should_switch);
        assert!(matches!(switched_at, Some(n) if n <= 5));
    }

    #[tokio::test(start_paused = true)]
    async fn low_average_alone_switches() {
        let mut window = QualityWindow::default();
        // Blur at the threshold and a dark frame, no detection signal.
        let dark = QualityInput::Detailed(DetailedQuality {
            blur: Some(0.7),
            brightness: Some(0.05),
            ..Default::default()
        });
        for _ in 0..2 {
            assert!(!window.observe(dark).should_switch);
        }
        let assessment = window.observe(dark);
        assert!(assessment.average < 0.4);
        assert!(assessment.should_switch);
    }

    #[tokio::test(start_paused = true)]
    async fn good_frames_do_not_switch() {
        let mut window = QualityWindow::default();
        for _ in 0..10 {
            let assessment = window.observe(simple(0.1, 0.8, true));
            assert!(!assessment.should_switch);
        }
        assert_eq!(window.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_switch_disabled_never_switches() {
        let mut window = QualityWindow::new(QualitySettings {
            auto_switch: false,
            ..Default::default()
        });
        for _ in 0..5 {
            assert!(!window.observe(detailed(0.9, 0.1)).should_switch);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_capped() {
        let mut window = QualityWindow::new(QualitySettings {
            max_samples: 4,
            ..Default::default()
        });
        for _ in 0..9 {
            window.observe(simple(0.1, 0.8, true));
        }
        assert_eq!(window.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_samples_are_evicted() {
        let mut window = QualityWindow::default();
        let start = Instant::now();
        window.observe_at(detailed(0.9, 0.1), start);
        window.observe_at(detailed(0.9, 0.1), start + Duration::from_millis(100));

        // Both earlier readings fall outside the 2000 ms window.
        let assessment = window.observe_at(detailed(0.9, 0.1), start + Duration::from_millis(2500));
        assert_eq!(window.len(), 1);
        assert!(!assessment.should_switch);
    }

    #[tokio::test(start_paused = true)]
    async fn trend_uses_deadband() {
        let mut window = QualityWindow::default();
        window.observe(simple(0.9, 0.2, false));
        window.observe(simple(0.1, 0.9, true));
        assert_eq!(window.trend(), QualityTrend::Improving);

        window.clear();
        window.observe(simple(0.2, 0.7, true));
        window.observe(simple(0.25, 0.7, true));
        assert_eq!(window.trend(), QualityTrend::Stable);

        window.observe(simple(0.9, 0.2, false));
        assert_eq!(window.trend(), QualityTrend::Declining);
    }

    #[test]
    fn empty_window_has_no_average() {
        let window = QualityWindow::default();
        assert_eq!(window.average_quality(), None);
        assert_eq!(window.trend(), QualityTrend::Stable);
        assert!(window.latest().is_none());
    }
}
