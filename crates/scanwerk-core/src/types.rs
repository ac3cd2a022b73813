// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scan engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Strategies and states
// ---------------------------------------------------------------------------

/// Strategy requested by the caller for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Barcode reader only.
    Structured,
    /// Text recognition only.
    Text,
    /// Barcode first, text recognition as fallback.
    Automatic,
}

impl std::str::FromStr for ScanStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "barcode" => Ok(Self::Structured),
            "text" | "ocr" => Ok(Self::Text),
            "automatic" | "auto" => Ok(Self::Automatic),
            other => Err(format!("unknown strategy `{other}`")),
        }
    }
}

/// One of the two external readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderKind {
    Structured,
    Text,
}

impl ReaderKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structured => "barcode",
            Self::Text => "text recognition",
        }
    }
}

/// Top-level session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    StructuredActive,
    TextActive,
    Transitioning,
    Completed,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a session is currently occupying the engine.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::StructuredActive | Self::TextActive | Self::Transitioning
        )
    }
}

/// Auto-mode sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoModeState {
    InitialStructured,
    StructuredTimeoutWarning,
    SwitchingToText,
    TextActive,
    Success,
}

impl AutoModeState {
    /// Position in the forward-only ordering; `Success` is reachable from any state.
    pub fn rank(&self) -> u8 {
        match self {
            Self::InitialStructured => 0,
            Self::StructuredTimeoutWarning => 1,
            Self::SwitchingToText => 2,
            Self::TextActive => 3,
            Self::Success => 4,
        }
    }

    pub fn can_advance_to(&self, next: AutoModeState) -> bool {
        if *self == Self::Success {
            return false;
        }
        next == Self::Success || next.rank() > self.rank()
    }
}

/// Why a session abandoned the barcode reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Failure,
    Quality,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Failure => "failure",
            Self::Quality => "quality",
        })
    }
}

/// Direction of recent quality readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Declining,
    Stable,
}

/// Classification of errors for retry and UI decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, blur, missed frame: safe to retry automatically.
    Transient,
    /// User must do something (hold still, add light, flip the card).
    UserAction,
    /// Permanent failure: unsupported document, bad input.
    Permanent,
}

// ---------------------------------------------------------------------------
// Reader inputs and outputs
// ---------------------------------------------------------------------------

/// Axis-aligned box in normalised image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One recognised line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextObservation {
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

impl TextObservation {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box: BoundingBox::default(),
        }
    }
}

/// What the caller hands to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInput {
    /// Raw barcode payload, if one was captured.
    pub payload: Option<String>,
    /// Text observations, used directly in text mode and for the fallback.
    pub observations: Vec<TextObservation>,
}

impl ScanInput {
    pub fn payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            observations: Vec::new(),
        }
    }

    pub fn observations(observations: Vec<TextObservation>) -> Self {
        Self {
            payload: None,
            observations,
        }
    }

    pub fn with_observations(mut self, observations: Vec<TextObservation>) -> Self {
        self.observations = observations;
        self
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn has_observations(&self) -> bool {
        !self.observations.is_empty()
    }
}

/// Fields extracted from a driver license or ID card.
///
/// Every field is optional; readers fill what they can and the confidence
/// calculation checks presence explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseData {
    pub document_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub jurisdiction: Option<String>,
    /// Reader-reported confidence in [0, 1], if the reader has one.
    pub reader_confidence: Option<f64>,
}

impl LicenseData {
    /// Weighted field-presence score, scaled by the reader's own confidence.
    ///
    /// Returns `None` when no field at all was extracted.
    pub fn confidence(&self) -> Option<f64> {
        fn present(field: &Option<String>) -> bool {
            field.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        let weights = [
            (present(&self.document_number), 0.25),
            (present(&self.last_name), 0.15),
            (present(&self.first_name), 0.15),
            (self.date_of_birth.is_some(), 0.15),
            (self.expiry_date.is_some(), 0.10),
            (present(&self.address), 0.10),
            (self.issue_date.is_some(), 0.05),
            (present(&self.jurisdiction), 0.05),
        ];

        if weights.iter().all(|(p, _)| !p) {
            return None;
        }

        let coverage: f64 = weights.iter().filter(|(p, _)| *p).map(|(_, w)| w).sum();
        let reader = self.reader_confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        Some((coverage * reader).clamp(0.0, 1.0))
    }
}

// ---------------------------------------------------------------------------
// Quality readings
// ---------------------------------------------------------------------------

/// Coarse per-frame metrics from a simple detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleQuality {
    /// Blur magnitude in [0, 1]; higher is blurrier.
    pub blur: f64,
    /// Mean brightness in [0, 1].
    pub brightness: f64,
    pub document_detected: bool,
}

/// Per-frame metrics from a detailed analyser; any component may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailedQuality {
    pub blur: Option<f64>,
    pub brightness: Option<f64>,
    pub glare: Option<f64>,
    /// Document alignment score in [0, 1].
    pub alignment: Option<f64>,
}

/// Either shape a quality source may push.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum QualityInput {
    Simple(SimpleQuality),
    Detailed(DetailedQuality),
}

/// Alignment at or above which a detailed reading counts as "document detected".
pub const ALIGNMENT_DETECTED_THRESHOLD: f64 = 0.5;

/// Normalised quality observation consumed by the quality window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityReading {
    pub blur: Option<f64>,
    pub brightness: Option<f64>,
    pub glare: Option<f64>,
    pub alignment: Option<f64>,
    pub document_detected: Option<bool>,
}

impl From<QualityInput> for QualityReading {
    fn from(input: QualityInput) -> Self {
        let unit = |v: f64| v.clamp(0.0, 1.0);
        match input {
            QualityInput::Simple(q) => Self {
                blur: Some(unit(q.blur)),
                brightness: Some(unit(q.brightness)),
                glare: None,
                alignment: None,
                document_detected: Some(q.document_detected),
            },
            QualityInput::Detailed(q) => {
                let alignment = q.alignment.map(unit);
                Self {
                    blur: q.blur.map(unit),
                    brightness: q.brightness.map(unit),
                    glare: q.glare.map(unit),
                    alignment,
                    document_detected: alignment.map(|a| a >= ALIGNMENT_DETECTED_THRESHOLD),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Performance reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Timeout,
    Transition,
    Memory,
    Cpu,
}

/// A budget violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub threshold: f64,
    pub observed: f64,
}

/// Pass/fail for each service-level objective of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SloFlags {
    pub structured_within_budget: bool,
    pub text_within_budget: bool,
    pub total_within_budget: bool,
    pub memory_within_budget: bool,
    pub cpu_within_budget: bool,
}

impl SloFlags {
    pub fn all_met(&self) -> bool {
        self.structured_within_budget
            && self.text_within_budget
            && self.total_within_budget
            && self.memory_within_budget
            && self.cpu_within_budget
    }
}

/// Measurements for one finished session. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub strategy: ScanStrategy,
    pub total_ms: u64,
    pub structured_ms: Option<u64>,
    pub text_ms: Option<u64>,
    pub transition_ms: Option<u64>,
    pub peak_memory_bytes: u64,
    pub memory_delta_bytes: i64,
    pub peak_cpu_percent: f32,
    pub slo: SloFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mode_is_forward_only() {
        use AutoModeState::*;
        assert!(InitialStructured.can_advance_to(StructuredTimeoutWarning));
        assert!(InitialStructured.can_advance_to(SwitchingToText));
        assert!(!SwitchingToText.can_advance_to(InitialStructured));
        assert!(!TextActive.can_advance_to(SwitchingToText));
        assert!(TextActive.can_advance_to(Success));
        assert!(!Success.can_advance_to(Success));
        assert!(!Success.can_advance_to(TextActive));
    }

    #[test]
    fn detailed_quality_derives_detection_from_alignment() {
        let reading: QualityReading = QualityInput::Detailed(DetailedQuality {
            blur: Some(0.9),
            alignment: Some(0.1),
            ..Default::default()
        })
        .into();
        assert_eq!(reading.document_detected, Some(false));
        assert_eq!(reading.brightness, None);

        let reading: QualityReading = QualityInput::Detailed(DetailedQuality::default()).into();
        assert_eq!(reading.document_detected, None);
    }

    #[test]
    fn simple_quality_is_clamped() {
        let reading: QualityReading = QualityInput::Simple(SimpleQuality {
            blur: 1.7,
            brightness: -0.2,
            document_detected: true,
        })
        .into();
        assert_eq!(reading.blur, Some(1.0));
        assert_eq!(reading.brightness, Some(0.0));
        assert_eq!(reading.document_detected, Some(true));
    }

    #[test]
    fn confidence_requires_some_field() {
        assert_eq!(LicenseData::default().confidence(), None);

        let blank = LicenseData {
            first_name: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.confidence(), None);
    }

    #[test]
    fn confidence_scales_with_coverage_and_reader() {
        let partial = LicenseData {
            document_number: Some("D1234567".into()),
            last_name: Some("RIVERA".into()),
            ..Default::default()
        };
        let c = partial.confidence().unwrap();
        assert!((c - 0.40).abs() < 1e-9);

        let full = LicenseData {
            document_number: Some("D1234567".into()),
            first_name: Some("ANA".into()),
            last_name: Some("RIVERA".into()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 2),
            issue_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            expiry_date: NaiveDate::from_ymd_opt(2028, 4, 2),
            address: Some("1 MAIN ST".into()),
            jurisdiction: Some("CA".into()),
            reader_confidence: Some(0.8),
        };
        let c = full.confidence().unwrap();
        assert!((c - 0.8).abs() < 1e-9);
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("auto".parse::<ScanStrategy>().unwrap(), ScanStrategy::Automatic);
        assert_eq!("OCR".parse::<ScanStrategy>().unwrap(), ScanStrategy::Text);
        assert!("fax".parse::<ScanStrategy>().is_err());
    }

    #[test]
    fn scan_state_liveness() {
        assert!(ScanState::Transitioning.is_live());
        assert!(!ScanState::Idle.is_live());
        assert!(ScanState::Failed.is_terminal());
    }
}
