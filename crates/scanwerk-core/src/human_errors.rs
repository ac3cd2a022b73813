// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the capture screen.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The severity drives whether the UI offers a "Try again" button.

use crate::error::{FailureKind, ScanError};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Timeout, glare, a missed frame: trying again usually works.
    Transient,
    /// User must do something (hold still, flip the card, add light).
    ActionRequired,
    /// Cannot be fixed by retrying: unsupported document, bad input.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the UI should offer a retry affordance.
    pub retriable: bool,
    /// Severity level (drives icon/colour in UI).
    pub severity: Severity,
}

/// Convert a `ScanError` into a `HumanError` suitable for the capture screen.
pub fn humanize_error(err: &ScanError) -> HumanError {
    let retriable = err.is_recoverable();
    match err {
        ScanError::Operation { kind, .. } => humanize_reader_failure(*kind, retriable),

        ScanError::Timeout { .. } => HumanError {
            message: "Reading the card took too long.".into(),
            suggestion: "Hold the card flat and steady inside the frame, then try again.".into(),
            retriable,
            severity: Severity::Transient,
        },

        ScanError::Transition(_) => HumanError {
            message: "We couldn't switch to reading the printed text.".into(),
            suggestion: "Try again. If this keeps happening, restart the scanner.".into(),
            retriable,
            severity: Severity::Transient,
        },

        ScanError::InvalidInput(detail) => HumanError {
            message: "The scanner was started with the wrong kind of input.".into(),
            suggestion: format!("This is a problem in the app, not with your card. ({detail})"),
            retriable,
            severity: Severity::Permanent,
        },

        ScanError::Cancelled => HumanError {
            message: "Scanning was stopped.".into(),
            suggestion: "Start scanning again when you're ready.".into(),
            retriable,
            severity: Severity::Transient,
        },

        ScanError::Config(detail) => HumanError {
            message: "The scanner settings are invalid.".into(),
            suggestion: format!("Reset the scanner settings to their defaults. ({detail})"),
            retriable,
            severity: Severity::Permanent,
        },

        ScanError::Io(_) => HumanError {
            message: "There was a problem reading or writing a file.".into(),
            suggestion: "Try again. If this keeps happening, your device's storage may be full.".into(),
            retriable,
            severity: Severity::Transient,
        },

        ScanError::Serialization(_) | ScanError::Internal(_) => HumanError {
            message: "The scanner had an internal problem.".into(),
            suggestion: "Please report this if it keeps happening.".into(),
            retriable,
            severity: Severity::Permanent,
        },
    }
}

fn humanize_reader_failure(kind: FailureKind, retriable: bool) -> HumanError {
    match kind {
        FailureKind::BadFormat => HumanError {
            message: "This card's barcode isn't in a format we recognise.".into(),
            suggestion: "Check you're scanning the back of a driver license or state ID.".into(),
            retriable,
            severity: Severity::Permanent,
        },
        FailureKind::NotFound => HumanError {
            message: "We couldn't find the card in the picture.".into(),
            suggestion: "Place the whole card inside the frame, on a dark, plain surface.".into(),
            retriable,
            severity: Severity::ActionRequired,
        },
        FailureKind::PoorQuality => HumanError {
            message: "The picture is too blurry or dark.".into(),
            suggestion: "Move somewhere brighter, avoid glare, and hold the camera still.".into(),
            retriable,
            severity: Severity::ActionRequired,
        },
        FailureKind::DecodeError => HumanError {
            message: "We found the barcode but couldn't read it.".into(),
            suggestion: "Wipe the card and try again, or let us read the printed text instead.".into(),
            retriable,
            severity: Severity::Transient,
        },
        FailureKind::Unclassified => HumanError {
            message: "Something went wrong while reading the card.".into(),
            suggestion: "Try again.".into(),
            retriable,
            severity: Severity::Transient,
        },
    }
}
