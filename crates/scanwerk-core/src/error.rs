// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification reported by a reader when it cannot produce license data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Payload was read but is not a recognised document layout.
    BadFormat,
    /// No barcode or text region was found in the frame.
    NotFound,
    /// Frame was too blurry, dark, or misaligned to read.
    PoorQuality,
    /// Symbol was located but could not be decoded.
    DecodeError,
    /// Anything the reader could not classify.
    Unclassified,
}

impl FailureKind {
    /// Failure kinds that make an automatic-mode session eligible for the
    /// text fallback regardless of elapsed time.
    pub const FALLBACK_ELIGIBLE: [FailureKind; 4] = [
        FailureKind::BadFormat,
        FailureKind::NotFound,
        FailureKind::PoorQuality,
        FailureKind::DecodeError,
    ];

    pub fn is_fallback_eligible(&self) -> bool {
        Self::FALLBACK_ELIGIBLE.contains(self)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BadFormat => "bad_format",
            Self::NotFound => "not_found",
            Self::PoorQuality => "poor_quality",
            Self::DecodeError => "decode_error",
            Self::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// Machine-readable kind carried by every [`ScanError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Operation(FailureKind),
    Timeout,
    Transition,
    InvalidInput,
    Cancelled,
    Config,
    Io,
    Serialization,
    Internal,
}

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Reader failures --
    #[error("{kind} reader failure: {message}")]
    Operation { kind: FailureKind, message: String },

    #[error("operation exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },

    #[error("strategy transition failed: {0}")]
    Transition(String),

    // -- Caller errors --
    #[error("input does not match requested strategy: {0}")]
    InvalidInput(String),

    #[error("scan session cancelled")]
    Cancelled,

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Shorthand for a classified reader failure.
    pub fn operation(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Operation {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Operation { kind, .. } => ErrorKind::Operation(*kind),
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transition(_) => ErrorKind::Transition,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The reader failure kind, if this error came from a reader.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Operation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether offering the user another attempt makes sense.
    ///
    /// Timeouts and capture-quality problems are recoverable; malformed input
    /// and internal invariant violations are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Operation { kind, .. } => *kind != FailureKind::BadFormat,
            Self::Timeout { .. } | Self::Transition(_) | Self::Cancelled | Self::Io(_) => true,
            Self::InvalidInput(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Internal(_) => false,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;
