// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the readers and frame-quality feed.
//
// The engine only sequences these; decoding barcodes, parsing recognised text
// and grabbing camera frames all live behind the traits.

use async_trait::async_trait;

use scanwerk_core::error::Result;
use scanwerk_core::types::{LicenseData, QualityInput, TextObservation};

/// Decode a machine-readable payload (e.g. a PDF417 barcode) into license data.
#[async_trait]
pub trait StructuredReader: Send + Sync {
    /// Parse the payload.
    ///
    /// Failures should be `ScanError::Operation` with a classified
    /// `FailureKind` so the engine can decide whether to fall back.
    async fn read_payload(&self, payload: &str) -> Result<LicenseData>;
}

/// Map recognised text observations onto license fields.
#[async_trait]
pub trait TextReader: Send + Sync {
    /// Prepare the recogniser during a handoff from the barcode reader
    /// (switch camera mode, load models). Timed against the transition ceiling.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    async fn recognize(&self, observations: &[TextObservation]) -> Result<LicenseData>;
}

/// Periodic frame-quality readings during automatic mode.
#[async_trait]
pub trait QualitySource: Send + Sync {
    /// Wait for the next reading. `None` ends the feed.
    ///
    /// Must be cancel-safe: the engine drops this future whenever another
    /// event wins the race, and calls it again later.
    async fn next_reading(&self) -> Option<QualityInput>;
}
