// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk: Core types, errors, configuration and event payloads shared
// across all crates.

pub mod config;
pub mod error;
pub mod events;
pub mod human_errors;
pub mod types;

pub use config::{EngineConfig, TimingBudget};
pub use error::{ErrorKind, FailureKind, Result, ScanError};
pub use events::{EventSink, ScanEvent};
pub use types::*;
