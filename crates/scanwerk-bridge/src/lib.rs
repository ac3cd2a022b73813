// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk Bridge: collaborator abstractions for the barcode reader, the
// text recogniser and the frame-quality feed, plus scripted implementations
// for desktop and CI builds where no camera is available.

pub mod simulated;
pub mod traits;

pub use simulated::{ChannelQualitySource, Outcome, ScriptedReader};
pub use traits::{QualitySource, StructuredReader, TextReader};
