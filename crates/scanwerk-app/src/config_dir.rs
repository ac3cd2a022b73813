// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resolve and manage the engine settings file.
//
// Linux/macOS: $XDG_CONFIG_HOME/scanwerk or ~/.config/scanwerk
// Fallback: the system temp directory

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::Result;

const APP_DIR: &str = "scanwerk";
const CONFIG_FILE: &str = "engine.json";

/// Directory holding the engine settings, created if missing.
pub fn config_dir() -> PathBuf {
    let dir = resolve_base(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
    .join(APP_DIR);
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default location of the engine settings file.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

fn resolve_base(xdg: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    xdg.filter(|p| p.is_absolute())
        .or_else(|| home.map(|h| h.join(".config")))
        .unwrap_or_else(std::env::temp_dir)
}

/// Load settings from `path`, falling back to defaults when the file is
/// missing or unusable.
pub fn load_config(path: &Path) -> EngineConfig {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return EngineConfig::default();
    }
    match EngineConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring settings file");
            EngineConfig::default()
        }
    }
}

/// Write `config` to `path`, creating parent directories.
pub fn persist_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(path)
}
