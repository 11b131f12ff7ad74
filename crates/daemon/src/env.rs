// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve the state directory: `FLUX_STATE_DIR` > `~/.flux`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLUX_STATE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".flux")
}

/// Heartbeat cadence (default 30 s, configurable via `FLUX_HEARTBEAT_MS`;
/// the executor applies a 10 s floor).
pub fn heartbeat_interval() -> Duration {
    std::env::var("FLUX_HEARTBEAT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Shutdown drain grace (default 30 s, configurable via
/// `FLUX_DRAIN_GRACE_MS`).
pub fn drain_grace() -> Duration {
    std::env::var("FLUX_DRAIN_GRACE_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Subprocess backends are registered unless `FLUX_SUBPROCESS_BACKENDS`
/// is "0" or "false".
pub fn subprocess_backends_enabled() -> bool {
    !matches!(
        std::env::var("FLUX_SUBPROCESS_BACKENDS").as_deref(),
        Ok("0") | Ok("false")
    )
}
