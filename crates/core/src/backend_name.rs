// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend name normalisation and selection precedence.

use crate::packet::TaskPacket;

/// Backend used when neither the packet nor the runner names one.
pub const DEFAULT_BACKEND: &str = "claude-cli";

/// Normalise a backend name: lowercase, trimmed, aliases collapsed.
pub fn normalize_backend(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "claude" | "claude-code" => "claude-cli".to_string(),
        "codex" => "codex-cli".to_string(),
        "pi" => "pi".to_string(),
        _ => lower,
    }
}

/// Resolve the backend a packet should run on.
///
/// Precedence: `execution.backend` > `prompt.backend` > runner default >
/// [`DEFAULT_BACKEND`]. The winner is normalised.
pub fn preferred_backend(packet: &TaskPacket, runner_default: Option<&str>) -> String {
    let name = packet
        .execution
        .backend
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(packet.prompt.backend.as_deref().filter(|s| !s.trim().is_empty()))
        .or(runner_default.filter(|s| !s.trim().is_empty()))
        .unwrap_or(DEFAULT_BACKEND);
    normalize_backend(name)
}

#[cfg(test)]
#[path = "backend_name_tests.rs"]
mod tests;
