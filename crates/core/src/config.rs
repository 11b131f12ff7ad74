// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner configuration, loaded once at startup and immutable thereafter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("coordinator URL is empty")]
    EmptyBaseUrl,

    #[error("bearer token is empty")]
    EmptyToken,

    #[error("polling cadence must be at least 1 minute (got {0})")]
    CadenceTooSmall(u64),

    #[error("push reconnect base delay must be at least 250ms (got {0})")]
    ReconnectTooSmall(u64),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Optional task-list filters forwarded to the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_class: Option<String>,
}

impl TaskFilters {
    pub fn is_empty(&self) -> bool {
        self.stream_id.is_none() && self.backend.is_none() && self.cost_class.is_none()
    }
}

/// Gateway connection settings. Present only when the gateway backend is
/// configured for this runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway (`ws://` or `wss://`)
    pub url: String,
    /// Shared token, used when no cached device token exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared password, sent alongside the token when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Remote agent to execute against (defaults to "main")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Process-wide runner configuration.
///
/// Loaded once at startup; every component holds an immutable reference.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Coordinator base URL, trailing slashes stripped by the wire client
    pub base_url: String,
    /// Bearer token for the coordinator REST API
    pub token: String,
    /// Organization the runner belongs to
    pub org_id: String,
    /// Runner type reported in the handshake (e.g. "flux-runner")
    pub runner_type: String,
    /// Runner version reported in the handshake
    pub runner_version: String,
    /// Random per-process instance id
    pub runner_instance_id: String,
    /// Stable machine identifier (hostname by default)
    pub machine_id: String,
    /// Polling cadence in minutes (>= 1)
    pub cadence_minutes: u64,
    /// Push client reconnect base delay in milliseconds (>= 250)
    pub push_reconnect_ms: u64,
    /// Default backend when a packet names none
    pub default_backend: Option<String>,
    /// Task-list filters
    pub filters: TaskFilters,
    /// Gateway settings (enables the gateway backend)
    pub gateway: Option<GatewayConfig>,
}

impl RunnerConfig {
    /// Construct a config with library defaults for everything except the
    /// coordinator coordinates. The instance id is freshly generated.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            org_id: org_id.into(),
            runner_type: "flux-runner".to_string(),
            runner_version: env!("CARGO_PKG_VERSION").to_string(),
            runner_instance_id: uuid::Uuid::new_v4().to_string(),
            machine_id: String::new(),
            cadence_minutes: 5,
            push_reconnect_ms: 1000,
            default_backend: None,
            filters: TaskFilters::default(),
            gateway: None,
        }
    }

    /// Enforce the configuration invariants: non-empty coordinates, finite
    /// positive cadence and reconnect delays.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if self.cadence_minutes < 1 {
            return Err(ConfigError::CadenceTooSmall(self.cadence_minutes));
        }
        if self.push_reconnect_ms < 250 {
            return Err(ConfigError::ReconnectTooSmall(self.push_reconnect_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
