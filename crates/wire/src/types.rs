// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request and response DTOs for the coordinator REST API.

use flux_core::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /whoami` response. Used once at startup to verify credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoamiResponse {
    #[serde(default)]
    pub agent: AgentIdentity,
    #[serde(default)]
    pub server: ServerIdentity,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentIdentity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerIdentity {
    #[serde(default)]
    pub version: String,
}

/// `POST /handshake` request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub runner_type: String,
    pub runner_version: String,
    pub machine_id: String,
    pub runner_instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

/// `POST /handshake` response. `config.push` drives the push-client
/// decision: a WebSocket URL means subscribe, `null` means poll only.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub config: Option<HandshakeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default)]
    pub push: Option<PushConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfig {
    #[serde(default)]
    pub ws_url: Option<String>,
    /// "websocket" or "polling"
    #[serde(default)]
    pub mode: Option<String>,
}

impl HandshakeResponse {
    /// WebSocket URL for push, when the server offers one.
    pub fn push_ws_url(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.push.as_ref())
            .and_then(|p| p.ws_url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// Query for `GET /tasks`.
#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub status: String,
    pub limit: u32,
    pub mode: String,
    pub format: String,
    pub stream_id: Option<String>,
    pub backend: Option<String>,
    pub cost_class: Option<String>,
}

impl TaskQuery {
    /// The drain query: ready tasks in packet format.
    pub fn todo(limit: u32) -> Self {
        Self {
            status: "todo".to_string(),
            limit,
            mode: "compact".to_string(),
            format: "packet".to_string(),
            stream_id: None,
            backend: None,
            cost_class: None,
        }
    }

    /// Key/value pairs for the query string, skipping unset filters.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("status", self.status.clone()),
            ("limit", self.limit.to_string()),
            ("mode", self.mode.clone()),
            ("format", self.format.clone()),
        ];
        if let Some(ref s) = self.stream_id {
            pairs.push(("streamId", s.clone()));
        }
        if let Some(ref b) = self.backend {
            pairs.push(("backend", b.clone()));
        }
        if let Some(ref c) = self.cost_class {
            pairs.push(("costClass", c.clone()));
        }
        pairs
    }
}

/// One page of `GET /tasks`. An absent or non-array `tasks` is no work.
#[derive(Debug, Clone, Default)]
pub struct TaskPage {
    pub tasks: Vec<Value>,
    pub next_poll_seconds: Option<u64>,
}

impl TaskPage {
    /// Defensive extraction: a missing or non-array `tasks` field yields
    /// an empty page rather than an error.
    pub fn from_value(body: &Value) -> Self {
        let tasks = body
            .get("tasks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_poll_seconds = body.get("nextPollSeconds").and_then(Value::as_u64);
        Self { tasks, next_poll_seconds }
    }
}

/// Runner metadata sent with `POST /tasks/{id}/claim`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub runner_instance_id: String,
    pub machine_id: String,
    pub runner_type: String,
    pub runner_version: String,
}

/// A successful claim. The session id correlates heartbeat and complete.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub session_id: String,
    #[serde(default)]
    pub packet: Option<Value>,
}

/// `POST /tasks/{id}/heartbeat` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// `POST /tasks/{id}/heartbeat` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub should_abort: bool,
    #[serde(default)]
    pub cancel_pending: bool,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl HeartbeatResponse {
    /// Whether the server wants this task stopped.
    pub fn wants_abort(&self) -> bool {
        self.should_abort || self.cancel_pending
    }
}

/// `POST /tasks/{id}/complete` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub session_id: String,
    pub status: TaskStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// `POST /tasks/{id}/escalate` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRequest {
    pub session_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
