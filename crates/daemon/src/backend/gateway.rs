// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway backend - executes tasks against a remote agent over the
//! gateway WebSocket client.
//!
//! The main design responsibility here is session-key derivation, which
//! groups related tasks into stable conversation contexts on the remote
//! side.

use async_trait::async_trait;
use flux_core::{TaskPacket, TaskStatus};
use flux_gateway::{AgentRequest, GatewayClient};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, ExecuteOutcome, ExecuteRequest};

/// Backend id, also used by the executor's escalation rule.
pub const GATEWAY_BACKEND_ID: &str = "gateway";

/// Remote agent used when none is configured.
const DEFAULT_AGENT_ID: &str = "main";

pub struct GatewayBackend {
    client: GatewayClient,
    org_id: String,
    agent_id: String,
}

impl GatewayBackend {
    pub fn new(client: GatewayClient, org_id: impl Into<String>, agent_id: Option<String>) -> Self {
        Self {
            client,
            org_id: org_id.into(),
            agent_id: agent_id
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string()),
        }
    }
}

/// Pull `cadenceKey` out of `task.input`, which may be a JSON object or
/// a string of JSON. Absent or unparseable input falls back to "tick".
fn cadence_key(input: Option<&Value>) -> String {
    let parsed;
    let object = match input {
        Some(Value::Object(map)) => Some(map),
        Some(Value::String(text)) => {
            parsed = serde_json::from_str::<Value>(text).ok();
            parsed.as_ref().and_then(Value::as_object)
        }
        _ => None,
    };
    object
        .and_then(|map| map.get("cadenceKey"))
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "tick".to_string())
}

/// Derive the stable conversation key for a task.
pub(crate) fn derive_session_key(agent_id: &str, org_id: &str, packet: &TaskPacket) -> String {
    let stream = packet.stream_id.as_deref().unwrap_or("unknown-stream");
    let base = format!("agent:{agent_id}:flux:org:{org_id}:stream:{stream}");
    match packet.task_type.as_str() {
        "conductor-chat" => {
            let thread = packet.thread_id.as_deref().unwrap_or("main");
            format!("{base}:thread:{thread}")
        }
        "cadence" => {
            format!("{base}:cadence:{}", cadence_key(packet.input.as_ref()))
        }
        _ => format!("{base}:task"),
    }
}

#[async_trait]
impl Backend for GatewayBackend {
    fn id(&self) -> &'static str {
        GATEWAY_BACKEND_ID
    }

    fn can_execute(&self, backend: &str) -> bool {
        backend == GATEWAY_BACKEND_ID
    }

    async fn execute(
        &self,
        req: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, BackendError> {
        let session_key = derive_session_key(&self.agent_id, &self.org_id, &req.packet);
        tracing::info!(task_id = %req.packet.task_id, %session_key, "gateway: dispatching");

        let mut agent_req = AgentRequest::new(
            req.prompt.clone(),
            session_key,
            self.agent_id.clone(),
            req.timeout.as_secs(),
        );
        agent_req.thread_id = req.packet.thread_id.clone();

        // Race the pending request against the cancel signal; the gateway
        // side keeps running, but this task settles as cancelled.
        let result = tokio::select! {
            result = self.client.agent(agent_req) => result,
            _ = cancel.cancelled() => {
                tracing::info!(task_id = %req.packet.task_id, "gateway: cancelled while pending");
                return Ok(ExecuteOutcome::cancelled());
            }
        };

        match result {
            Ok(reply) => {
                let outcome = ExecuteOutcome {
                    status: if reply.has_error() { TaskStatus::Failed } else { TaskStatus::Done },
                    output: reply.joined_text(),
                    tokens_used: reply.total_tokens(),
                    cost_usd: None,
                };
                Ok(outcome.with_nonempty_output())
            }
            Err(flux_gateway::GatewayError::Remote(msg))
                if msg.to_ascii_lowercase().contains("aborted") =>
            {
                Ok(ExecuteOutcome::cancelled())
            }
            Err(e) => Err(BackendError::Gateway(e)),
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
