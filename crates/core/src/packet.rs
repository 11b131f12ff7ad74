// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task packets as received from the coordinator.
//!
//! Coordinators differ in where they put the identity fields: some nest
//! them under a `task` sub-object, some keep them at the top level. Every
//! lookup tries the nested location first and falls back to top level.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Packet-shape errors. A claim that yields a malformed packet is terminal
/// for the task (completed as failed), never fatal for the runner.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet has no taskId")]
    MissingTaskId,
}

/// Pre-rendered prompt, when the coordinator supplies one.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PromptSpec {
    pub rendered: Option<String>,
    pub backend: Option<String>,
}

/// Fallback prompt synthesis inputs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PromptPlan {
    pub template: Option<String>,
    pub vars: Option<Value>,
}

/// Execution preferences carried in the packet.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionSpec {
    pub backend: Option<String>,
    /// Backend-specific model id, `provider/model` for the local backend
    pub model: Option<String>,
    pub timeout_sec: Option<u64>,
    /// JSON-schema source text; successful output must validate against it
    pub output_schema_json: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
}

/// Server policy for the task.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySpec {
    pub heartbeat_required: bool,
    pub task_timeout_seconds: Option<u64>,
}

impl Default for PolicySpec {
    fn default() -> Self {
        Self { heartbeat_required: true, task_timeout_seconds: None }
    }
}

/// Immutable task descriptor handed to the executor.
#[derive(Debug, Clone)]
pub struct TaskPacket {
    raw: Value,
    pub task_id: String,
    pub task_type: String,
    pub stream_id: Option<String>,
    pub thread_id: Option<String>,
    pub goal: Option<String>,
    pub input: Option<Value>,
    pub prompt: PromptSpec,
    pub prompt_plan: PromptPlan,
    pub context: Option<Value>,
    pub execution: ExecutionSpec,
    pub policy: PolicySpec,
}

/// Nested-first lookup: `raw.task.key`, falling back to `raw.key`.
fn pick<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get("task").and_then(|t| t.get(key)).or_else(|| raw.get(key))
}

fn pick_str(raw: &Value, key: &str) -> Option<String> {
    pick(raw, key).and_then(Value::as_str).map(str::to_string)
}

/// Deserialize a sub-structure leniently: a missing or malformed section
/// yields the default rather than rejecting the whole packet.
fn pick_section<T: Default + for<'de> Deserialize<'de>>(raw: &Value, key: &str) -> T {
    pick(raw, key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

impl TaskPacket {
    /// Parse a packet from the coordinator's JSON.
    ///
    /// Only `taskId` is required; everything else defaults.
    pub fn parse(raw: Value) -> Result<Self, PacketError> {
        let task_id = pick_str(&raw, "taskId")
            .filter(|id| !id.is_empty())
            .ok_or(PacketError::MissingTaskId)?;

        Ok(Self {
            task_id,
            task_type: pick_str(&raw, "type").unwrap_or_default(),
            stream_id: pick_str(&raw, "streamId"),
            thread_id: pick_str(&raw, "threadId"),
            goal: pick_str(&raw, "goal"),
            input: pick(&raw, "input").cloned(),
            prompt: pick_section(&raw, "prompt"),
            prompt_plan: pick_section(&raw, "promptPlan"),
            context: pick(&raw, "context").cloned(),
            execution: pick_section(&raw, "execution"),
            policy: pick_section(&raw, "policy"),
            raw,
        })
    }

    /// The original JSON as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Identity-and-context view of the task, used for prompt synthesis.
    pub fn task_shape(&self) -> Value {
        let mut shape = serde_json::Map::new();
        shape.insert("taskId".to_string(), Value::String(self.task_id.clone()));
        if !self.task_type.is_empty() {
            shape.insert("type".to_string(), Value::String(self.task_type.clone()));
        }
        if let Some(ref s) = self.stream_id {
            shape.insert("streamId".to_string(), Value::String(s.clone()));
        }
        if let Some(ref t) = self.thread_id {
            shape.insert("threadId".to_string(), Value::String(t.clone()));
        }
        if let Some(ref g) = self.goal {
            shape.insert("goal".to_string(), Value::String(g.clone()));
        }
        if let Some(ref i) = self.input {
            shape.insert("input".to_string(), i.clone());
        }
        Value::Object(shape)
    }

    /// Per-task timeout in seconds: `execution.timeoutSec`, then
    /// `policy.taskTimeoutSeconds`, then the hard default of 600.
    pub fn timeout_sec(&self) -> u64 {
        self.execution
            .timeout_sec
            .or(self.policy.task_timeout_seconds)
            .unwrap_or(600)
    }
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod tests;
