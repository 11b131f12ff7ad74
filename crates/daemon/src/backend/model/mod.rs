// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local model backend - in-process model-session driver.
//!
//! Accepts a `provider/model` reference, resolves credentials from the
//! provider's storage file, streams text deltas from a session, and maps
//! the terminal stop reason onto a task status. Successful output is
//! optionally validated against the packet's JSON schema.

mod auth;
mod schema;
mod session;

pub use auth::{requires_api_key, CredentialStore, ProviderCredentials};
pub use schema::validate_output;
pub use session::{
    ModelSession, SessionDriver, SessionEnd, SessionEvent, SessionSpec, SessionUsage, SseDriver,
};

use async_trait::async_trait;
use flux_core::{TaskStatus, EMPTY_OUTPUT};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, ExecuteOutcome, ExecuteRequest};

/// The local model backend, generic over the session driver so tests can
/// script sessions.
pub struct ModelBackend<D: SessionDriver> {
    driver: D,
}

impl<D: SessionDriver> ModelBackend<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Registration preflight: the driver can produce sessions (e.g.
    /// credentials exist for the configured provider).
    pub fn preflight(&self) -> Result<(), BackendError> {
        self.driver.preflight()
    }
}

/// Split a `provider/model` reference.
fn split_model_ref(model: &str) -> Option<(&str, &str)> {
    let (provider, model) = model.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

#[async_trait]
impl<D: SessionDriver> Backend for ModelBackend<D> {
    fn id(&self) -> &'static str {
        "pi"
    }

    fn can_execute(&self, backend: &str) -> bool {
        backend == "pi"
    }

    async fn execute(
        &self,
        req: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, BackendError> {
        let model_ref = req
            .packet
            .execution
            .model
            .as_deref()
            .ok_or_else(|| BackendError::Session("packet names no model".to_string()))?;
        let (provider, model) = split_model_ref(model_ref).ok_or_else(|| {
            BackendError::Session(format!("model reference is not provider/model: {model_ref}"))
        })?;

        let spec = SessionSpec {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt: req.prompt.clone(),
        };
        let mut session = self.driver.start(spec).await?;

        let mut text = String::new();
        let mut end: Option<SessionEnd> = None;
        let mut timed_out = false;
        let mut externally_cancelled = false;

        let deadline = tokio::time::sleep(req.timeout);
        tokio::pin!(deadline);

        enum Turn {
            Cancelled,
            Deadline,
            Event(Option<SessionEvent>),
        }

        loop {
            let turn = tokio::select! {
                _ = cancel.cancelled(), if !externally_cancelled && !timed_out => Turn::Cancelled,
                _ = &mut deadline, if !timed_out && !externally_cancelled => Turn::Deadline,
                event = session.next_event() => Turn::Event(event),
            };
            match turn {
                Turn::Cancelled => {
                    tracing::info!(task_id = %req.packet.task_id, "model: cancel requested, aborting session");
                    externally_cancelled = true;
                    session.abort();
                }
                Turn::Deadline => {
                    tracing::warn!(task_id = %req.packet.task_id, "model: deadline reached, aborting session");
                    timed_out = true;
                    session.abort();
                }
                Turn::Event(Some(SessionEvent::TextDelta(delta))) => text.push_str(&delta),
                Turn::Event(Some(SessionEvent::Completed(session_end))) => {
                    end = Some(session_end);
                    break;
                }
                Turn::Event(None) => break,
            }
        }

        let end = end.unwrap_or_else(|| SessionEnd::with_reason("end"));

        if timed_out {
            return Ok(ExecuteOutcome::failed(format!(
                "timed out after {}ms",
                req.timeout.as_millis()
            )));
        }
        if externally_cancelled || end.stop_reason == "aborted" {
            return Ok(ExecuteOutcome::cancelled());
        }

        // Output fallback chain: stream text, then the session's last
        // assistant message, then the placeholder.
        let output = if !text.trim().is_empty() {
            text
        } else {
            end.last_assistant_text.clone().filter(|t| !t.trim().is_empty()).unwrap_or_else(
                || EMPTY_OUTPUT.to_string(),
            )
        };

        let mut outcome = ExecuteOutcome {
            status: if end.stop_reason == "error" { TaskStatus::Failed } else { TaskStatus::Done },
            output,
            tokens_used: end.usage.total_tokens,
            cost_usd: end.usage.cost_total,
        };

        if outcome.status == TaskStatus::Done {
            if let Some(ref schema_json) = req.packet.execution.output_schema_json {
                if let Err(summary) = validate_output(schema_json, &outcome.output) {
                    tracing::warn!(task_id = %req.packet.task_id, %summary, "model: schema validation failed");
                    outcome = ExecuteOutcome::failed(summary);
                }
            }
        }

        Ok(outcome.with_nonempty_output())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
