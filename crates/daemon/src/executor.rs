// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task claim → execute → heartbeat → complete protocol.
//!
//! The executor owns the active session table. For every successful
//! claim exactly one `complete` is sent; `escalate`, when required,
//! follows the failed completion for the same task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use flux_core::{preferred_backend, render_prompt, TaskPacket, TaskStatus, CANCELLED_OUTPUT};
use flux_wire::{
    ClaimRequest, CompleteRequest, Coordinator, EscalateRequest, HeartbeatRequest,
};

use crate::backend::{BackendRegistry, ExecuteOutcome, ExecuteRequest};
use crate::dispatch::DispatchContext;

/// Substrings that mark a gateway error as "needs human approval".
/// Matched case-insensitively against the error message; classification
/// by status code is deliberately not attempted.
pub(crate) const APPROVAL_PATTERNS: &[&str] = &["approval", "operator.approvals", "exec.approval"];

/// Hard ceiling on how long a backend may take to honour a cancel before
/// its future is dropped.
const CANCEL_SETTLE_GRACE: Duration = Duration::from_secs(10);

pub(crate) fn is_approval_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    APPROVAL_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Executor settings fixed at startup.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Runner metadata attached to every claim
    pub claim: ClaimRequest,
    /// Heartbeat cadence (a 10 s floor is applied at use)
    pub heartbeat_interval: Duration,
    /// Backend used when the packet names none
    pub default_backend: Option<String>,
}

struct ActiveSession {
    session_id: String,
    cancel: CancellationToken,
    started: Instant,
}

/// Runs tasks to completion against the backend registry.
pub struct TaskExecutor<C: Coordinator> {
    coordinator: Arc<C>,
    registry: BackendRegistry,
    dispatch: DispatchContext,
    config: ExecutorConfig,
    sessions: Mutex<HashMap<String, ActiveSession>>,
    /// Parent of every per-task cancel token; cancelled on shutdown
    shutdown: CancellationToken,
}

impl<C: Coordinator + 'static> TaskExecutor<C> {
    pub fn new(
        coordinator: Arc<C>,
        registry: BackendRegistry,
        dispatch: DispatchContext,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            coordinator,
            registry,
            dispatch,
            config,
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn dispatch_context(&self) -> &DispatchContext {
        &self.dispatch
    }

    /// Cancel every running backend (shutdown path).
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
        for (task_id, session) in self.sessions.lock().iter() {
            tracing::info!(
                %task_id,
                session_id = %session.session_id,
                elapsed_ms = session.started.elapsed().as_millis() as u64,
                "executor: cancelling active session"
            );
            session.cancel.cancel();
        }
    }

    /// Wait until no session is active, up to `grace`.
    pub async fn wait_idle(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.sessions.lock().is_empty() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = self.sessions.lock().len(),
                    "executor: grace expired with sessions still active"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Claim and run one listed packet. Called sequentially within a
    /// drain; the in-flight marking here is what lets the next drain skip
    /// this task.
    pub async fn dispatch(&self, listed: Value) {
        let Some(task_id) = listed
            .get("task")
            .and_then(|t| t.get("taskId"))
            .or_else(|| listed.get("taskId"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            tracing::warn!("executor: listed task has no taskId, skipping");
            return;
        };

        if !self.dispatch.begin(&task_id) {
            tracing::debug!(%task_id, "executor: task already in flight, skipping");
            return;
        }

        self.run_claimed(&task_id, listed).await;
        self.dispatch.finish(&task_id);
    }

    async fn run_claimed(&self, task_id: &str, listed: Value) {
        // Claim. A 409 means a peer won the race - normal, not an error.
        let claim = match self.coordinator.claim(task_id, &self.config.claim).await {
            Ok(Some(claim)) => claim,
            Ok(None) => {
                tracing::debug!(%task_id, "executor: task claimed by a peer");
                return;
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "executor: claim failed");
                return;
            }
        };
        let session_id = claim.session_id.clone();

        // From here on the claim is ours: exactly one complete follows.
        let cancel = self.shutdown.child_token();
        {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                task_id.to_string(),
                ActiveSession {
                    session_id: session_id.clone(),
                    cancel: cancel.clone(),
                    started: Instant::now(),
                },
            );
        }
        self.dispatch.activate(task_id);

        let started = Instant::now();
        let packet_value = claim.packet.unwrap_or(listed);
        let outcome = match TaskPacket::parse(packet_value) {
            Ok(packet) => self.execute_packet(task_id, &session_id, packet, cancel).await,
            Err(e) => Execution::failed_without_backend(format!("malformed packet: {e}")),
        };

        self.finish_task(task_id, &session_id, started, outcome).await;
        self.sessions.lock().remove(task_id);
    }

    async fn execute_packet(
        &self,
        task_id: &str,
        session_id: &str,
        packet: TaskPacket,
        cancel: CancellationToken,
    ) -> Execution {
        let backend_name = preferred_backend(&packet, self.config.default_backend.as_deref());
        let Some(backend) = self.registry.resolve(&backend_name) else {
            return Execution::failed_without_backend(format!(
                "no backend available for {backend_name}"
            ));
        };
        let backend_id = backend.id();

        let timeout = Duration::from_secs(packet.timeout_sec());
        let prompt = render_prompt(&packet);
        let request = ExecuteRequest {
            packet: packet.clone(),
            prompt,
            backend: backend_name.clone(),
            timeout,
        };

        tracing::info!(%task_id, backend = backend_id, timeout_sec = timeout.as_secs(), "executor: executing");

        // Heartbeat timer; the server can demand cancellation through it
        let heartbeat = if packet.policy.heartbeat_required {
            Some(self.spawn_heartbeat(
                task_id.to_string(),
                session_id.to_string(),
                timeout,
                cancel.clone(),
            ))
        } else {
            tracing::debug!(%task_id, "executor: heartbeat suppressed by policy");
            None
        };

        let exec = backend.execute(request, cancel.clone());
        tokio::pin!(exec);

        let mut timed_out = false;
        let result = tokio::select! {
            result = &mut exec => result,
            _ = tokio::time::sleep(timeout) => {
                // Same cancel path as a server abort, recorded as timeout
                timed_out = true;
                cancel.cancel();
                match tokio::time::timeout(CANCEL_SETTLE_GRACE, &mut exec).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!(%task_id, "executor: backend ignored cancel, dropping it");
                        Ok(ExecuteOutcome::cancelled())
                    }
                }
            }
        };

        if let Some(task) = heartbeat {
            task.abort();
        }

        let mut error_message = None;
        let mut outcome = match result {
            Ok(outcome) => {
                // A backend that reports failure in-band (e.g. a gateway
                // reply with isError payloads) still carries its message
                // to the escalation gate below.
                if outcome.status == TaskStatus::Failed {
                    error_message = Some(outcome.output.clone());
                }
                outcome
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(%task_id, error = %message, "executor: backend error");
                error_message = Some(message.clone());
                ExecuteOutcome::failed(message)
            }
        };

        if timed_out {
            outcome = ExecuteOutcome::failed(format!(
                "Timeout: task exceeded {}s limit",
                timeout.as_secs()
            ));
        } else if cancel.is_cancelled() && outcome.status != TaskStatus::Cancelled {
            // Server abort or shutdown landed while the backend settled:
            // the task is cancelled regardless of what the backend said.
            outcome = ExecuteOutcome {
                status: TaskStatus::Cancelled,
                output: CANCELLED_OUTPUT.to_string(),
                tokens_used: outcome.tokens_used,
                cost_usd: outcome.cost_usd,
            };
        }

        Execution { outcome, backend_id: Some(backend_id), error_message }
    }

    fn spawn_heartbeat(
        &self,
        task_id: String,
        session_id: String,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let interval = self.config.heartbeat_interval.max(Duration::from_secs(10));
        let started = Instant::now();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => return,
                }
                let progress = (started.elapsed().as_secs_f64()
                    / timeout.as_secs_f64().max(1.0))
                .clamp(0.0, 1.0);
                let req = HeartbeatRequest {
                    session_id: session_id.clone(),
                    phase: Some("executing".to_string()),
                    progress: Some(progress),
                };
                match coordinator.heartbeat(&task_id, &req).await {
                    Ok(hb) if hb.wants_abort() => {
                        tracing::info!(
                            %task_id,
                            reason = hb.cancel_reason.as_deref().unwrap_or("unspecified"),
                            "executor: server requested abort"
                        );
                        cancel.cancel();
                        return;
                    }
                    Ok(_) => {}
                    // Heartbeat failures never terminate execution
                    Err(e) => tracing::warn!(%task_id, error = %e, "executor: heartbeat failed"),
                }
            }
        })
    }

    /// Complete, then escalate when the failure needs human approval.
    async fn finish_task(
        &self,
        task_id: &str,
        session_id: &str,
        started: Instant,
        execution: Execution,
    ) {
        let outcome = execution.outcome.with_nonempty_output();
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            %task_id,
            status = %outcome.status,
            duration_ms,
            "executor: completing"
        );

        let complete = CompleteRequest {
            session_id: session_id.to_string(),
            status: outcome.status,
            output: outcome.output,
            tokens_used: outcome.tokens_used,
            cost_usd: outcome.cost_usd,
            duration_ms: Some(duration_ms),
        };
        if let Err(e) = self.coordinator.complete(task_id, &complete).await {
            // Completion failure does not prevent escalation
            tracing::warn!(%task_id, error = %e, "executor: complete failed");
        }

        let needs_escalation = execution.backend_id == Some(crate::backend::GATEWAY_BACKEND_ID)
            && execution.error_message.as_deref().is_some_and(is_approval_error);
        if needs_escalation {
            let escalate = EscalateRequest {
                session_id: session_id.to_string(),
                reason: "approval required".to_string(),
                suggested_action: None,
            };
            if let Err(e) = self.coordinator.escalate(task_id, &escalate).await {
                tracing::warn!(%task_id, error = %e, "executor: escalate failed");
            }
        }
    }
}

/// Internal execution summary carried to completion.
struct Execution {
    outcome: ExecuteOutcome,
    backend_id: Option<&'static str>,
    error_message: Option<String>,
}

impl Execution {
    fn failed_without_backend(reason: String) -> Self {
        Self { outcome: ExecuteOutcome::failed(reason), backend_id: None, error_message: None }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
