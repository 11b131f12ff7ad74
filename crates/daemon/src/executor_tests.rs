// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor protocol tests against scripted fakes.

use super::*;
use crate::backend::BackendRegistry;
use crate::test_helpers::{Behavior, Call, ClaimScript, FakeBackend, FakeCoordinator};
use flux_core::TaskStatus;
use flux_wire::HeartbeatResponse;
use serde_json::json;
use std::sync::Arc;

fn claim_meta() -> ClaimRequest {
    ClaimRequest {
        runner_instance_id: "ri-1".to_string(),
        machine_id: "m-1".to_string(),
        runner_type: "flux-runner".to_string(),
        runner_version: "0.0.0-test".to_string(),
    }
}

fn executor_with(
    coordinator: Arc<FakeCoordinator>,
    backends: Vec<Arc<FakeBackend>>,
) -> TaskExecutor<FakeCoordinator> {
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    TaskExecutor::new(
        coordinator,
        registry,
        DispatchContext::new(),
        ExecutorConfig {
            claim: claim_meta(),
            heartbeat_interval: Duration::from_secs(30),
            default_backend: None,
        },
    )
}

fn listed(task_id: &str) -> serde_json::Value {
    json!({
        "taskId": task_id,
        "type": "demo",
        "execution": {"backend": "claude-cli"},
        "prompt": {"rendered": "hi"},
    })
}

#[tokio::test]
async fn normal_execution_claims_then_completes_done() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::Done(r#"{"ok":true}"#.to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]);

    executor.dispatch(listed("T1")).await;

    let completes = coordinator.completes_for("T1");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].session_id, "sess-T1");
    assert_eq!(completes[0].status, TaskStatus::Done);
    assert_eq!(completes[0].output, r#"{"ok":true}"#);
    assert!(completes[0].duration_ms.is_some());
    assert_eq!(backend.executions.lock().as_slice(), ["T1"]);
    assert!(executor.dispatch_context().is_idle());
}

#[tokio::test]
async fn claim_conflict_is_a_silent_skip() {
    let coordinator = Arc::new(FakeCoordinator::new());
    coordinator.script_claim("T2", ClaimScript::Conflict);
    let backend = FakeBackend::new("claude-cli", Behavior::Done("x".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]);

    executor.dispatch(listed("T2")).await;

    // Claim happened, nothing else did
    assert!(matches!(coordinator.calls()[0], Call::Claim(ref id) if id == "T2"));
    assert!(coordinator.completes_for("T2").is_empty());
    assert!(backend.executions.lock().is_empty());
    assert!(executor.dispatch_context().is_idle());
}

#[tokio::test]
async fn claim_error_is_terminal_without_complete() {
    let coordinator = Arc::new(FakeCoordinator::new());
    coordinator.script_claim("T1", ClaimScript::Error);
    let backend = FakeBackend::new("claude-cli", Behavior::Done("x".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await;

    assert!(coordinator.completes_for("T1").is_empty());
    assert!(executor.dispatch_context().is_idle());
}

#[tokio::test]
async fn malformed_claim_packet_completes_failed() {
    let coordinator = Arc::new(FakeCoordinator::new());
    // Claim-time packet wins over the listed one, and it is malformed
    coordinator.script_claim("T1", ClaimScript::Grant(Some(json!({"no": "taskId"}))));
    let backend = FakeBackend::new("claude-cli", Behavior::Done("x".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]);

    executor.dispatch(listed("T1")).await;

    let completes = coordinator.completes_for("T1");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Failed);
    assert!(completes[0].output.contains("malformed packet"));
    assert!(backend.executions.lock().is_empty());
}

#[tokio::test]
async fn unknown_backend_completes_failed() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("codex-cli", Behavior::Done("x".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await; // wants claude-cli

    let completes = coordinator.completes_for("T1");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Failed);
    assert!(completes[0].output.contains("no backend available for claude-cli"));
}

#[tokio::test]
async fn backend_aliases_resolve_through_normalisation() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::Done("ok".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]);

    executor
        .dispatch(json!({
            "taskId": "T1",
            "execution": {"backend": "Claude-Code"},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    assert_eq!(backend.executions.lock().len(), 1);
    assert_eq!(coordinator.completes_for("T1")[0].status, TaskStatus::Done);
}

#[tokio::test]
async fn packet_without_execution_defaults_to_claude_cli() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::Done("ok".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]);

    executor.dispatch(json!({"taskId": "T1", "prompt": {"rendered": "hi"}})).await;

    assert_eq!(backend.executions.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_abort_cancels_the_task() {
    let coordinator = Arc::new(FakeCoordinator::new());
    coordinator.push_heartbeat(HeartbeatResponse {
        should_abort: true,
        cancel_pending: false,
        cancel_reason: Some("user".to_string()),
    });
    let backend = FakeBackend::new("claude-cli", Behavior::WaitForCancel);
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T3")).await;

    let completes = coordinator.completes_for("T3");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Cancelled);
    assert_eq!(completes[0].output, "Cancelled by user request");
    assert!(executor.dispatch_context().is_idle());
}

#[tokio::test(start_paused = true)]
async fn cancel_pending_also_aborts() {
    let coordinator = Arc::new(FakeCoordinator::new());
    coordinator.push_heartbeat(HeartbeatResponse {
        should_abort: false,
        cancel_pending: true,
        cancel_reason: None,
    });
    let backend = FakeBackend::new("claude-cli", Behavior::WaitForCancel);
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T3")).await;

    assert_eq!(coordinator.completes_for("T3")[0].status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_suppressed_when_policy_disables_it() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new(
        "claude-cli",
        Behavior::Sleep(Duration::from_secs(120), "slow but fine".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T1",
            "execution": {"backend": "claude-cli"},
            "policy": {"heartbeatRequired": false},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    assert!(!coordinator.calls().iter().any(|c| matches!(c, Call::Heartbeat(_))));
    assert_eq!(coordinator.completes_for("T1")[0].status, TaskStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_fire_periodically_until_completion() {
    let coordinator = Arc::new(FakeCoordinator::new());
    // No scripted heartbeat responses: defaults say keep going
    let backend = FakeBackend::new(
        "claude-cli",
        Behavior::Sleep(Duration::from_secs(90), "done late".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await;

    let heartbeats =
        coordinator.calls().iter().filter(|c| matches!(c, Call::Heartbeat(_))).count();
    assert!(heartbeats >= 2, "expected periodic heartbeats, saw {heartbeats}");
    assert_eq!(coordinator.completes_for("T1")[0].status, TaskStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn timeout_completes_failed_with_timeout_prefix() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::WaitForCancel);
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T1",
            "execution": {"backend": "claude-cli", "timeoutSec": 7},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    let completes = coordinator.completes_for("T1");
    assert_eq!(completes[0].status, TaskStatus::Failed);
    assert!(
        completes[0].output.starts_with("Timeout: task exceeded 7s limit"),
        "got: {}",
        completes[0].output
    );
}

#[tokio::test]
async fn gateway_approval_error_escalates_after_complete() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new(
        "gateway",
        Behavior::Error("operator.approvals: consent required".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T5",
            "execution": {"backend": "gateway"},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    let completes = coordinator.completes_for("T5");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Failed);

    let escalations = coordinator.escalations_for("T5");
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].reason, "approval required");
    assert_eq!(escalations[0].session_id, "sess-T5");

    // Ordering: complete strictly before escalate
    let calls = coordinator.calls();
    let complete_at = calls.iter().position(|c| matches!(c, Call::Complete(..))).unwrap();
    let escalate_at = calls.iter().position(|c| matches!(c, Call::Escalate(..))).unwrap();
    assert!(complete_at < escalate_at);
}

#[tokio::test]
async fn gateway_is_error_reply_escalates_after_complete() {
    let coordinator = Arc::new(FakeCoordinator::new());
    // The gateway backend reports isError payloads as an in-band failed
    // outcome, not a backend error; escalation must still fire.
    let backend = FakeBackend::new(
        "gateway",
        Behavior::Failed("operator.approvals: consent required".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T5",
            "execution": {"backend": "gateway"},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    let completes = coordinator.completes_for("T5");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Failed);
    assert_eq!(completes[0].output, "operator.approvals: consent required");

    let escalations = coordinator.escalations_for("T5");
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].reason, "approval required");

    let calls = coordinator.calls();
    let complete_at = calls.iter().position(|c| matches!(c, Call::Complete(..))).unwrap();
    let escalate_at = calls.iter().position(|c| matches!(c, Call::Escalate(..))).unwrap();
    assert!(complete_at < escalate_at);
}

#[tokio::test]
async fn gateway_failed_reply_without_approval_text_does_not_escalate() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("gateway", Behavior::Failed("remote agent crashed".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T5",
            "execution": {"backend": "gateway"},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    assert_eq!(coordinator.completes_for("T5")[0].status, TaskStatus::Failed);
    assert!(coordinator.escalations_for("T5").is_empty());
}

#[tokio::test]
async fn failed_output_on_non_gateway_backend_does_not_escalate() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new(
        "claude-cli",
        Behavior::Failed("approval required by policy".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await;

    assert_eq!(coordinator.completes_for("T1")[0].status, TaskStatus::Failed);
    assert!(coordinator.escalations_for("T1").is_empty());
}

#[tokio::test]
async fn completion_failure_does_not_prevent_escalation() {
    let coordinator = Arc::new(FakeCoordinator::new());
    coordinator.fail_complete.store(true, std::sync::atomic::Ordering::SeqCst);
    let backend = FakeBackend::new(
        "gateway",
        Behavior::Error("exec.approval needed".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor
        .dispatch(json!({
            "taskId": "T5",
            "execution": {"backend": "gateway"},
            "prompt": {"rendered": "hi"},
        }))
        .await;

    assert_eq!(coordinator.escalations_for("T5").len(), 1);
}

#[tokio::test]
async fn approval_error_on_non_gateway_backend_does_not_escalate() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new(
        "claude-cli",
        Behavior::Error("approval required by policy".to_string()),
    );
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await;

    assert_eq!(coordinator.completes_for("T1")[0].status, TaskStatus::Failed);
    assert!(coordinator.escalations_for("T1").is_empty());
}

#[tokio::test]
async fn concurrent_dispatch_of_same_task_claims_once() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new(
        "claude-cli",
        Behavior::Sleep(Duration::from_millis(50), "ok".to_string()),
    );
    let executor = Arc::new(executor_with(Arc::clone(&coordinator), vec![Arc::clone(&backend)]));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            executor.dispatch(listed("T-race")).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let claims =
        coordinator.calls().iter().filter(|c| matches!(c, Call::Claim(_))).count();
    assert_eq!(claims, 1, "exactly one claim for concurrent dispatch of one task");
    assert_eq!(coordinator.completes_for("T-race").len(), 1);
    assert_eq!(backend.max_concurrent.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_backend_output_is_substituted() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::Done("   ".to_string()));
    let executor = executor_with(Arc::clone(&coordinator), vec![backend]);

    executor.dispatch(listed("T1")).await;

    assert_eq!(coordinator.completes_for("T1")[0].output, "(empty response)");
}

#[tokio::test]
async fn shutdown_cancel_all_cancels_running_backends() {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", Behavior::WaitForCancel);
    let executor = Arc::new(executor_with(Arc::clone(&coordinator), vec![backend]));

    let running = Arc::clone(&executor);
    let task = tokio::spawn(async move {
        running.dispatch(listed("T1")).await;
    });

    // Let the dispatch reach the backend, then pull the plug
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.cancel_all();
    task.await.unwrap();

    let completes = coordinator.completes_for("T1");
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].status, TaskStatus::Cancelled);
}
