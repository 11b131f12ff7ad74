// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the model backend against scripted sessions.

use super::*;
use crate::backend::{Backend, ExecuteRequest};
use flux_core::TaskPacket;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A session that replays a fixed event script, one event per poll,
/// waiting `delay` before each.
struct ScriptedSession {
    events: VecDeque<SessionEvent>,
    delay: Duration,
    aborted: Arc<AtomicBool>,
    finished: bool,
}

#[async_trait::async_trait]
impl ModelSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }
        if self.aborted.load(Ordering::SeqCst) {
            self.finished = true;
            return Some(SessionEvent::Completed(SessionEnd::with_reason("aborted")));
        }
        tokio::time::sleep(self.delay).await;
        if self.aborted.load(Ordering::SeqCst) {
            self.finished = true;
            return Some(SessionEvent::Completed(SessionEnd::with_reason("aborted")));
        }
        match self.events.pop_front() {
            Some(event) => {
                if matches!(event, SessionEvent::Completed(_)) {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    fn abort(&mut self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

struct ScriptedDriver {
    events: Vec<SessionEvent>,
    delay: Duration,
}

impl ScriptedDriver {
    fn new(events: Vec<SessionEvent>) -> Self {
        Self { events, delay: Duration::from_millis(1) }
    }

    fn slow(events: Vec<SessionEvent>, delay: Duration) -> Self {
        Self { events, delay }
    }
}

#[async_trait::async_trait]
impl SessionDriver for ScriptedDriver {
    fn preflight(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn start(&self, _spec: SessionSpec) -> Result<Box<dyn ModelSession>, BackendError> {
        Ok(Box::new(ScriptedSession {
            events: self.events.clone().into(),
            delay: self.delay,
            aborted: Arc::new(AtomicBool::new(false)),
            finished: false,
        }))
    }
}

fn request(raw: serde_json::Value) -> ExecuteRequest {
    ExecuteRequest {
        packet: TaskPacket::parse(raw).unwrap(),
        prompt: "prompt".to_string(),
        backend: "pi".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn model_packet() -> serde_json::Value {
    json!({"taskId": "T1", "execution": {"model": "acme/fast-1"}})
}

fn deltas_then(end: SessionEnd) -> Vec<SessionEvent> {
    vec![
        SessionEvent::TextDelta("{\"na".to_string()),
        SessionEvent::TextDelta("me\":\"flux\"}".to_string()),
        SessionEvent::Completed(end),
    ]
}

#[tokio::test]
async fn accumulated_deltas_become_done_output() {
    let backend = ModelBackend::new(ScriptedDriver::new(deltas_then(SessionEnd::with_reason("end"))));
    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Done);
    assert_eq!(outcome.output, "{\"name\":\"flux\"}");
}

#[tokio::test]
async fn usage_metrics_are_reported() {
    let mut end = SessionEnd::with_reason("end");
    end.usage = SessionUsage { total_tokens: Some(321), cost_total: Some(0.02) };
    let backend = ModelBackend::new(ScriptedDriver::new(deltas_then(end)));

    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.tokens_used, Some(321));
    assert_eq!(outcome.cost_usd, Some(0.02));
}

#[tokio::test]
async fn error_stop_reason_fails_the_task() {
    let backend =
        ModelBackend::new(ScriptedDriver::new(deltas_then(SessionEnd::with_reason("error"))));
    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
}

#[tokio::test]
async fn aborted_stop_reason_is_cancelled() {
    let backend =
        ModelBackend::new(ScriptedDriver::new(vec![SessionEvent::Completed(
            SessionEnd::with_reason("aborted"),
        )]));
    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Cancelled);
    assert_eq!(outcome.output, flux_core::CANCELLED_OUTPUT);
}

#[tokio::test]
async fn external_cancel_aborts_the_session() {
    let backend = ModelBackend::new(ScriptedDriver::slow(
        vec![SessionEvent::TextDelta("never finishes".to_string())],
        Duration::from_secs(30),
    ));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = backend.execute(request(model_packet()), cancel).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn deadline_fails_with_timeout_output() {
    let backend = ModelBackend::new(ScriptedDriver::slow(
        vec![SessionEvent::TextDelta("slow".to_string())],
        Duration::from_secs(30),
    ));
    let mut req = request(model_packet());
    req.timeout = Duration::from_millis(50);

    let outcome = backend.execute(req, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.output, "timed out after 50ms");
}

#[tokio::test]
async fn empty_stream_falls_back_to_last_assistant_text() {
    let mut end = SessionEnd::with_reason("end");
    end.last_assistant_text = Some("from session state".to_string());
    let backend = ModelBackend::new(ScriptedDriver::new(vec![SessionEvent::Completed(end)]));

    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.output, "from session state");
}

#[tokio::test]
async fn fully_empty_output_is_substituted() {
    let backend = ModelBackend::new(ScriptedDriver::new(vec![SessionEvent::Completed(
        SessionEnd::with_reason("end"),
    )]));
    let outcome =
        backend.execute(request(model_packet()), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.output, flux_core::EMPTY_OUTPUT);
}

#[tokio::test]
async fn schema_validation_converts_done_to_failed() {
    let backend = ModelBackend::new(ScriptedDriver::new(vec![
        SessionEvent::TextDelta("{\"wrong\":\"field\"}".to_string()),
        SessionEvent::Completed(SessionEnd::with_reason("end")),
    ]));
    let raw = json!({
        "taskId": "T1",
        "execution": {
            "model": "acme/fast-1",
            "outputSchemaJson": "{\"type\":\"object\",\"required\":[\"name\"]}",
        },
    });

    let outcome = backend.execute(request(raw), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.output.contains("validation failed"), "got: {}", outcome.output);
}

#[tokio::test]
async fn schema_is_not_applied_to_failures() {
    let backend = ModelBackend::new(ScriptedDriver::new(vec![
        SessionEvent::TextDelta("not json".to_string()),
        SessionEvent::Completed(SessionEnd::with_reason("error")),
    ]));
    let raw = json!({
        "taskId": "T1",
        "execution": {
            "model": "acme/fast-1",
            "outputSchemaJson": "{\"type\":\"object\"}",
        },
    });

    let outcome = backend.execute(request(raw), CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.output, "not json");
}

#[tokio::test]
async fn missing_model_is_an_error() {
    let backend = ModelBackend::new(ScriptedDriver::new(vec![]));
    let err = backend
        .execute(request(json!({"taskId": "T1"})), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no model"));
}

#[yare::parameterized(
    no_slash = { "plainmodel" },
    empty_provider = { "/model" },
    empty_model = { "provider/" },
)]
fn bad_model_refs_are_rejected(model_ref: &str) {
    assert!(split_model_ref(model_ref).is_none());
}

#[test]
fn good_model_ref_splits() {
    assert_eq!(split_model_ref("acme/fast-1"), Some(("acme", "fast-1")));
}
