// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cadence loop tests: paging, skip sets, overlap suppression.

use super::*;
use crate::backend::BackendRegistry;
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::test_helpers::{Behavior, Call, FakeBackend, FakeCoordinator};
use flux_wire::ClaimRequest;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn listed(task_id: &str) -> serde_json::Value {
    json!({
        "taskId": task_id,
        "execution": {"backend": "claude-cli"},
        "prompt": {"rendered": "hi"},
    })
}

struct Fixture {
    coordinator: Arc<FakeCoordinator>,
    backend: Arc<FakeBackend>,
    executor: Arc<TaskExecutor<FakeCoordinator>>,
    dispatch: DispatchContext,
}

fn fixture(behavior: Behavior) -> Fixture {
    let coordinator = Arc::new(FakeCoordinator::new());
    let backend = FakeBackend::new("claude-cli", behavior);
    let mut registry = BackendRegistry::new();
    registry.register(Arc::clone(&backend) as Arc<dyn crate::backend::Backend>);
    let dispatch = DispatchContext::new();
    let executor = Arc::new(TaskExecutor::new(
        Arc::clone(&coordinator),
        registry,
        dispatch.clone(),
        ExecutorConfig {
            claim: ClaimRequest {
                runner_instance_id: "ri".to_string(),
                machine_id: "m".to_string(),
                runner_type: "flux-runner".to_string(),
                runner_version: "test".to_string(),
            },
            heartbeat_interval: Duration::from_secs(30),
            default_backend: None,
        },
    ));
    Fixture { coordinator, backend, executor, dispatch }
}

fn cadence(fx: &Fixture) -> CadenceLoop<FakeCoordinator> {
    CadenceLoop::new(
        Arc::clone(&fx.coordinator),
        Arc::clone(&fx.executor),
        fx.dispatch.clone(),
        Duration::from_secs(60),
        TaskFilters::default(),
    )
}

#[tokio::test]
async fn drain_dispatches_every_listed_task() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.coordinator.push_page(vec![listed("T1"), listed("T2")]);

    cadence(&fx).drain_once().await.unwrap();

    assert_eq!(fx.backend.executions.lock().as_slice(), ["T1", "T2"]);
    assert_eq!(fx.coordinator.completes_for("T1").len(), 1);
    assert_eq!(fx.coordinator.completes_for("T2").len(), 1);
}

#[tokio::test]
async fn drain_pages_until_a_short_page() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    // Full page of 2, then a short page
    fx.coordinator.push_page(vec![listed("T1"), listed("T2")]);
    fx.coordinator.push_page(vec![listed("T3")]);

    cadence(&fx).with_limit(2).drain_once().await.unwrap();

    let lists = fx.coordinator.calls().iter().filter(|c| matches!(c, Call::List)).count();
    assert_eq!(lists, 2);
    assert_eq!(fx.backend.executions.lock().len(), 3);
}

#[tokio::test]
async fn known_tasks_are_skipped() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.dispatch.begin("T1");
    fx.dispatch.activate("T1");
    fx.coordinator.push_page(vec![listed("T1"), listed("T2")]);

    cadence(&fx).drain_once().await.unwrap();

    assert_eq!(fx.backend.executions.lock().as_slice(), ["T2"]);
    assert!(fx.coordinator.completes_for("T1").is_empty());
}

#[tokio::test]
async fn zero_limit_is_no_work() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.coordinator.push_page(vec![listed("T1")]);

    cadence(&fx).with_limit(0).drain_once().await.unwrap();

    assert!(fx.coordinator.calls().is_empty());
    assert!(fx.backend.executions.lock().is_empty());
}

#[tokio::test]
async fn next_poll_seconds_overrides_the_tick() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.coordinator.pages.lock().push_back(flux_wire::TaskPage {
        tasks: vec![],
        next_poll_seconds: Some(120),
    });

    let cadence = cadence(&fx);
    cadence.drain_once().await.unwrap();
    assert_eq!(cadence.state.lock().next_poll, Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn drain_errors_hit_the_callback_and_do_not_stop_the_loop() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.coordinator.list_errors.store(1, Ordering::SeqCst);
    fx.coordinator.push_page(vec![listed("T1")]);

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    let cadence = cadence(&fx).with_on_error(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    // First cycle errors, second succeeds
    cadence.drain_cycle().await;
    cadence.drain_cycle().await;

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(fx.backend.executions.lock().as_slice(), ["T1"]);
}

#[tokio::test]
async fn trigger_during_drain_schedules_exactly_one_recheck() {
    let fx = fixture(Behavior::Sleep(Duration::from_millis(100), "slow".to_string()));
    fx.coordinator.push_page(vec![listed("T6")]);
    fx.coordinator.push_page(vec![listed("T7")]);

    let cadence = cadence(&fx);
    let handle = cadence.handle();

    let drain = tokio::spawn(async move {
        cadence.drain_cycle().await;
        cadence
    });

    // Wait until the first drain is inside the backend, then push twice:
    // both triggers must coalesce into one follow-up drain.
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.trigger_now();
    handle.trigger_now();

    let _cadence = drain.await.unwrap();

    // Both tasks executed, in two drains
    assert_eq!(fx.backend.executions.lock().as_slice(), ["T6", "T7"]);
    let lists = fx.coordinator.calls().iter().filter(|c| matches!(c, Call::List)).count();
    assert_eq!(lists, 2);
    // And no overlap: the backend never ran two tasks at once
    assert_eq!(fx.backend.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn trigger_outside_drain_wakes_the_loop() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    fx.coordinator.push_page(vec![]);
    fx.coordinator.push_page(vec![listed("T1")]);

    let cadence = cadence(&fx);
    let handle = cadence.handle();
    let join = tokio::spawn(cadence.run());

    // Startup drain consumes the empty page; trigger pulls the second
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.trigger_now();

    // Poll for completion
    for _ in 0..50 {
        if !fx.coordinator.completes_for("T1").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(fx.coordinator.completes_for("T1").len(), 1);

    handle.stop();
    join.await.unwrap();
}

#[tokio::test]
async fn stop_prevents_new_drains() {
    let fx = fixture(Behavior::Done("ok".to_string()));
    let cadence = cadence(&fx);
    let handle = cadence.handle();
    handle.stop();

    let join = tokio::spawn(cadence.run());
    join.await.unwrap();

    // Only the startup drain ran
    let lists = fx.coordinator.calls().iter().filter(|c| matches!(c, Call::List)).count();
    assert!(lists <= 1);
}
