// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fakes for executor and cadence tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use flux_wire::{
    ClaimRequest, ClaimResponse, CompleteRequest, Coordinator, EscalateRequest, HeartbeatRequest,
    HeartbeatResponse, TaskPage, TaskQuery, WireError,
};

use crate::backend::{Backend, BackendError, ExecuteOutcome, ExecuteRequest};

/// One recorded coordinator call.
#[derive(Debug, Clone)]
pub enum Call {
    List,
    Claim(String),
    Heartbeat(String),
    Complete(String, CompleteRequest),
    Escalate(String, EscalateRequest),
}

/// Scripted claim behaviour per task.
#[derive(Debug, Clone)]
pub enum ClaimScript {
    /// Grant with this optional claim-time packet
    Grant(Option<Value>),
    /// HTTP 409: a peer got there first
    Conflict,
    /// Transport-level failure
    Error,
}

#[derive(Default)]
pub struct FakeCoordinator {
    pub calls: Mutex<Vec<Call>>,
    pub claims: Mutex<HashMap<String, ClaimScript>>,
    pub heartbeats: Mutex<VecDeque<HeartbeatResponse>>,
    pub pages: Mutex<VecDeque<TaskPage>>,
    /// When > 0, the next list calls fail (decrementing)
    pub list_errors: AtomicUsize,
    pub fail_complete: std::sync::atomic::AtomicBool,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_claim(&self, task_id: &str, script: ClaimScript) {
        self.claims.lock().insert(task_id.to_string(), script);
    }

    pub fn push_heartbeat(&self, response: HeartbeatResponse) {
        self.heartbeats.lock().push_back(response);
    }

    pub fn push_page(&self, tasks: Vec<Value>) {
        self.pages.lock().push_back(TaskPage { tasks, next_poll_seconds: None });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn completes_for(&self, task_id: &str) -> Vec<CompleteRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Complete(id, req) if id == task_id => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn escalations_for(&self, task_id: &str) -> Vec<EscalateRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Escalate(id, req) if id == task_id => Some(req.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn list_tasks(&self, _query: &TaskQuery) -> Result<TaskPage, WireError> {
        self.calls.lock().push(Call::List);
        if self.list_errors.load(Ordering::SeqCst) > 0 {
            self.list_errors.fetch_sub(1, Ordering::SeqCst);
            return Err(WireError::from_status(503, serde_json::json!({})));
        }
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }

    async fn claim(
        &self,
        task_id: &str,
        _req: &ClaimRequest,
    ) -> Result<Option<ClaimResponse>, WireError> {
        self.calls.lock().push(Call::Claim(task_id.to_string()));
        let script = self
            .claims
            .lock()
            .get(task_id)
            .cloned()
            .unwrap_or(ClaimScript::Grant(None));
        match script {
            ClaimScript::Grant(packet) => Ok(Some(ClaimResponse {
                session_id: format!("sess-{task_id}"),
                packet,
            })),
            ClaimScript::Conflict => Ok(None),
            ClaimScript::Error => {
                Err(WireError::from_status(500, serde_json::json!({"code": "boom"})))
            }
        }
    }

    async fn heartbeat(
        &self,
        task_id: &str,
        _req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, WireError> {
        self.calls.lock().push(Call::Heartbeat(task_id.to_string()));
        Ok(self.heartbeats.lock().pop_front().unwrap_or_default())
    }

    async fn complete(&self, task_id: &str, req: &CompleteRequest) -> Result<(), WireError> {
        self.calls.lock().push(Call::Complete(task_id.to_string(), req.clone()));
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(WireError::from_status(500, serde_json::json!({})));
        }
        Ok(())
    }

    async fn escalate(&self, task_id: &str, req: &EscalateRequest) -> Result<(), WireError> {
        self.calls.lock().push(Call::Escalate(task_id.to_string(), req.clone()));
        Ok(())
    }
}

/// Scripted backend behaviour.
#[derive(Clone)]
pub enum Behavior {
    Done(String),
    Failed(String),
    Error(String),
    /// Hold until the cancel token fires, then report cancelled
    WaitForCancel,
    /// Sleep, then succeed
    Sleep(Duration, String),
}

pub struct FakeBackend {
    id: &'static str,
    behavior: Behavior,
    pub executions: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl FakeBackend {
    pub fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            behavior,
            executions: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn id(&self) -> &'static str {
        self.id
    }

    fn can_execute(&self, backend: &str) -> bool {
        backend == self.id
    }

    async fn execute(
        &self,
        req: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, BackendError> {
        self.executions.lock().push(req.packet.task_id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        let result = match &self.behavior {
            Behavior::Done(output) => Ok(ExecuteOutcome::done(output.clone())),
            Behavior::Failed(output) => Ok(ExecuteOutcome::failed(output.clone())),
            Behavior::Error(message) => Err(BackendError::Session(message.clone())),
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Ok(ExecuteOutcome::cancelled())
            }
            Behavior::Sleep(duration, output) => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(ExecuteOutcome::done(output.clone())),
                    _ = cancel.cancelled() => Ok(ExecuteOutcome::cancelled()),
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
