// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator operations the executor and cadence loop depend on.
//!
//! Kept as a trait so tests can substitute a scripted fake for the HTTP
//! client.

use async_trait::async_trait;

use crate::error::WireError;
use crate::types::{
    ClaimRequest, ClaimResponse, CompleteRequest, EscalateRequest, HeartbeatRequest,
    HeartbeatResponse, TaskPage, TaskQuery,
};
use crate::WireClient;

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// List ready tasks. An empty page means no work.
    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskPage, WireError>;

    /// Claim a task. `Ok(None)` means a peer won the race (HTTP 409).
    async fn claim(
        &self,
        task_id: &str,
        req: &ClaimRequest,
    ) -> Result<Option<ClaimResponse>, WireError>;

    /// Report liveness; the response may ask for cancellation.
    async fn heartbeat(
        &self,
        task_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, WireError>;

    /// Report the terminal outcome. Called exactly once per claim.
    async fn complete(&self, task_id: &str, req: &CompleteRequest) -> Result<(), WireError>;

    /// Request human attention for a task that needs approval.
    async fn escalate(&self, task_id: &str, req: &EscalateRequest) -> Result<(), WireError>;
}

#[async_trait]
impl Coordinator for WireClient {
    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskPage, WireError> {
        self.list_tasks_inner(query).await
    }

    async fn claim(
        &self,
        task_id: &str,
        req: &ClaimRequest,
    ) -> Result<Option<ClaimResponse>, WireError> {
        self.claim_inner(task_id, req).await
    }

    async fn heartbeat(
        &self,
        task_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, WireError> {
        self.heartbeat_inner(task_id, req).await
    }

    async fn complete(&self, task_id: &str, req: &CompleteRequest) -> Result<(), WireError> {
        self.complete_inner(task_id, req).await
    }

    async fn escalate(&self, task_id: &str, req: &EscalateRequest) -> Result<(), WireError> {
        self.escalate_inner(task_id, req).await
    }
}
