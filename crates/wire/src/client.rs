// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated JSON client for the coordinator REST API.
//!
//! Every call attaches `Authorization: Bearer <token>`. Response bodies
//! are parsed as JSON; a body that fails to parse is wrapped as
//! `{"raw": <text>}` so callers always see a JSON value. Non-2xx
//! responses become [`WireError::Status`].

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::WireError;
use crate::types::{
    ClaimRequest, ClaimResponse, CompleteRequest, EscalateRequest, HandshakeRequest,
    HandshakeResponse, HeartbeatRequest, HeartbeatResponse, TaskPage, TaskQuery, WhoamiResponse,
};

/// Derive the HTTP origin for the push-ticket mint from a WebSocket URL:
/// `wss:` maps to `https:`, `ws:` to `http:`.
pub fn push_ticket_origin(ws_url: &str) -> Result<String, WireError> {
    if let Some(rest) = ws_url.strip_prefix("wss://") {
        Ok(format!("https://{rest}"))
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        Ok(format!("http://{rest}"))
    } else {
        Err(WireError::BadOrigin(ws_url.to_string()))
    }
}

/// Coordinator REST client.
#[derive(Clone)]
pub struct WireClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl WireClient {
    /// Build a client. Trailing slashes on the base URL are stripped here
    /// so path joins stay predictable.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, token: token.into(), http: reqwest::Client::new() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_path(&self, task_id: &str, op: &str) -> String {
        format!("/tasks/{}/{}", urlencoding::encode(task_id), op)
    }

    /// Read a response: JSON body (or `{"raw": text}`), status mapped to
    /// `WireError::Status` on non-2xx.
    async fn read_body(resp: reqwest::Response) -> Result<Value, WireError> {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "raw": text }));
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(WireError::from_status(status, body))
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, WireError> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::read_body(resp).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, WireError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::read_body(resp).await
    }

    /// `GET /whoami` - credential check at startup.
    pub async fn whoami(&self) -> Result<WhoamiResponse, WireError> {
        let body = self.get("/whoami", &[]).await?;
        Ok(serde_json::from_value(body).unwrap_or_else(|_| WhoamiResponse {
            agent: Default::default(),
            server: Default::default(),
        }))
    }

    /// `POST /handshake` - announce this runner, learn the push config.
    pub async fn handshake(&self, req: &HandshakeRequest) -> Result<HandshakeResponse, WireError> {
        let body = self.post("/handshake", req).await?;
        serde_json::from_value(body.clone()).map_err(|_| WireError::from_status(200, body))
    }

    /// `POST /hello` - best-effort presence notification.
    pub async fn hello(&self, req: &HandshakeRequest) -> Result<(), WireError> {
        self.post("/hello", req).await.map(|_| ())
    }

    /// `POST /disconnect` - best-effort departure notification.
    pub async fn disconnect(&self, req: &HandshakeRequest) -> Result<(), WireError> {
        self.post("/disconnect", req).await.map(|_| ())
    }

    /// `GET /health` - unauthenticated liveness probe.
    pub async fn health(&self) -> Result<Value, WireError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Self::read_body(resp).await
    }

    pub(crate) async fn list_tasks_inner(&self, query: &TaskQuery) -> Result<TaskPage, WireError> {
        let body = self.get("/tasks", &query.to_pairs()).await?;
        Ok(TaskPage::from_value(&body))
    }

    pub(crate) async fn claim_inner(
        &self,
        task_id: &str,
        req: &ClaimRequest,
    ) -> Result<Option<ClaimResponse>, WireError> {
        match self.post(&self.task_path(task_id, "claim"), req).await {
            Ok(body) => {
                let claim = serde_json::from_value(body.clone())
                    .map_err(|_| WireError::from_status(200, body))?;
                Ok(Some(claim))
            }
            // 409: already claimed by a peer - a normal race, not an error
            Err(e) if e.is_conflict() => {
                tracing::debug!(%task_id, "claim conflict, task taken by a peer");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn heartbeat_inner(
        &self,
        task_id: &str,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, WireError> {
        let body = self.post(&self.task_path(task_id, "heartbeat"), req).await?;
        Ok(serde_json::from_value(body).unwrap_or_default())
    }

    pub(crate) async fn complete_inner(
        &self,
        task_id: &str,
        req: &CompleteRequest,
    ) -> Result<(), WireError> {
        self.post(&self.task_path(task_id, "complete"), req).await.map(|_| ())
    }

    pub(crate) async fn escalate_inner(
        &self,
        task_id: &str,
        req: &EscalateRequest,
    ) -> Result<(), WireError> {
        self.post(&self.task_path(task_id, "escalate"), req).await.map(|_| ())
    }

    /// `POST /mcp/v1/push-ticket` at the WebSocket origin. A response
    /// without a string `ticket` is a hard error.
    pub async fn mint_push_ticket(
        &self,
        ws_url: &str,
        filters: &Value,
        req: &HandshakeRequest,
    ) -> Result<String, WireError> {
        let origin = push_ticket_origin(ws_url)?;
        let body = json!({
            "runnerType": req.runner_type,
            "runnerVersion": req.runner_version,
            "machineId": req.machine_id,
            "runnerInstanceId": req.runner_instance_id,
            "filters": filters,
        });
        let resp = self
            .http
            .post(format!("{origin}/mcp/v1/push-ticket"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let body = Self::read_body(resp).await?;
        body.get("ticket")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(WireError::MissingTicket)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
