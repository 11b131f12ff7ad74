// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Full-duplex gateway client.
//!
//! One WebSocket connection per process, shared by any number of callers.
//! Sends are serialised through a writer task; the reader task routes
//! `res` frames through the pending table and surfaces the
//! `connect.challenge` event to the handshake in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::GatewayError;
use crate::frame::Frame;
use crate::identity::DeviceIdentity;
use crate::pending::PendingTable;
use crate::sign::{sign_payload, signing_payload, SignInputs};
use crate::tokens::TokenStore;

/// Protocol version window offered in the connect request.
const MIN_PROTOCOL: u32 = 3;
const MAX_PROTOCOL: u32 = 3;

/// How long to wait for a `connect.challenge` before sending an
/// unchallenged connect.
const CHALLENGE_FALLBACK: Duration = Duration::from_millis(750);

/// Handshake response deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Role requested from the gateway.
const ROLE: &str = "operator";

/// Client mode reported in the connect request and signing payload.
const MODE: &str = "backend";

/// Connection settings for [`GatewayClient::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `ws://` or `wss://` gateway URL
    pub url: String,
    /// Stable client identity (runner instance id)
    pub client_id: String,
    /// Shared token, used when no cached device token exists
    pub token: Option<String>,
    /// Shared password, sent alongside the token when set
    pub password: Option<String>,
    /// Scopes to request
    pub scopes: Vec<String>,
    /// Default per-request deadline (floor 1 s applies)
    pub request_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            token: None,
            password: None,
            scopes: vec!["agent".to_string()],
            request_timeout: Duration::from_secs(60),
        }
    }
}

struct Shared {
    pending: PendingTable,
    write_tx: mpsc::Sender<Message>,
    closed: AtomicBool,
    connected: AtomicBool,
    challenge_tx: Mutex<Option<oneshot::Sender<String>>>,
    /// A challenge that arrived before the handshake registered a waiter
    buffered_challenge: Mutex<Option<String>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
}

/// Gateway WebSocket client. Cheap to clone; all clones share the
/// connection and pending table.
#[derive(Clone)]
pub struct GatewayClient {
    shared: Arc<Shared>,
    default_timeout: Duration,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Build the `connect` request params. `session_token` is the cached
/// device token (omitted on the mismatch retry); `shared_token` is the
/// configured credential. The signature covers whichever token is
/// actually presented.
fn build_connect_params(
    identity: &DeviceIdentity,
    opts: &ConnectOptions,
    session_token: Option<&str>,
    nonce: Option<&str>,
) -> Value {
    let signed_at = now_ms();
    let presented = session_token.or(opts.token.as_deref());
    let payload = signing_payload(&SignInputs {
        device_id: identity.device_id(),
        client_id: &opts.client_id,
        mode: MODE,
        role: ROLE,
        scopes: &opts.scopes,
        signed_at_ms: signed_at,
        token: presented,
        nonce,
    });
    let signature = sign_payload(identity.signing_key(), &payload);

    let mut device = json!({
        "id": identity.device_id(),
        "publicKey": identity.public_key_b64(),
        "signature": signature,
        "signedAt": signed_at,
    });
    if let Some(nonce) = nonce {
        device["nonce"] = json!(nonce);
    }

    let mut params = json!({
        "minProtocol": MIN_PROTOCOL,
        "maxProtocol": MAX_PROTOCOL,
        "client": {
            "id": opts.client_id,
            "mode": MODE,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "role": ROLE,
        "scopes": opts.scopes,
        "device": device,
    });
    if let Some(token) = session_token {
        params["sessionToken"] = json!(token);
    }
    if opts.token.is_some() || opts.password.is_some() {
        let mut auth = serde_json::Map::new();
        if let Some(ref t) = opts.token {
            auth.insert("token".to_string(), json!(t));
        }
        if let Some(ref p) = opts.password {
            auth.insert("password".to_string(), json!(p));
        }
        params["auth"] = Value::Object(auth);
    }
    params
}

/// Pull `auth.deviceToken` (and scopes) out of a connect response.
fn extract_device_token(payload: &Value) -> Option<(String, Vec<String>)> {
    let auth = payload.get("auth")?;
    let token = auth.get("deviceToken")?.as_str()?.to_string();
    let scopes = auth
        .get("scopes")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    Some((token, scopes))
}

impl GatewayClient {
    /// Open the socket and run the device handshake.
    ///
    /// On an error containing "device token mismatch" - when a cached
    /// token was presented and a shared credential exists - the cached
    /// token is cleared and the handshake retried once with the shared
    /// credential only. A second failure is permanent for this process;
    /// keys are never rotated here.
    pub async fn connect(
        opts: ConnectOptions,
        identity: &DeviceIdentity,
        tokens: &TokenStore,
    ) -> Result<Self, GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(&opts.url).await?;
        let (mut sink, mut stream) = ws.split();

        let (write_tx, mut write_rx) = mpsc::channel::<Message>(64);
        let shared = Arc::new(Shared {
            pending: PendingTable::new(),
            write_tx,
            closed: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            challenge_tx: Mutex::new(None),
            buffered_challenge: Mutex::new(None),
            read_task: Mutex::new(None),
            write_task: Mutex::new(None),
        });

        let write_task = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let read_task = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => route_frame(&reader_shared, &text),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {} // Ping/Pong/Binary - ignore
                }
            }
            reader_shared.connected.store(false, Ordering::SeqCst);
            reader_shared.pending.flush_all("connection closed");
        });
        *shared.read_task.lock() = Some(read_task);
        *shared.write_task.lock() = Some(write_task);

        let client = Self { shared, default_timeout: opts.request_timeout };

        let cached = tokens.load(identity.device_id(), ROLE).map(|c| c.token);
        let first = client.handshake(&opts, identity, cached.as_deref()).await;
        let outcome = match first {
            Err(GatewayError::Remote(ref msg))
                if msg.contains("device token mismatch")
                    && cached.is_some()
                    && opts.token.is_some() =>
            {
                tracing::warn!("gateway: cached device token rejected, retrying with shared token");
                let _ = tokens.clear(identity.device_id(), ROLE);
                client.handshake(&opts, identity, None).await
            }
            other => other,
        };

        match outcome {
            Ok(payload) => {
                if let Some((token, scopes)) = extract_device_token(&payload) {
                    if let Err(e) = tokens.save(identity.device_id(), ROLE, &token, scopes) {
                        tracing::warn!(error = %e, "gateway: failed to cache device token");
                    }
                }
                client.shared.connected.store(true, Ordering::SeqCst);
                tracing::info!(url = %opts.url, "gateway connected");
                Ok(client)
            }
            Err(e) => {
                client.close().await;
                Err(match e {
                    GatewayError::Remote(msg) => GatewayError::Handshake(msg),
                    other => other,
                })
            }
        }
    }

    /// One handshake attempt: wait briefly for a challenge, then send the
    /// signed `connect` request.
    async fn handshake(
        &self,
        opts: &ConnectOptions,
        identity: &DeviceIdentity,
        session_token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        // The challenge may already have raced the waiter registration
        let buffered = self.shared.buffered_challenge.lock().take();
        let nonce = match buffered {
            Some(nonce) => Some(nonce),
            None => {
                let (tx, rx) = oneshot::channel();
                *self.shared.challenge_tx.lock() = Some(tx);
                tokio::select! {
                    got = rx => got.ok(),
                    _ = tokio::time::sleep(CHALLENGE_FALLBACK) => None,
                }
            }
        };
        // A late challenge has nobody to notify
        *self.shared.challenge_tx.lock() = None;

        let params = build_connect_params(identity, opts, session_token, nonce.as_deref());
        self.request_with("connect", params, CONNECT_TIMEOUT, false).await
    }

    /// Send a request and await its settling response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        self.request_with(method, params, self.default_timeout, false).await
    }

    async fn request_with(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        expect_final: bool,
    ) -> Result<Value, GatewayError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let rx = self.shared.pending.register(&id, expect_final);

        let frame = Frame::Req { id: id.clone(), method: method.to_string(), params };
        let text = serde_json::to_string(&frame)
            .map_err(|e| GatewayError::Socket(e.to_string()))?;
        if self.shared.write_tx.send(Message::Text(text.into())).await.is_err() {
            self.shared.pending.forget(&id);
            return Err(GatewayError::Closed);
        }

        let deadline = timeout.max(Duration::from_secs(1));
        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.shared.pending.forget(&id);
                Err(GatewayError::Timeout(deadline.as_millis() as u64))
            }
            Ok(Err(_)) => Err(GatewayError::Closed),
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(msg))) => Err(GatewayError::Remote(msg)),
        }
    }

    /// Execute a remote agent call. Intermediate `status:"accepted"`
    /// frames are ignored; only the final result settles.
    pub async fn agent(&self, req: AgentRequest) -> Result<AgentResult, GatewayError> {
        let overall = Duration::from_millis(u64::max(30_000, req.timeout_sec * 1000 + 30_000));
        let params = req.into_params();
        let payload = self.request_with("agent", params, overall, true).await?;
        Ok(AgentResult::from_payload(&payload))
    }

    /// Liveness probe used before registering the gateway backend.
    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.request_with("ping", json!({}), Duration::from_secs(5), false).await.map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
            && !self.shared.closed.load(Ordering::SeqCst)
    }

    /// Flush every pending request with a "closed" error and drop the
    /// socket. Subsequent operations fail immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.pending.flush_all("closed");
        let _ = self.shared.write_tx.send(Message::Close(None)).await;
        if let Some(task) = self.shared.read_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.shared.write_task.lock().take() {
            task.abort();
        }
    }
}

/// Route one inbound text frame. Unparseable frames are dropped silently.
fn route_frame(shared: &Shared, text: &str) {
    match Frame::parse(text) {
        Some(Frame::Res { id, ok, payload, error }) => {
            let message = error.and_then(|e| e.message);
            shared.pending.settle(&id, ok, payload, message);
        }
        Some(Frame::Event { event, payload }) if event == "connect.challenge" => {
            let nonce = payload
                .as_ref()
                .and_then(|p| p.get("nonce"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(nonce) = nonce {
                match shared.challenge_tx.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(nonce);
                    }
                    None => {
                        *shared.buffered_challenge.lock() = Some(nonce);
                    }
                }
            }
        }
        Some(Frame::Event { event, .. }) => {
            tracing::debug!(%event, "gateway: unhandled event");
        }
        Some(Frame::Req { .. }) | None => {}
    }
}

/// Parameters for the `agent` method.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub message: String,
    pub session_key: String,
    pub agent_id: String,
    /// Remote execution budget in seconds
    pub timeout_sec: u64,
    pub deliver: Option<bool>,
    pub channel: Option<String>,
    pub to: Option<String>,
    pub account_id: Option<String>,
    pub thread_id: Option<String>,
    pub idempotency_key: String,
}

impl AgentRequest {
    pub fn new(
        message: impl Into<String>,
        session_key: impl Into<String>,
        agent_id: impl Into<String>,
        timeout_sec: u64,
    ) -> Self {
        Self {
            message: message.into(),
            session_key: session_key.into(),
            agent_id: agent_id.into(),
            timeout_sec,
            deliver: None,
            channel: None,
            to: None,
            account_id: None,
            thread_id: None,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn into_params(self) -> Value {
        let mut params = json!({
            "message": self.message,
            "sessionKey": self.session_key,
            "agentId": self.agent_id,
            "timeout": self.timeout_sec,
            "idempotencyKey": self.idempotency_key,
        });
        if let Some(deliver) = self.deliver {
            params["deliver"] = json!(deliver);
        }
        if let Some(channel) = self.channel {
            params["channel"] = json!(channel);
        }
        if let Some(to) = self.to {
            params["to"] = json!(to);
        }
        if let Some(account_id) = self.account_id {
            params["accountId"] = json!(account_id);
        }
        if let Some(thread_id) = self.thread_id {
            params["threadId"] = json!(thread_id);
        }
        params
    }
}

/// One payload item from an agent reply.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentPayload {
    pub text: Option<String>,
    pub is_error: bool,
}

/// Defensively-extracted agent result. Each field is independently
/// type-checked; nothing beyond "the payload is an object" is assumed.
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub payloads: Vec<AgentPayload>,
    pub usage: Option<Value>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub duration_ms: Option<u64>,
}

impl AgentResult {
    pub fn from_payload(payload: &Value) -> Self {
        let result = payload.get("result").unwrap_or(payload);

        let payloads = result
            .get("payloads")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| AgentPayload {
                        text: item.get("text").and_then(Value::as_str).map(str::to_string),
                        is_error: item
                            .get("isError")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            payloads,
            usage: result.get("usage").filter(|u| u.is_object()).cloned(),
            model: result.get("model").and_then(Value::as_str).map(str::to_string),
            provider: result.get("provider").and_then(Value::as_str).map(str::to_string),
            duration_ms: result.get("durationMs").and_then(Value::as_u64),
        }
    }

    /// Non-empty text payloads joined by blank lines.
    pub fn joined_text(&self) -> String {
        self.payloads
            .iter()
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether any payload is flagged as an error.
    pub fn has_error(&self) -> bool {
        self.payloads.iter().any(|p| p.is_error)
    }

    /// Total token usage, when the gateway reported it.
    pub fn total_tokens(&self) -> Option<u64> {
        self.usage.as_ref()?.get("totalTokens").and_then(Value::as_u64)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
