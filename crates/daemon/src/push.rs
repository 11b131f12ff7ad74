// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push client - WebSocket subscriber for `task.available` nudges.
//!
//! Authentication is a one-shot ticket minted over REST and consumed as
//! a query parameter; the ticket is re-minted on every reconnect. On any
//! disconnect or handshake error the client reconnects with exponential
//! backoff, reset on a successful open.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use flux_wire::WireError;

/// Ping cadence while the socket is open.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Reconnect backoff ceiling.
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// A socket with no traffic (not even pongs) for this long is dead.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Delay before reconnect attempt `attempt`: `base · 2^attempt`, capped
/// at 30 s. Attempt 0 is the base delay.
pub fn reconnect_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay = base_ms.saturating_mul(factor).min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(delay)
}

/// Append the one-shot ticket to the subscription URL.
fn ticket_url(ws_url: &str, ticket: &str) -> String {
    let sep = if ws_url.contains('?') { '&' } else { '?' };
    format!("{ws_url}{sep}ticket={}", urlencoding::encode(ticket))
}

/// Extract the payload of a `task.available` frame. Anything else -
/// including unparseable text - is `None`, silently.
fn parse_push_frame(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    (value.get("type").and_then(Value::as_str) == Some("task.available")).then_some(value)
}

/// Source of push tickets (the wire client in production).
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn mint(&self, ws_url: &str) -> Result<String, WireError>;
}

/// Control handle for a running push client.
pub struct PushHandle {
    closed: CancellationToken,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PushHandle {
    /// Suppress reconnects and close the socket. Further events are
    /// ignored.
    pub fn stop(&self) {
        self.closed.cancel();
    }

    pub async fn join(&self) {
        let task = self.join.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// The push subscriber.
pub struct PushClient {
    ws_url: String,
    base_delay_ms: u64,
    tickets: Arc<dyn TicketSource>,
    on_task: Arc<dyn Fn(Value) + Send + Sync>,
}

enum SessionEndReason {
    Stopped,
    Disconnected,
}

impl PushClient {
    pub fn new(
        ws_url: impl Into<String>,
        base_delay_ms: u64,
        tickets: Arc<dyn TicketSource>,
        on_task: impl Fn(Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            base_delay_ms: base_delay_ms.max(250),
            tickets,
            on_task: Arc::new(on_task),
        }
    }

    /// Spawn the subscriber loop.
    pub fn spawn(self) -> Arc<PushHandle> {
        let closed = CancellationToken::new();
        let handle = Arc::new(PushHandle { closed: closed.clone(), join: Mutex::new(None) });
        let task = tokio::spawn(self.run(closed));
        *handle.join.lock() = Some(task);
        handle
    }

    async fn run(self, closed: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if closed.is_cancelled() {
                break;
            }
            if attempt > 0 {
                let delay = reconnect_delay(self.base_delay_ms, attempt - 1);
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "push client: reconnect scheduled");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = closed.cancelled() => break,
                }
            }

            match self.connect_and_read(&closed).await {
                Ok(SessionEndReason::Stopped) => break,
                Ok(SessionEndReason::Disconnected) => {
                    attempt = 1; // the session was open: backoff restarts
                }
                Err(e) => {
                    tracing::warn!(error = %e, "push client: connect failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        tracing::info!("push client: stopped");
    }

    /// One connect-and-read session. `Ok` means the session opened.
    async fn connect_and_read(
        &self,
        closed: &CancellationToken,
    ) -> Result<SessionEndReason, String> {
        let ticket =
            self.tickets.mint(&self.ws_url).await.map_err(|e| format!("ticket mint: {e}"))?;
        let url = ticket_url(&self.ws_url, &ticket);

        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| format!("handshake: {e}"))?;
        tracing::info!("push client: connected");

        let (mut sink, mut stream) = ws.split();
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = closed.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEndReason::Stopped);
                }
                _ = ping.tick() => {
                    let frame = r#"{"type":"ping"}"#.to_string();
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        return Ok(SessionEndReason::Disconnected);
                    }
                }
                msg = tokio::time::timeout(IDLE_TIMEOUT, stream.next()) => {
                    let msg = match msg {
                        Err(_) => {
                            tracing::warn!("push client: idle timeout, reconnecting");
                            return Ok(SessionEndReason::Disconnected);
                        }
                        Ok(msg) => msg,
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(payload) = parse_push_frame(&text) {
                                tracing::debug!("push client: task.available");
                                (self.on_task)(payload);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("push client: server closed");
                            return Ok(SessionEndReason::Disconnected);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "push client: read error");
                            return Ok(SessionEndReason::Disconnected);
                        }
                        _ => {} // Ping/Pong/Binary - traffic resets the idle clock
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
