// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model session driver.
//!
//! The backend consumes sessions through the [`ModelSession`] trait so
//! its accumulation, stop-reason, and schema logic is testable against
//! scripted sessions. The production driver streams an OpenAI-compatible
//! chat-completions endpoint over SSE.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::auth::{requires_api_key, CredentialStore};
use crate::backend::BackendError;

/// Inputs for one streaming session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub provider: String,
    pub model: String,
    pub prompt: String,
}

/// Usage metrics reported by the session, when available.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUsage {
    pub total_tokens: Option<u64>,
    pub cost_total: Option<f64>,
}

/// Terminal session state.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    /// "end", "error", "aborted", or a provider-specific reason
    pub stop_reason: String,
    /// Last assistant message in session state, for the output fallback
    pub last_assistant_text: Option<String>,
    pub usage: SessionUsage,
}

impl SessionEnd {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self { stop_reason: reason.into(), last_assistant_text: None, usage: SessionUsage::default() }
    }
}

/// Events a session emits.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TextDelta(String),
    Completed(SessionEnd),
}

/// One in-flight model session.
#[async_trait]
pub trait ModelSession: Send {
    /// Next event; `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Abort the in-flight generation. The session completes with stop
    /// reason "aborted".
    fn abort(&mut self);
}

/// Factory for sessions.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Registration preflight: can this driver produce sessions at all?
    fn preflight(&self) -> Result<(), BackendError>;

    async fn start(&self, spec: SessionSpec) -> Result<Box<dyn ModelSession>, BackendError>;
}

/// Production driver: OpenAI-compatible SSE streaming.
pub struct SseDriver {
    store: CredentialStore,
    credentials_dir: PathBuf,
    http: reqwest::Client,
}

impl SseDriver {
    pub fn new(credentials_dir: impl Into<PathBuf>) -> Self {
        let credentials_dir = credentials_dir.into();
        Self {
            store: CredentialStore::new(&credentials_dir),
            credentials_dir,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SessionDriver for SseDriver {
    /// At least one provider credential file must exist.
    fn preflight(&self) -> Result<(), BackendError> {
        let has_provider = std::fs::read_dir(&self.credentials_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            })
            .unwrap_or(false);
        if has_provider {
            Ok(())
        } else {
            Err(BackendError::Credentials(format!(
                "no provider credentials under {}",
                self.credentials_dir.display()
            )))
        }
    }

    async fn start(&self, spec: SessionSpec) -> Result<Box<dyn ModelSession>, BackendError> {
        let creds = self.store.load(&spec.provider);
        let base_url = creds.base_url.clone().ok_or_else(|| {
            BackendError::Credentials(format!("provider {} has no baseUrl configured", spec.provider))
        })?;
        if requires_api_key(&spec.provider, Some(&base_url)) && creds.api_key.is_none() {
            return Err(BackendError::Credentials(format!(
                "provider {} requires an apiKey",
                spec.provider
            )));
        }

        let body = serde_json::json!({
            "model": spec.model,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": [{"role": "user", "content": spec.prompt}],
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(ref key) = creds.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| BackendError::Session(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Session(format!(
                "model endpoint returned {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let stream = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        Ok(Box::new(SseSession::new(stream)))
    }
}

/// One parsed SSE data line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseLine {
    Delta(String),
    Finish(String),
    Usage(SessionUsage),
    Done,
    Ignore,
}

/// Parse one line of an OpenAI-compatible SSE stream.
pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseLine::Ignore;
    };

    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        let parsed = SessionUsage {
            total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
            cost_total: usage.get("cost").and_then(Value::as_f64),
        };
        if parsed != SessionUsage::default() {
            return SseLine::Usage(parsed);
        }
    }

    let choice = value.get("choices").and_then(Value::as_array).and_then(|c| c.first());
    if let Some(choice) = choice {
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            return SseLine::Finish(reason.to_string());
        }
        if let Some(content) =
            choice.get("delta").and_then(|d| d.get("content")).and_then(Value::as_str)
        {
            return SseLine::Delta(content.to_string());
        }
    }
    SseLine::Ignore
}

/// Map a provider finish reason onto the session stop reason.
fn map_finish_reason(reason: Option<&str>) -> String {
    match reason {
        None | Some("stop") => "end".to_string(),
        Some(other) => other.to_string(),
    }
}

/// SSE-backed session.
struct SseSession {
    stream: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    line_buf: String,
    pending: VecDeque<SessionEvent>,
    abort: CancellationToken,
    finished: bool,
    finish_reason: Option<String>,
    usage: SessionUsage,
}

impl SseSession {
    fn new(stream: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> Self {
        Self {
            stream,
            line_buf: String::new(),
            pending: VecDeque::new(),
            abort: CancellationToken::new(),
            finished: false,
            finish_reason: None,
            usage: SessionUsage::default(),
        }
    }

    fn completed(&self, reason: String) -> SessionEvent {
        SessionEvent::Completed(SessionEnd {
            stop_reason: reason,
            last_assistant_text: None,
            usage: self.usage.clone(),
        })
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.line_buf.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            match parse_sse_line(line.trim_end()) {
                SseLine::Delta(text) => self.pending.push_back(SessionEvent::TextDelta(text)),
                SseLine::Finish(reason) => self.finish_reason = Some(reason),
                SseLine::Usage(usage) => self.usage = usage,
                SseLine::Done => {
                    let reason = map_finish_reason(self.finish_reason.as_deref());
                    let done = self.completed(reason);
                    self.pending.push_back(done);
                }
                SseLine::Ignore => {}
            }
        }
    }
}

#[async_trait]
impl ModelSession for SseSession {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        enum Step {
            Aborted,
            Chunk(Option<Result<Vec<u8>, reqwest::Error>>),
        }

        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, SessionEvent::Completed(_)) {
                    self.finished = true;
                }
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let step = tokio::select! {
                _ = self.abort.cancelled() => Step::Aborted,
                chunk = self.stream.next() => Step::Chunk(chunk),
            };
            match step {
                Step::Aborted => {
                    self.finished = true;
                    return Some(self.completed("aborted".to_string()));
                }
                Step::Chunk(Some(Ok(bytes))) => self.feed(&bytes),
                Step::Chunk(Some(Err(e))) => {
                    tracing::warn!(error = %e, "model: stream error");
                    self.finished = true;
                    return Some(self.completed("error".to_string()));
                }
                Step::Chunk(None) => {
                    // Stream ended without [DONE]
                    let reason = map_finish_reason(self.finish_reason.as_deref());
                    self.finished = true;
                    return Some(self.completed(reason));
                }
            }
        }
    }

    fn abort(&mut self) {
        self.abort.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
