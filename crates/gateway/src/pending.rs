// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending request table for the gateway client.
//!
//! Requests are correlated to responses by id. A response whose payload
//! carries `status == "accepted"` is an intermediate acknowledgement for
//! calls that expect a final result; it must not settle the call.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

struct PendingCall {
    tx: oneshot::Sender<Result<Value, String>>,
    expect_final: bool,
}

/// Table of in-flight requests, shared between callers and the read loop.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<String, PendingCall>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing request. The receiver resolves when a
    /// settling response arrives (or the table is flushed).
    pub fn register(
        &self,
        id: impl Into<String>,
        expect_final: bool,
    ) -> oneshot::Receiver<Result<Value, String>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id.into(), PendingCall { tx, expect_final });
        rx
    }

    /// Route a `res` frame. Returns `true` when a pending call settled.
    ///
    /// An `ok` response with `payload.status == "accepted"` on an
    /// expect-final call is informational and leaves the entry in place.
    pub fn settle(&self, id: &str, ok: bool, payload: Option<Value>, error: Option<String>) -> bool {
        let mut inner = self.inner.lock();
        let Some(call) = inner.get(id) else {
            return false;
        };

        if call.expect_final && ok && is_accepted(payload.as_ref()) {
            tracing::debug!(%id, "intermediate accepted frame, call still pending");
            return false;
        }

        // Settle: remove and resolve
        if let Some(call) = inner.remove(id) {
            let result = if ok {
                Ok(payload.unwrap_or(Value::Null))
            } else {
                Err(error.unwrap_or_else(|| "request failed".to_string()))
            };
            let _ = call.tx.send(result);
            return true;
        }
        false
    }

    /// Remove an entry without resolving it (request timed out locally).
    pub fn forget(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    /// Reject every pending call with `reason` and empty the table.
    pub fn flush_all(&self, reason: &str) {
        let drained: Vec<PendingCall> = {
            let mut inner = self.inner.lock();
            inner.drain().map(|(_, call)| call).collect()
        };
        for call in drained {
            let _ = call.tx.send(Err(reason.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

fn is_accepted(payload: Option<&Value>) -> bool {
    payload
        .and_then(|p| p.get("status"))
        .and_then(Value::as_str)
        .is_some_and(|s| s == "accepted")
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
