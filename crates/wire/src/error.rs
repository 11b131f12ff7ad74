// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire client errors.

use serde_json::Value;
use thiserror::Error;

/// Errors from the coordinator REST API.
#[derive(Debug, Error)]
pub enum WireError {
    /// Non-2xx response, with the error `code` extracted from a top-level
    /// `code` field or a nested `error.code` when present.
    #[error("coordinator returned HTTP {}{}", .status, .code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Status {
        status: u16,
        code: Option<String>,
        body: Option<Value>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push ticket response missing `ticket`")]
    MissingTicket,

    #[error("cannot derive http origin from websocket url: {0}")]
    BadOrigin(String),
}

impl WireError {
    /// Build a status error from a response body, extracting the code.
    pub fn from_status(status: u16, body: Value) -> Self {
        let code = body
            .get("code")
            .and_then(Value::as_str)
            .or_else(|| body.get("error").and_then(|e| e.get("code")).and_then(Value::as_str))
            .map(str::to_string);
        WireError::Status { status, code, body: Some(body) }
    }

    /// 409 on claim: another runner got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WireError::Status { status: 409, .. })
    }

    /// 401/403: credentials rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, WireError::Status { status: 401 | 403, .. })
    }

    /// 5xx/429 or transport failure: worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            WireError::Status { status, .. } => *status == 429 || *status >= 500,
            WireError::Transport(_) => true,
            _ => false,
        }
    }
}
