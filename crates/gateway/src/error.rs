// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    Socket(String),

    #[error("gateway handshake failed: {0}")]
    Handshake(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("gateway error: {0}")]
    Remote(String),

    #[error("client closed")]
    Closed,

    #[error("device identity error: {0}")]
    Identity(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key encoding error: {0}")]
    Key(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Socket(e.to_string())
    }
}
