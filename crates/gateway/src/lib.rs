// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway WebSocket client with challenge-response device authentication.
//!
//! The gateway speaks JSON text frames in three shapes (`req`, `res`,
//! `event`). Connecting performs a device handshake: the server may push a
//! `connect.challenge` event with a nonce; the client signs a canonical
//! payload with its per-host Ed25519 device key and sends a `connect`
//! request. Session tokens returned by the gateway are cached per
//! `(deviceId, role)` and reused on reconnect.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod error;
mod frame;
mod identity;
mod pending;
mod sign;
mod tokens;

pub use client::{AgentPayload, AgentRequest, AgentResult, ConnectOptions, GatewayClient};
pub use error::GatewayError;
pub use frame::{Frame, ResError};
pub use identity::DeviceIdentity;
pub use pending::PendingTable;
pub use sign::{sign_payload, signing_payload, SignInputs};
pub use tokens::{CachedToken, TokenStore};
