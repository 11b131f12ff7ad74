// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical signing payload for the gateway device handshake.
//!
//! The payload is a pipe-delimited string; the signature is Ed25519 over
//! its UTF-8 bytes, base64url-encoded without padding. The `v2` variant
//! appends the server challenge nonce.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};

/// Inputs to the canonical payload. One struct so the caller cannot get
/// the field order wrong.
#[derive(Debug, Clone)]
pub struct SignInputs<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub mode: &'a str,
    pub role: &'a str,
    pub scopes: &'a [String],
    pub signed_at_ms: u64,
    pub token: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

/// Build the canonical payload string.
///
/// Without a nonce:
/// `v1|<deviceId>|<clientId>|<mode>|<role>|<scope,csv>|<signedAtMs>|<token-or-empty>`
///
/// With a nonce the `v2` variant appends `|<nonce>`.
pub fn signing_payload(inputs: &SignInputs<'_>) -> String {
    let scopes = inputs.scopes.join(",");
    let token = inputs.token.unwrap_or("");
    match inputs.nonce {
        None => format!(
            "v1|{}|{}|{}|{}|{}|{}|{}",
            inputs.device_id,
            inputs.client_id,
            inputs.mode,
            inputs.role,
            scopes,
            inputs.signed_at_ms,
            token
        ),
        Some(nonce) => format!(
            "v2|{}|{}|{}|{}|{}|{}|{}|{}",
            inputs.device_id,
            inputs.client_id,
            inputs.mode,
            inputs.role,
            scopes,
            inputs.signed_at_ms,
            token,
            nonce
        ),
    }
}

/// Sign a payload with the device key: Ed25519 over the UTF-8 bytes,
/// base64url without padding.
pub fn sign_payload(key: &SigningKey, payload: &str) -> String {
    let signature = key.sign(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(signature.to_bytes())
}

#[cfg(test)]
#[path = "sign_tests.rs"]
mod tests;
