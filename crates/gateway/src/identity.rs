// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host device identity.
//!
//! A single Ed25519 keypair is generated on first use and persisted as
//! PEM in the state directory. The device id is the SHA-256 hex digest of
//! the raw public key bytes, so it is stable across restarts as long as
//! the key file survives.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use pkcs8::LineEnding;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceFile {
    device_id: String,
    private_key_pem: String,
    public_key_pem: String,
}

/// Per-host Ed25519 device identity.
pub struct DeviceIdentity {
    device_id: String,
    signing_key: SigningKey,
    path: PathBuf,
}

/// SHA-256 hex of the raw public key bytes.
fn derive_device_id(key: &SigningKey) -> String {
    let digest = Sha256::digest(key.verifying_key().to_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl DeviceIdentity {
    /// Load the identity from `path`, generating and persisting a fresh
    /// keypair when the file does not exist. The file is written `0600`
    /// in a `0700` directory.
    pub fn load_or_generate(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let device_id = derive_device_id(&signing_key);

        let private_key_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| GatewayError::Key(e.to_string()))?
            .to_string();
        let public_key_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| GatewayError::Key(e.to_string()))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
            restrict_permissions(dir, 0o700)?;
        }
        let file = DeviceFile { device_id: device_id.clone(), private_key_pem, public_key_pem };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| GatewayError::Identity(e.to_string()))?;
        std::fs::write(&path, json)?;
        restrict_permissions(&path, 0o600)?;

        tracing::info!(%device_id, path = %path.display(), "generated device identity");
        Ok(Self { device_id, signing_key, path })
    }

    fn load(path: PathBuf) -> Result<Self, GatewayError> {
        let text = std::fs::read_to_string(&path)?;
        let file: DeviceFile = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Identity(format!("{}: {e}", path.display())))?;
        let signing_key = SigningKey::from_pkcs8_pem(&file.private_key_pem)
            .map_err(|e| GatewayError::Key(e.to_string()))?;

        // The id is always re-derived from the key; a stale deviceId field
        // in the file loses to the key material.
        let device_id = derive_device_id(&signing_key);
        if device_id != file.device_id {
            tracing::warn!(
                stored = %file.device_id,
                derived = %device_id,
                "device file id does not match key, using derived id"
            );
        }
        Ok(Self { device_id, signing_key, path })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Raw public key, base64url without padding, as sent in the `device`
    /// block of the connect request.
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
