// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached gateway session tokens, keyed by `deviceId:role`.
//!
//! The most recent successful handshake overwrites the entry; an explicit
//! "device token mismatch" from the gateway clears it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// One cached session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub updated_at_ms: u64,
}

/// On-disk token cache (`device-tokens.json`, mode 0600).
pub struct TokenStore {
    path: PathBuf,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(unix)]
fn restrict(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key(device_id: &str, role: &str) -> String {
        format!("{device_id}:{role}")
    }

    fn read_all(&self) -> HashMap<String, CachedToken> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn write_all(&self, map: &HashMap<String, CachedToken>) -> Result<(), GatewayError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json =
            serde_json::to_string_pretty(map).map_err(|e| GatewayError::Identity(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        restrict(&self.path)?;
        Ok(())
    }

    /// The cached token for `(deviceId, role)`, if any.
    pub fn load(&self, device_id: &str, role: &str) -> Option<CachedToken> {
        self.read_all().remove(&Self::key(device_id, role))
    }

    /// Store a token from a successful handshake, stamping `updatedAtMs`.
    pub fn save(
        &self,
        device_id: &str,
        role: &str,
        token: &str,
        scopes: Vec<String>,
    ) -> Result<(), GatewayError> {
        let mut map = self.read_all();
        map.insert(
            Self::key(device_id, role),
            CachedToken { token: token.to_string(), scopes, updated_at_ms: now_ms() },
        );
        self.write_all(&map)
    }

    /// Drop a token after an explicit mismatch.
    pub fn clear(&self, device_id: &str, role: &str) -> Result<(), GatewayError> {
        let mut map = self.read_all();
        if map.remove(&Self::key(device_id, role)).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_load_clear_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("device-tokens.json"));

        assert!(store.load("dev-1", "operator").is_none());

        store.save("dev-1", "operator", "tok-a", vec!["agent".to_string()]).unwrap();
        let cached = store.load("dev-1", "operator").unwrap();
        assert_eq!(cached.token, "tok-a");
        assert_eq!(cached.scopes, vec!["agent".to_string()]);
        assert!(cached.updated_at_ms > 0);

        // Different role is a different slot
        assert!(store.load("dev-1", "viewer").is_none());

        store.clear("dev-1", "operator").unwrap();
        assert!(store.load("dev-1", "operator").is_none());
    }

    #[test]
    fn newest_save_wins() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("device-tokens.json"));
        store.save("dev-1", "operator", "old", vec![]).unwrap();
        store.save("dev-1", "operator", "new", vec![]).unwrap();
        assert_eq!(store.load("dev-1", "operator").unwrap().token, "new");
    }

    #[test]
    fn corrupt_cache_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device-tokens.json");
        std::fs::write(&path, "{broken").unwrap();
        let store = TokenStore::new(&path);
        assert!(store.load("dev-1", "operator").is_none());
        // And a save repairs the file
        store.save("dev-1", "operator", "tok", vec![]).unwrap();
        assert_eq!(store.load("dev-1", "operator").unwrap().token, "tok");
    }
}
