// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider credential resolution for the model backend.
//!
//! Credentials live in per-provider JSON files under the runner state
//! directory (`credentials/<provider>.json`). An API key is required
//! unless the provider authenticates through ambient cloud identity or
//! the endpoint is loopback.

use std::path::PathBuf;

use serde::Deserialize;

/// Providers that authenticate through ambient cloud identity rather
/// than an API key.
const CLOUD_NATIVE_PROVIDERS: &[&str] = &["bedrock", "amazon-bedrock", "aws"];

/// Loopback hosts that never need a key.
const LOOPBACK_HOSTS: &[&str] = &["127.0.0.1", "localhost", "0.0.0.0"];

/// Stored credentials for one provider.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Directory of `<provider>.json` credential files.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load credentials for a provider; a missing or malformed file
    /// yields empty credentials.
    pub fn load(&self, provider: &str) -> ProviderCredentials {
        let path = self.dir.join(format!("{provider}.json"));
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }
}

/// Host portion of a URL, without userinfo or port.
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    Some(host.split(':').next().unwrap_or(host))
}

/// Whether a provider/endpoint combination requires an API key.
pub fn requires_api_key(provider: &str, base_url: Option<&str>) -> bool {
    if CLOUD_NATIVE_PROVIDERS.contains(&provider.to_ascii_lowercase().as_str()) {
        return false;
    }
    if let Some(host) = base_url.and_then(url_host) {
        if LOOPBACK_HOSTS.contains(&host) {
            return false;
        }
    }
    true
}
