// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration resolution.
//!
//! Precedence, highest to lowest: CLI flag > environment variable > the
//! user config file at `~/.flux/config.json`. The config file is
//! expected to be mode 0600 inside a 0700 directory; looser permissions
//! get a warning, not a refusal.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Deserialize;

use flux_core::{ConfigError, GatewayConfig, RunnerConfig, TaskFilters};

/// CLI flags that override environment and file configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Coordinator base URL
    #[arg(long, global = true)]
    pub coordinator_url: Option<String>,

    /// Coordinator bearer token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Organization id
    #[arg(long, global = true)]
    pub org_id: Option<String>,

    /// Polling cadence in minutes
    #[arg(long, global = true)]
    pub cadence_minutes: Option<u64>,

    /// Push reconnect base delay in milliseconds
    #[arg(long, global = true)]
    pub push_reconnect_ms: Option<u64>,

    /// Default backend when a packet names none
    #[arg(long, global = true)]
    pub default_backend: Option<String>,

    /// Gateway WebSocket URL
    #[arg(long, global = true)]
    pub gateway_url: Option<String>,

    /// Gateway shared token
    #[arg(long, global = true)]
    pub gateway_token: Option<String>,

    /// Gateway shared password
    #[arg(long, global = true)]
    pub gateway_password: Option<String>,

    /// Remote gateway agent id
    #[arg(long, global = true)]
    pub gateway_agent_id: Option<String>,

    /// Only pull tasks for this stream
    #[arg(long, global = true)]
    pub stream_id: Option<String>,

    /// Only pull tasks for this backend
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Only pull tasks in this cost class
    #[arg(long, global = true)]
    pub cost_class: Option<String>,
}

/// Shape of `~/.flux/config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigFile {
    coordinator_url: Option<String>,
    token: Option<String>,
    org_id: Option<String>,
    machine_id: Option<String>,
    cadence_minutes: Option<u64>,
    push_reconnect_ms: Option<u64>,
    default_backend: Option<String>,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
    gateway_password: Option<String>,
    gateway_agent_id: Option<String>,
    stream_id: Option<String>,
    backend: Option<String>,
    cost_class: Option<String>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// flag > env > file, per key.
fn pick(flag: &Option<String>, env_key: &str, file: &Option<String>) -> Option<String> {
    flag.clone().or_else(|| env_string(env_key)).or_else(|| file.clone())
}

fn pick_u64(flag: &Option<u64>, env_key: &str, file: &Option<u64>) -> Option<u64> {
    (*flag).or_else(|| env_u64(env_key)).or(*file)
}

#[cfg(unix)]
fn check_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o077;
        if mode != 0 {
            tracing::warn!(
                path = %path.display(),
                "config file is readable by other users; expected mode 0600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) {}

fn config_file_path() -> PathBuf {
    flux_daemon::env::state_dir().join("config.json")
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    check_permissions(path);
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Resolve the full runner configuration.
pub fn load(overrides: &Overrides) -> Result<RunnerConfig, ConfigError> {
    load_from(overrides, &config_file_path())
}

fn load_from(overrides: &Overrides, file_path: &Path) -> Result<RunnerConfig, ConfigError> {
    let file = read_config_file(file_path)?;

    let base_url = pick(&overrides.coordinator_url, "FLUX_COORDINATOR_URL", &file.coordinator_url)
        .unwrap_or_default();
    let token = pick(&overrides.token, "FLUX_TOKEN", &file.token).unwrap_or_default();
    let org_id = pick(&overrides.org_id, "FLUX_ORG_ID", &file.org_id).unwrap_or_default();

    let mut config = RunnerConfig::new(base_url, token, org_id);
    if let Some(machine_id) = env_string("FLUX_MACHINE_ID").or(file.machine_id) {
        config.machine_id = machine_id;
    }
    if let Some(cadence) =
        pick_u64(&overrides.cadence_minutes, "FLUX_CADENCE_MINUTES", &file.cadence_minutes)
    {
        config.cadence_minutes = cadence;
    }
    if let Some(reconnect) =
        pick_u64(&overrides.push_reconnect_ms, "FLUX_PUSH_RECONNECT_MS", &file.push_reconnect_ms)
    {
        config.push_reconnect_ms = reconnect;
    }
    config.default_backend =
        pick(&overrides.default_backend, "FLUX_DEFAULT_BACKEND", &file.default_backend);

    config.filters = TaskFilters {
        stream_id: pick(&overrides.stream_id, "FLUX_STREAM_ID", &file.stream_id),
        backend: pick(&overrides.backend, "FLUX_BACKEND", &file.backend),
        cost_class: pick(&overrides.cost_class, "FLUX_COST_CLASS", &file.cost_class),
    };

    if let Some(url) = pick(&overrides.gateway_url, "FLUX_GATEWAY_URL", &file.gateway_url) {
        config.gateway = Some(GatewayConfig {
            url,
            token: pick(&overrides.gateway_token, "FLUX_GATEWAY_TOKEN", &file.gateway_token),
            password: pick(
                &overrides.gateway_password,
                "FLUX_GATEWAY_PASSWORD",
                &file.gateway_password,
            ),
            agent_id: pick(
                &overrides.gateway_agent_id,
                "FLUX_GATEWAY_AGENT_ID",
                &file.gateway_agent_id,
            ),
        });
    }

    config.validate()?;
    Ok(config)
}

/// Secret-free view for `flux config`.
pub fn redacted(config: &RunnerConfig) -> serde_json::Value {
    serde_json::json!({
        "coordinatorUrl": config.base_url,
        "token": "<redacted>",
        "orgId": config.org_id,
        "runnerType": config.runner_type,
        "runnerVersion": config.runner_version,
        "runnerInstanceId": config.runner_instance_id,
        "machineId": config.machine_id,
        "cadenceMinutes": config.cadence_minutes,
        "pushReconnectMs": config.push_reconnect_ms,
        "defaultBackend": config.default_backend,
        "filters": config.filters,
        "gateway": config.gateway.as_ref().map(|gw| serde_json::json!({
            "url": gw.url,
            "token": gw.token.as_ref().map(|_| "<redacted>"),
            "password": gw.password.as_ref().map(|_| "<redacted>"),
            "agentId": gw.agent_id,
        })),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
