// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup wiring, signal handling, graceful shutdown.
//!
//! Startup order: verify credentials, handshake, register backends, then
//! spawn the cadence loop and (when the server offers a WebSocket) the
//! push client. A runner with zero registered backends refuses to start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use flux_core::RunnerConfig;
use flux_gateway::{ConnectOptions, DeviceIdentity, GatewayClient, TokenStore};
use flux_wire::{ClaimRequest, HandshakeRequest, WireClient, WireError};

use crate::backend::{
    BackendRegistry, GatewayBackend, ModelBackend, SseDriver, SubprocessBackend,
};
use crate::cadence::CadenceLoop;
use crate::dispatch::DispatchContext;
use crate::executor::{ExecutorConfig, TaskExecutor};
use crate::push::{PushClient, TicketSource};

/// Process-fatal startup errors. Anything here exits with code 1.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] flux_core::ConfigError),

    #[error("coordinator unreachable: {0}")]
    Wire(#[from] WireError),

    #[error("no execution backend could be registered")]
    NoBackends,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mints push tickets through the coordinator REST API.
struct WireTicketSource {
    wire: Arc<WireClient>,
    request: HandshakeRequest,
    filters: serde_json::Value,
}

#[async_trait]
impl TicketSource for WireTicketSource {
    async fn mint(&self, ws_url: &str) -> Result<String, WireError> {
        self.wire.mint_push_ticket(ws_url, &self.filters, &self.request).await
    }
}

fn machine_id_or_hostname(configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run the daemon to termination. Returns when a shutdown signal has
/// been handled; any error is a startup failure.
pub async fn run_daemon(config: RunnerConfig) -> Result<(), LifecycleError> {
    config.validate()?;
    let state_dir = crate::env::state_dir();
    let machine_id = machine_id_or_hostname(&config.machine_id);

    let wire = Arc::new(WireClient::new(&config.base_url, &config.token));

    // 1. Verify credentials
    let who = wire.whoami().await?;
    info!(
        agent = %who.agent.slug,
        server = %who.server.version,
        "coordinator credentials verified"
    );

    // 2. Handshake: announce this runner, learn the push config
    let handshake_req = HandshakeRequest {
        runner_type: config.runner_type.clone(),
        runner_version: config.runner_version.clone(),
        machine_id: machine_id.clone(),
        runner_instance_id: config.runner_instance_id.clone(),
        backend: config.default_backend.clone(),
    };
    let handshake = wire.handshake(&handshake_req).await?;
    info!(
        agent_id = %handshake.agent_id,
        runner_instance_id = %config.runner_instance_id,
        %machine_id,
        "handshake complete"
    );
    if let Err(e) = wire.hello(&handshake_req).await {
        warn!(error = %e, "hello failed (non-fatal)");
    }

    // 3. Register backends
    let mut registry = BackendRegistry::new();
    if crate::env::subprocess_backends_enabled() {
        registry.register(Arc::new(SubprocessBackend::claude()));
        registry.register(Arc::new(SubprocessBackend::codex()));
    } else {
        info!("subprocess backends disabled by flag");
    }

    let model = ModelBackend::new(SseDriver::new(state_dir.join("credentials")));
    match model.preflight() {
        Ok(()) => registry.register(Arc::new(model)),
        Err(e) => info!(reason = %e, "model backend not registered"),
    }

    let mut gateway_client = None;
    if let Some(ref gw) = config.gateway {
        match connect_gateway(&config, gw, &state_dir).await {
            Ok(client) => {
                registry.register(Arc::new(GatewayBackend::new(
                    client.clone(),
                    config.org_id.clone(),
                    gw.agent_id.clone(),
                )));
                gateway_client = Some(client);
            }
            Err(e) => warn!(error = %e, "gateway backend not registered"),
        }
    }

    if registry.is_empty() {
        return Err(LifecycleError::NoBackends);
    }

    // 4. Executor and cadence loop
    let dispatch = DispatchContext::new();
    let executor = Arc::new(TaskExecutor::new(
        Arc::clone(&wire),
        registry,
        dispatch.clone(),
        ExecutorConfig {
            claim: ClaimRequest {
                runner_instance_id: config.runner_instance_id.clone(),
                machine_id: machine_id.clone(),
                runner_type: config.runner_type.clone(),
                runner_version: config.runner_version.clone(),
            },
            heartbeat_interval: crate::env::heartbeat_interval(),
            default_backend: config.default_backend.clone(),
        },
    ));
    let cadence = CadenceLoop::new(
        Arc::clone(&wire),
        Arc::clone(&executor),
        dispatch,
        Duration::from_secs(config.cadence_minutes * 60),
        config.filters.clone(),
    );
    let (cadence_handle, cadence_join) = cadence.spawn();

    // 5. Push client, when the server offers a WebSocket
    let push_handle = match handshake.push_ws_url() {
        Some(ws_url) => {
            let tickets = Arc::new(WireTicketSource {
                wire: Arc::clone(&wire),
                request: handshake_req.clone(),
                filters: json!({
                    "streamId": config.filters.stream_id,
                    "backend": config.filters.backend,
                    "costClass": config.filters.cost_class,
                }),
            });
            let trigger = cadence_handle.clone();
            let client = PushClient::new(
                ws_url,
                config.push_reconnect_ms,
                tickets,
                move |_payload| trigger.trigger_now(),
            );
            Some(client.spawn())
        }
        None => {
            info!("push not offered, polling only");
            None
        }
    };

    info!("runner started");

    // 6. Wait for a shutdown signal
    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    // 7. Graceful shutdown: no new drains, bounded wait for in-flight
    // work, then kill what remains and say goodbye.
    if let Some(ref push) = push_handle {
        push.stop();
    }
    cadence_handle.stop();
    executor.wait_idle(crate::env::drain_grace()).await;
    executor.cancel_all();
    executor.wait_idle(Duration::from_secs(10)).await;

    if let Some(client) = gateway_client {
        client.close().await;
    }
    let _ = cadence_join.await;
    if let Some(ref push) = push_handle {
        push.join().await;
    }

    if let Err(e) = wire.disconnect(&handshake_req).await {
        warn!(error = %e, "disconnect failed (non-fatal)");
    }

    info!("runner stopped");
    Ok(())
}

/// Connect the gateway client and probe it before registration.
async fn connect_gateway(
    config: &RunnerConfig,
    gw: &flux_core::GatewayConfig,
    state_dir: &std::path::Path,
) -> Result<GatewayClient, String> {
    let identity = DeviceIdentity::load_or_generate(state_dir.join("device.json"))
        .map_err(|e| e.to_string())?;
    let tokens = TokenStore::new(state_dir.join("device-tokens.json"));

    let mut opts = ConnectOptions::new(&gw.url, &config.runner_instance_id);
    opts.token = gw.token.clone();
    opts.password = gw.password.clone();

    let client = GatewayClient::connect(opts, &identity, &tokens)
        .await
        .map_err(|e| e.to_string())?;
    client.ping().await.map_err(|e| format!("health ping failed: {e}"))?;
    Ok(client)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler, relying on SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
