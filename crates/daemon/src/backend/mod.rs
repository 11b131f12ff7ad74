// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution backends.
//!
//! A backend turns a prompt into output. Backends are compiled in and
//! registered in a fixed order at startup; resolution walks that order
//! and picks the first backend that claims the requested name.

mod gateway;
pub mod model;
mod subprocess;

pub use gateway::{GatewayBackend, GATEWAY_BACKEND_ID};
pub use model::{ModelBackend, SseDriver};
pub use subprocess::SubprocessBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flux_core::{TaskPacket, TaskStatus, CANCELLED_OUTPUT, EMPTY_OUTPUT};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors a backend can raise. The executor treats any of them as
/// terminal for the task.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway error: {0}")]
    Gateway(#[from] flux_gateway::GatewayError),

    #[error("model session error: {0}")]
    Session(String),

    #[error("missing credentials: {0}")]
    Credentials(String),
}

/// Everything a backend needs to run one task.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub packet: TaskPacket,
    /// Rendered prompt text (opaque to the backend)
    pub prompt: String,
    /// Normalised backend name the task asked for
    pub backend: String,
    /// Resolved per-task timeout
    pub timeout: Duration,
}

/// Terminal result of one backend execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    pub status: TaskStatus,
    pub output: String,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

impl ExecuteOutcome {
    pub fn done(output: impl Into<String>) -> Self {
        Self { status: TaskStatus::Done, output: output.into(), tokens_used: None, cost_usd: None }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: output.into(),
            tokens_used: None,
            cost_usd: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: TaskStatus::Cancelled,
            output: CANCELLED_OUTPUT.to_string(),
            tokens_used: None,
            cost_usd: None,
        }
    }

    /// Completion bodies must carry non-empty output: substitute the
    /// placeholder when a backend produced nothing.
    pub fn with_nonempty_output(mut self) -> Self {
        if self.output.trim().is_empty() {
            self.output = match self.status {
                TaskStatus::Cancelled => CANCELLED_OUTPUT.to_string(),
                _ => EMPTY_OUTPUT.to_string(),
            };
        }
        self
    }
}

/// A pluggable task executor.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable backend id, used for registration logs and escalation
    /// decisions.
    fn id(&self) -> &'static str;

    /// Whether this backend handles the (normalised) backend name.
    fn can_execute(&self, backend: &str) -> bool;

    /// Run one task to a terminal outcome.
    ///
    /// Implementations observe `cancel` cooperatively: abort in-flight
    /// I/O, signal child processes, and return promptly. A cancelled
    /// execution yields `TaskStatus::Cancelled` regardless of what the
    /// underlying call returned.
    async fn execute(
        &self,
        req: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, BackendError>;
}

/// Ordered set of registered backends.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        tracing::info!(backend = backend.id(), "backend registered");
        self.backends.push(backend);
    }

    /// First registered backend that claims `name`, in registration order.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.can_execute(name)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str, &'static [&'static str]);

    #[async_trait]
    impl Backend for Stub {
        fn id(&self) -> &'static str {
            self.0
        }

        fn can_execute(&self, backend: &str) -> bool {
            self.1.contains(&backend)
        }

        async fn execute(
            &self,
            _req: ExecuteRequest,
            _cancel: CancellationToken,
        ) -> Result<ExecuteOutcome, BackendError> {
            Ok(ExecuteOutcome::done("stub"))
        }
    }

    #[test]
    fn resolution_follows_registration_order() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Stub("first", &["shared", "only-first"])));
        registry.register(Arc::new(Stub("second", &["shared", "only-second"])));

        assert_eq!(registry.resolve("shared").unwrap().id(), "first");
        assert_eq!(registry.resolve("only-second").unwrap().id(), "second");
        assert!(registry.resolve("unknown").is_none());
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = BackendRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("claude-cli").is_none());
    }

    #[test]
    fn outcome_output_substitution() {
        let done = ExecuteOutcome::done("  ").with_nonempty_output();
        assert_eq!(done.output, flux_core::EMPTY_OUTPUT);

        let cancelled = ExecuteOutcome {
            status: flux_core::TaskStatus::Cancelled,
            output: String::new(),
            tokens_used: None,
            cost_usd: None,
        }
        .with_nonempty_output();
        assert_eq!(cancelled.output, flux_core::CANCELLED_OUTPUT);

        let kept = ExecuteOutcome::done("real output").with_nonempty_output();
        assert_eq!(kept.output, "real output");
    }
}
