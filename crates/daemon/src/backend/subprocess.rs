// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess backend - spawns an external agent CLI and collects its
//! JSON-enveloped output.
//!
//! The child runs with a whitelisted environment: coordinator and
//! gateway secrets never cross the process boundary.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, ExecuteOutcome, ExecuteRequest};

/// Grace window between SIGTERM and SIGKILL on cancel.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Environment variables forwarded to the child. Exact set, nothing
/// else; the binary-override variable is appended per backend.
const ENV_WHITELIST: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "TERM"];

/// How much of a stream to keep when reporting a failure.
const TAIL_CHARS: usize = 2000;

/// A CLI-based execution backend.
pub struct SubprocessBackend {
    id: &'static str,
    binary: &'static str,
    /// Env var that overrides binary resolution
    env_override: &'static str,
    /// Standard install locations checked before falling back to PATH
    install_paths: &'static [&'static str],
}

impl SubprocessBackend {
    pub fn claude() -> Self {
        Self {
            id: "claude-cli",
            binary: "claude",
            env_override: "FLUX_CLAUDE_BIN",
            install_paths: &[
                "/usr/local/bin/claude",
                "/opt/homebrew/bin/claude",
                "~/.local/bin/claude",
            ],
        }
    }

    pub fn codex() -> Self {
        Self {
            id: "codex-cli",
            binary: "codex",
            env_override: "FLUX_CODEX_BIN",
            install_paths: &[
                "/usr/local/bin/codex",
                "/opt/homebrew/bin/codex",
                "~/.local/bin/codex",
            ],
        }
    }

    /// Resolve the binary: env override, then known install locations,
    /// then the bare name (PATH lookup at spawn).
    fn resolve_binary(&self) -> PathBuf {
        if let Ok(path) = std::env::var(self.env_override) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        for candidate in self.install_paths {
            let expanded = expand_home(candidate);
            if expanded.is_file() {
                return expanded;
            }
        }
        PathBuf::from(self.binary)
    }

    /// The whitelisted environment for the child.
    fn child_env(&self) -> Vec<(String, String)> {
        ENV_WHITELIST
            .iter()
            .chain(std::iter::once(&self.env_override))
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect()
    }

    fn build_args(&self, req: &ExecuteRequest) -> Vec<String> {
        let mut args = vec!["-p".to_string(), req.prompt.clone()];
        if let Some(ref model) = req.packet.execution.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--output-format".to_string());
        args.push("json".to_string());
        if let Some(ref tools) = req.packet.execution.allowed_tools {
            if !tools.is_empty() {
                args.push("--allowedTools".to_string());
                args.push(tools.join(","));
            }
        }
        args
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Last `limit` characters of a stream, on a char boundary.
fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// SIGTERM the child, escalating to SIGKILL after the grace window.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            tracing::debug!(%pid, error = %e, "subprocess: SIGTERM failed");
        }
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = tokio::time::sleep(KILL_GRACE) => {
            tracing::warn!("subprocess: child survived SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
        }
    }
}

/// Unwrap a CLI's JSON envelope.
///
/// Heuristic, preserved exactly for coordinator compatibility: parse the
/// whole text as JSON and return the inner `result`/`response` string
/// when that string itself parses as JSON; otherwise return the whole
/// text when it is valid JSON; otherwise return the first `{...}` block
/// when parseable; otherwise the trimmed raw text.
pub(crate) fn unwrap_cli_output(stdout: &str) -> String {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["result", "response"] {
            if let Some(inner) = value.get(key).and_then(serde_json::Value::as_str) {
                if serde_json::from_str::<serde_json::Value>(inner).is_ok() {
                    return inner.to_string();
                }
            }
        }
        return trimmed.to_string();
    }

    if let Some(block) = first_json_block(trimmed) {
        return block.to_string();
    }
    trimmed.to_string()
}

/// The `{...}` span from the first opening brace to the last closing
/// brace, when it parses as JSON.
fn first_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &text[start..=end];
    serde_json::from_str::<serde_json::Value>(candidate).ok()?;
    Some(candidate)
}

#[async_trait]
impl Backend for SubprocessBackend {
    fn id(&self) -> &'static str {
        self.id
    }

    fn can_execute(&self, backend: &str) -> bool {
        backend == self.id
    }

    async fn execute(
        &self,
        req: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, BackendError> {
        let binary = self.resolve_binary();
        let args = self.build_args(&req);

        tracing::info!(
            task_id = %req.packet.task_id,
            binary = %binary.display(),
            "subprocess: spawning"
        );

        let mut child = Command::new(&binary)
            .args(&args)
            .env_clear()
            .envs(self.child_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;

        // Drain stdio concurrently so the child never blocks on a full pipe
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            tracing::info!(task_id = %req.packet.task_id, "subprocess: cancel requested");
            terminate(&mut child).await;
            stdout_task.abort();
            stderr_task.abort();
            return Ok(ExecuteOutcome::cancelled());
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if !status.success() {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            tracing::warn!(
                task_id = %req.packet.task_id,
                code = status.code().unwrap_or(-1),
                "subprocess: non-zero exit"
            );
            return Ok(ExecuteOutcome::failed(format!(
                "exit {}: {}",
                status.code().unwrap_or(-1),
                tail(detail.trim(), TAIL_CHARS)
            )));
        }

        Ok(ExecuteOutcome::done(unwrap_cli_output(&stdout)).with_nonempty_output())
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
