// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cadence loop - the periodic/triggered drainer.
//!
//! A drain lists ready tasks and hands each packet to the executor,
//! sequentially, so the per-packet claim race and WIP gate settle before
//! the next packet is attempted. Overlap is suppressed with a single
//! `dispatching` flag; triggers that land mid-drain set `pending_recheck`
//! and the drain re-runs immediately after settling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use flux_core::TaskFilters;
use flux_wire::{Coordinator, TaskQuery, WireError};

use crate::dispatch::DispatchContext;
use crate::executor::TaskExecutor;

/// Page size for the drain query.
const DRAIN_PAGE_LIMIT: u32 = 20;

/// Floor for the periodic tick.
const MIN_TICK: Duration = Duration::from_secs(1);

#[derive(Default)]
struct LoopState {
    dispatching: bool,
    pending_recheck: bool,
    /// Server-suggested delay until the next poll
    next_poll: Option<Duration>,
}

/// Handle used by the push client and the supervisor.
#[derive(Clone)]
pub struct CadenceHandle {
    notify: Arc<Notify>,
    state: Arc<Mutex<LoopState>>,
    stop: CancellationToken,
}

impl CadenceHandle {
    /// Ask for a drain now. Mid-drain triggers coalesce into one
    /// follow-up drain.
    pub fn trigger_now(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                state.pending_recheck = true;
                return;
            }
        }
        self.notify.notify_one();
    }

    /// Stop the loop: no new drains are started.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// The drainer. Owns nothing but references; the executor holds the
/// session table.
pub struct CadenceLoop<C: Coordinator + 'static> {
    coordinator: Arc<C>,
    executor: Arc<TaskExecutor<C>>,
    dispatch: DispatchContext,
    interval: Duration,
    limit: u32,
    filters: TaskFilters,
    on_error: Arc<dyn Fn(&WireError) + Send + Sync>,
    notify: Arc<Notify>,
    state: Arc<Mutex<LoopState>>,
    stop: CancellationToken,
}

impl<C: Coordinator + 'static> CadenceLoop<C> {
    pub fn new(
        coordinator: Arc<C>,
        executor: Arc<TaskExecutor<C>>,
        dispatch: DispatchContext,
        interval: Duration,
        filters: TaskFilters,
    ) -> Self {
        Self {
            coordinator,
            executor,
            dispatch,
            interval: interval.max(MIN_TICK),
            limit: DRAIN_PAGE_LIMIT,
            filters,
            on_error: Arc::new(|e| tracing::warn!(error = %e, "cadence: drain failed")),
            notify: Arc::new(Notify::new()),
            state: Arc::new(Mutex::new(LoopState::default())),
            stop: CancellationToken::new(),
        }
    }

    /// Replace the error callback (defaults to a warning log).
    pub fn with_on_error(mut self, on_error: impl Fn(&WireError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(on_error);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn handle(&self) -> CadenceHandle {
        CadenceHandle {
            notify: Arc::clone(&self.notify),
            state: Arc::clone(&self.state),
            stop: self.stop.clone(),
        }
    }

    /// Run until stopped: an immediate startup drain, then ticks and
    /// triggers.
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "cadence: loop started");
        loop {
            self.drain_cycle().await;
            if self.stop.is_cancelled() {
                break;
            }

            let tick = {
                let mut state = self.state.lock();
                state.next_poll.take().map(|d| d.max(MIN_TICK)).unwrap_or(self.interval)
            };
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.notify.notified() => {}
                _ = self.stop.cancelled() => break,
            }
        }
        tracing::info!("cadence: loop stopped");
    }

    /// Spawn `run` on the runtime and return the control handle.
    pub fn spawn(self) -> (CadenceHandle, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run());
        (handle, join)
    }

    /// One guarded drain, re-running while rechecks arrive.
    async fn drain_cycle(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                state.pending_recheck = true;
                return;
            }
            state.dispatching = true;
        }

        loop {
            if let Err(e) = self.drain_once().await {
                (self.on_error)(&e);
            }

            let recheck = {
                let mut state = self.state.lock();
                state.dispatching = false;
                std::mem::take(&mut state.pending_recheck)
            };
            if !recheck || self.stop.is_cancelled() {
                break;
            }
            self.state.lock().dispatching = true;
            tracing::debug!("cadence: recheck requested mid-drain, draining again");
        }
    }

    /// List and dispatch until a short page.
    async fn drain_once(&self) -> Result<(), WireError> {
        if self.limit == 0 {
            return Ok(());
        }

        loop {
            if self.stop.is_cancelled() {
                return Ok(());
            }

            let mut query = TaskQuery::todo(self.limit);
            query.stream_id = self.filters.stream_id.clone();
            query.backend = self.filters.backend.clone();
            query.cost_class = self.filters.cost_class.clone();

            let page = self.coordinator.list_tasks(&query).await?;
            if let Some(secs) = page.next_poll_seconds {
                self.state.lock().next_poll = Some(Duration::from_secs(secs));
            }

            let count = page.tasks.len();
            for task in page.tasks {
                if let Some(id) = listed_task_id(&task) {
                    if self.dispatch.is_known(id) {
                        tracing::debug!(task_id = %id, "cadence: task already dispatched, skipping");
                        continue;
                    }
                }
                // Sequential hand-off: claim races settle before the next
                self.executor.dispatch(task).await;
            }

            if count < self.limit as usize {
                return Ok(());
            }
        }
    }
}

fn listed_task_id(task: &Value) -> Option<&str> {
    task.get("task")
        .and_then(|t| t.get("taskId"))
        .or_else(|| task.get("taskId"))
        .and_then(Value::as_str)
}

#[cfg(test)]
#[path = "cadence_tests.rs"]
mod tests;
