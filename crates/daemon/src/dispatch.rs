// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch bookkeeping shared by the cadence loop and the executor.
//!
//! Two sets: tasks with a claim attempt or execution in flight, and
//! tasks with a live executor entry. A task in either set is skipped by
//! the cadence loop. Checks and updates are atomic under one lock so no
//! interleaving can hand the same task to two executions.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct Sets {
    in_flight: HashSet<String>,
    active: HashSet<String>,
}

/// Shared dispatch context. One default context per process; tests build
/// their own.
#[derive(Clone, Default)]
pub struct DispatchContext {
    inner: Arc<Mutex<Sets>>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark a task in-flight. Returns `false` when the task is
    /// already in flight or active, in which case the caller must skip it.
    pub fn begin(&self, task_id: &str) -> bool {
        let mut sets = self.inner.lock();
        if sets.active.contains(task_id) || !sets.in_flight.insert(task_id.to_string()) {
            return false;
        }
        true
    }

    /// Promote a claimed task from in-flight to active.
    pub fn activate(&self, task_id: &str) {
        let mut sets = self.inner.lock();
        sets.in_flight.remove(task_id);
        sets.active.insert(task_id.to_string());
    }

    /// Remove a task from both sets on any terminal outcome.
    pub fn finish(&self, task_id: &str) {
        let mut sets = self.inner.lock();
        sets.in_flight.remove(task_id);
        sets.active.remove(task_id);
    }

    /// Whether the task is in either set.
    pub fn is_known(&self, task_id: &str) -> bool {
        let sets = self.inner.lock();
        sets.in_flight.contains(task_id) || sets.active.contains(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_idle(&self) -> bool {
        let sets = self.inner.lock();
        sets.in_flight.is_empty() && sets.active.is_empty()
    }
}
