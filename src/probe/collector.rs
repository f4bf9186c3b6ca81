// probe/collector.rs

use super::ProbeState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Shared sink for attempt outcomes of one probe call.
///
/// Attempts settle concurrently from worker threads. Once [`Collector::close`]
/// has run, further outcomes are dropped.
pub(crate) struct Collector {
    states: DashMap<String, ProbeState>,
    open: RwLock<bool>,
    outstanding: AtomicUsize,
    settled: Notify,
}

impl Collector {
    pub(crate) fn new<'a>(names: impl Iterator<Item = &'a String>) -> Self {
        let states: DashMap<String, ProbeState> =
            names.map(|name| (name.clone(), ProbeState::Pending)).collect();
        let outstanding = AtomicUsize::new(states.len());
        Self {
            states,
            open: RwLock::new(true),
            outstanding,
            settled: Notify::new(),
        }
    }

    /// Records the outcome of one attempt. Each name settles at most once.
    pub(crate) fn settle(&self, name: String, connected: bool) {
        let open = self.open.read();
        if !*open {
            return;
        }

        let state = if connected {
            ProbeState::Connected
        } else {
            ProbeState::Failed
        };
        match self.states.get_mut(&name) {
            Some(mut entry) if *entry == ProbeState::Pending => *entry = state,
            _ => return,
        }

        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.settled.notify_one();
        }
    }

    /// Resolves once every name has settled.
    pub(crate) async fn all_settled(&self) {
        while self.outstanding.load(Ordering::Acquire) > 0 {
            self.settled.notified().await;
        }
    }

    /// Stops accepting outcomes and returns the states seen so far.
    pub(crate) fn close(&self) -> HashMap<String, ProbeState> {
        *self.open.write() = false;
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
