//! Scripted network backend.
//!
//! Each PV name is mapped to a [`Behavior`]; names without an entry use the
//! default. Counters expose how many sessions and attempts were opened and
//! how many are still alive, so callers can check that nothing outlives a
//! probe call.

use super::{AttemptSettings, ChannelSession, ConnectError, Network};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Immediate,
    ConnectAfter(Duration),
    FailAfter(Duration),
    /// The attempt never resolves.
    Never,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicUsize,
    sessions_alive: AtomicUsize,
    attempts: AtomicUsize,
    attempts_in_flight: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    default: Behavior,
    behaviors: Arc<HashMap<String, Behavior>>,
    counters: Arc<Counters>,
}

impl SimulatedNetwork {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            behaviors: Arc::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with(mut self, name: impl Into<String>, behavior: Behavior) -> Self {
        Arc::make_mut(&mut self.behaviors).insert(name.into(), behavior);
        self
    }

    pub fn with_all<I, S>(mut self, names: I, behavior: Behavior) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let behaviors = Arc::make_mut(&mut self.behaviors);
        for name in names {
            behaviors.insert(name.into(), behavior);
        }
        self
    }

    pub fn sessions_opened(&self) -> usize {
        self.counters.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_alive(&self) -> usize {
        self.counters.sessions_alive.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    pub fn attempts_in_flight(&self) -> usize {
        self.counters.attempts_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for SimulatedNetwork {
    type Session = SimulatedSession;

    async fn open_session(&self, _settings: AttemptSettings) -> Result<SimulatedSession, std::io::Error> {
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.counters.sessions_alive.fetch_add(1, Ordering::SeqCst);
        Ok(SimulatedSession {
            network: self.clone(),
        })
    }
}

pub struct SimulatedSession {
    network: SimulatedNetwork,
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.network
            .counters
            .sessions_alive
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements the in-flight counter however the attempt ends, abort included.
struct InFlight(Arc<Counters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.attempts_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelSession for SimulatedSession {
    async fn connect(&self, name: &str) -> Result<(), ConnectError> {
        let counters = Arc::clone(&self.network.counters);
        counters.attempts.fetch_add(1, Ordering::SeqCst);
        counters.attempts_in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(counters);

        let behavior = self
            .network
            .behaviors
            .get(name)
            .copied()
            .unwrap_or(self.network.default);
        match behavior {
            Behavior::Immediate => Ok(()),
            Behavior::ConnectAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Behavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(ConnectError::Refused(name.to_string()))
            }
            Behavior::Never => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
