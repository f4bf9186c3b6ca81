//! Bulk liveness probing.
//!
//! A [`Prober`] takes a set of PV names and a timeout, fires one connection
//! attempt per name through a [`Network`] backend and reports which names
//! became connected before the deadline. The wait ends early once every
//! attempt has settled; completions that arrive after the deadline are never
//! counted, and every attempt still in flight is aborted before returning.

mod collector;
mod error;
pub mod simulated;

pub use error::{parse_timeout, timeout_from_secs, ConnectError, ProbeError};

use async_trait::async_trait;
use collector::Collector;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

/// Settings handed to the backend for one probe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptSettings {
    /// Upper bound on how long any attempt of this call may take.
    pub timeout: Duration,
}

/// A connection-oriented network the prober can attempt connections on.
#[async_trait]
pub trait Network: Send + Sync {
    type Session: ChannelSession;

    /// Opens the per-call session. Everything the session owns is released
    /// when it is dropped.
    async fn open_session(&self, settings: AttemptSettings)
        -> Result<Self::Session, std::io::Error>;
}

/// One probe call's worth of network resources.
#[async_trait]
pub trait ChannelSession: Send + Sync + 'static {
    /// Resolves once the named channel is connected, or with an error once
    /// the backend knows it will not be. May never resolve.
    async fn connect(&self, name: &str) -> Result<(), ConnectError>;
}

/// Observed state of one endpoint at the probe deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeState {
    /// No outcome before the deadline.
    Pending,
    Connected,
    /// The attempt failed before the deadline.
    Failed,
}

/// Names to probe plus the time window. Duplicate names collapse.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    names: HashSet<String>,
    timeout: Duration,
}

impl ProbeRequest {
    pub fn new<I, S>(names: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// Builds a request from a timeout given in seconds, rejecting negative
    /// or non-finite values before anything else happens.
    pub fn with_timeout_secs<I, S>(names: I, timeout_secs: f64) -> Result<Self, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let timeout = timeout_from_secs(timeout_secs)?;
        Ok(Self::new(names, timeout))
    }

    pub fn names(&self) -> &HashSet<String> {
        &self.names
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Outcome of one probe call.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub round: Uuid,
    pub states: HashMap<String, ProbeState>,
    pub elapsed: Duration,
}

impl ProbeReport {
    fn empty(round: Uuid) -> Self {
        Self {
            round,
            states: HashMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self, name: &str) -> Option<ProbeState> {
        self.states.get(name).copied()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.state(name) == Some(ProbeState::Connected)
    }

    pub fn live(&self) -> HashSet<String> {
        self.names_in(ProbeState::Connected)
    }

    /// Names that were not confirmed connected, whether pending or failed.
    pub fn not_live(&self) -> HashSet<String> {
        self.states
            .iter()
            .filter(|(_, state)| **state != ProbeState::Connected)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn count(&self, state: ProbeState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    fn names_in(&self, state: ProbeState) -> HashSet<String> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Probes endpoints through a [`Network`] backend.
#[derive(Debug)]
pub struct Prober<N> {
    network: Arc<N>,
}

impl<N> Clone for Prober<N> {
    fn clone(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
        }
    }
}

impl<N: Network + 'static> Prober<N> {
    pub fn new(network: N) -> Self {
        Self {
            network: Arc::new(network),
        }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Returns the names that connected within `timeout`.
    pub async fn live_names<I, S>(&self, names: I, timeout: Duration) -> Result<HashSet<String>, ProbeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let report = self.probe(ProbeRequest::new(names, timeout)).await?;
        Ok(report.live())
    }

    pub async fn probe(&self, request: ProbeRequest) -> Result<ProbeReport, ProbeError> {
        let round = Uuid::new_v4();
        if request.is_empty() {
            return Ok(ProbeReport::empty(round));
        }

        let span = info_span!("probe", %round, names = request.len());
        self.run(round, request).instrument(span).await
    }

    async fn run(&self, round: Uuid, request: ProbeRequest) -> Result<ProbeReport, ProbeError> {
        let started = Instant::now();
        let settings = AttemptSettings {
            timeout: request.timeout,
        };
        let session = Arc::new(
            self.network
                .open_session(settings)
                .await
                .map_err(ProbeError::Session)?,
        );

        let collector = Arc::new(Collector::new(request.names.iter()));
        let mut attempts = JoinSet::new();
        for name in request.names {
            let session = Arc::clone(&session);
            let collector = Arc::clone(&collector);
            attempts.spawn(async move {
                let outcome = session.connect(&name).await;
                if let Err(e) = &outcome {
                    debug!("Connection attempt for {} failed: {}", name, e);
                }
                collector.settle(name, outcome.is_ok());
            });
        }

        let deadline = deadline_after(request.timeout);
        if timeout_at(deadline, collector.all_settled()).await.is_ok() {
            debug!("All attempts settled before the deadline");
        }

        let states = collector.close();
        attempts.shutdown().await;
        drop(session);

        let report = ProbeReport {
            round,
            states,
            elapsed: started.elapsed(),
        };
        debug!(
            "Probe finished in {:?}: {} connected, {} failed, {} pending",
            report.elapsed,
            report.count(ProbeState::Connected),
            report.count(ProbeState::Failed),
            report.count(ProbeState::Pending)
        );
        Ok(report)
    }
}

// Durations past what `Instant` can represent wait as long as tokio allows.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;
