//! Batch flows over the prober and the registry.
//!
//! Every flow splits its names into chunks of `batch_size` and probes each
//! chunk once. A failed batch is logged and skipped; the remaining batches
//! still run.

use crate::archiver::Registry;
use crate::changes::ChangeDetector;
use crate::config::KeeperConfig;
use crate::error::Result;
use crate::probe::{Network, Prober};
use crate::request_file::RequestFile;
use crate::types::PvConfig;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Splits `items` into chunks of at most `size`, preserving order.
pub fn batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// Outcome counters of one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowSummary {
    pub batches: usize,
    pub failed_batches: usize,
    /// PVs paused, resumed or submitted.
    pub affected: usize,
}

impl FlowSummary {
    fn record(&mut self, flow: &str, result: Result<usize>) {
        self.batches += 1;
        match result {
            Ok(affected) => self.affected += affected,
            Err(e) => {
                self.failed_batches += 1;
                error!("Skipping {} batch: {}", flow, e);
            }
        }
    }
}

pub struct BatchDriver<N, R> {
    prober: Prober<N>,
    registry: R,
    config: KeeperConfig,
}

impl<N: Network + 'static> BatchDriver<N, ()> {
    /// A driver for flows that never call the registry.
    pub fn probe_only(prober: Prober<N>, config: KeeperConfig) -> Self {
        Self::new(prober, (), config)
    }
}

impl<N: Network + 'static, R> BatchDriver<N, R> {
    pub fn new(prober: Prober<N>, registry: R, config: KeeperConfig) -> Self {
        Self {
            prober,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    async fn live(&self, batch: &[String]) -> Result<HashSet<String>> {
        debug!("Checking for liveness of {} PVs", batch.len());
        Ok(self.prober.live_names(batch, self.config.probe_timeout).await?)
    }

    async fn run_batches<T, F, Fut>(&self, names: &[String], action: F) -> Vec<Result<T>>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        stream::iter(batches(names, self.config.batch_size))
            .map(action)
            .buffer_unordered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }

    /// Liveness of every name, in input order.
    pub async fn check(&self, names: &[String]) -> Result<Vec<(String, bool)>> {
        let mut live = HashSet::new();
        for result in self.run_batches(names, move |batch| async move { self.live(&batch).await }).await {
            live.extend(result?);
        }
        Ok(names
            .iter()
            .map(|name| (name.clone(), live.contains(name)))
            .collect())
    }
}

impl<N: Network + 'static, R: Registry> BatchDriver<N, R> {
    /// Pauses PVs that have been disconnected for longer than `threshold`
    /// and still do not connect.
    pub async fn pause_disconnected(&self, threshold: Duration) -> Result<FlowSummary> {
        self.pause_disconnected_at(threshold, Utc::now()).await
    }

    pub async fn pause_disconnected_at(&self, threshold: Duration, now: DateTime<Utc>) -> Result<FlowSummary> {
        let disconnected = self.registry.list_disconnected().await?;
        if disconnected.is_empty() {
            info!("There are no disconnected PVs");
            return Ok(FlowSummary::default());
        }
        info!("{} PVs are disconnected", disconnected.len());

        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        let names: Vec<String> = disconnected
            .into_iter()
            .filter(|pv| (now_secs - pv.last_seen_epoch_secs).abs() > threshold.as_secs_f64())
            .map(|pv| pv.name)
            .collect();
        if names.is_empty() {
            info!("There are no PVs that have been disconnected for more than {:?}", threshold);
            return Ok(FlowSummary::default());
        }
        info!("{} PVs have been disconnected for more than {:?}", names.len(), threshold);

        let results = self
            .run_batches(&names, move |batch| async move {
                let live = self.live(&batch).await?;
                let dead: Vec<String> = batch.into_iter().filter(|name| !live.contains(name)).collect();
                if dead.is_empty() {
                    return Ok(0);
                }
                info!("Pausing {} disconnected PVs", dead.len());
                self.registry.pause(&dead).await?;
                Ok(dead.len())
            })
            .await;

        let mut summary = FlowSummary::default();
        for result in results {
            summary.record("pause", result);
        }
        Ok(summary)
    }

    /// Resumes paused PVs that connect again.
    pub async fn resume_paused(&self) -> Result<FlowSummary> {
        let paused = self.registry.list_paused().await?;
        if paused.is_empty() {
            info!("There are no paused PVs");
            return Ok(FlowSummary::default());
        }
        info!("{} PVs are paused", paused.len());

        let names: Vec<String> = paused.into_iter().map(|pv| pv.name).collect();
        let results = self
            .run_batches(&names, move |batch| async move {
                let mut live: Vec<String> = self.live(&batch).await?.into_iter().collect();
                if live.is_empty() {
                    return Ok(0);
                }
                live.sort();
                info!("Resuming {} live PVs", live.len());
                self.registry.resume(&live).await?;
                Ok(live.len())
            })
            .await;

        let mut summary = FlowSummary::default();
        for result in results {
            summary.record("resume", result);
        }
        Ok(summary)
    }

    /// Submits live, unarchived PVs from changed archive request files.
    pub async fn process_archive_files(&self, detector: &dyn ChangeDetector) -> Result<FlowSummary> {
        let mut summary = FlowSummary::default();
        let files = detector.changed_files()?;
        if files.is_empty() {
            info!("No archive request files have changed");
            return Ok(summary);
        }

        let mut pending = Pending {
            known: self.registry.list_all_known_names().await?,
            ..Pending::default()
        };
        debug!("The archiver knows {} names", pending.known.len());
        let defaults = self.config.request_defaults();

        for relative in files {
            let path = detector.root().join(&relative);
            info!("Processing file {}", path.display());
            let file = match RequestFile::read(&path, defaults) {
                Ok(file) => file,
                Err(e) => {
                    error!("Error processing {}: {}", path.display(), e);
                    continue;
                }
            };

            let requests = file.by_name();
            let total = requests.len();
            let mut queued = false;
            for (name, config) in requests {
                if !pending.known.contains(&name) {
                    pending.queue.insert(name, config);
                    queued = true;
                }
            }
            if !queued {
                debug!("All {} PVs from {} are in the archiver", total, relative.display());
                commit(detector, &relative);
            } else {
                pending.files.push(relative);
            }

            if pending.queue.len() >= self.config.batch_size {
                self.flush(&mut pending, detector, &mut summary).await;
            }
        }
        self.flush(&mut pending, detector, &mut summary).await;
        Ok(summary)
    }

    async fn flush(&self, pending: &mut Pending, detector: &dyn ChangeDetector, summary: &mut FlowSummary) {
        if pending.queue.is_empty() {
            return;
        }
        let configs = std::mem::take(&mut pending.queue);
        let mut names: Vec<String> = configs.keys().cloned().collect();
        names.sort();

        let configs = &configs;
        let results = self
            .run_batches(&names, move |batch| async move { self.submit_live(&batch, configs).await })
            .await;

        let mut clean = true;
        for result in results {
            let counted = result.map(|(submitted, live)| {
                pending.known.extend(live);
                submitted
            });
            clean &= counted.is_ok();
            summary.record("submit", counted);
        }

        let files = std::mem::take(&mut pending.files);
        if clean {
            for relative in &files {
                commit(detector, relative);
            }
        } else {
            warn!("Not marking {} files as processed after a failed batch", files.len());
        }
    }

    /// Returns how many PVs were submitted and which PVs were live.
    async fn submit_live(&self, batch: &[String], configs: &HashMap<String, PvConfig>) -> Result<(usize, Vec<String>)> {
        let mut live: Vec<String> = self.live(batch).await?.into_iter().collect();
        if live.is_empty() {
            debug!("Skipped {} potentially stale PVs", batch.len());
            return Ok((0, live));
        }
        live.sort();

        let unarchived = self.registry.unarchived(&live).await?;
        let submissions: Vec<PvConfig> = unarchived
            .iter()
            .filter_map(|name| configs.get(name).cloned())
            .collect();
        if submissions.is_empty() {
            return Ok((0, live));
        }

        info!("Submitting {} new PVs to the archiver", submissions.len());
        debug!(
            "Submitting {}",
            submissions.iter().map(|c| c.pv.as_str()).collect::<Vec<_>>().join(",")
        );
        self.registry.submit(&submissions).await?;
        Ok((submissions.len(), live))
    }
}

#[derive(Default)]
struct Pending {
    known: HashSet<String>,
    queue: HashMap<String, PvConfig>,
    /// Files whose requests are queued but not yet flushed.
    files: Vec<PathBuf>,
}

fn commit(detector: &dyn ChangeDetector, relative: &Path) {
    if let Err(e) = detector.commit(relative) {
        warn!("Could not mark {} as processed: {}", relative.display(), e);
    }
}
