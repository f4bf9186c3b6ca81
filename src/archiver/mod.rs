//! Archiver Appliance management interface.
//!
//! [`Registry`] is the narrow surface the batch driver needs; [`RegistryClient`]
//! implements it over the appliance's JSON BPL endpoints.

pub mod client;
pub mod error;
pub mod validation;

pub use client::RegistryClient;
pub use error::{ArchiverError, Result};
pub use validation::Validator;

use crate::types::{Ack, DisconnectedPv, PausedPv, PvConfig};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_disconnected(&self) -> Result<Vec<DisconnectedPv>>;

    async fn list_paused(&self) -> Result<Vec<PausedPv>>;

    /// Every name the archiver knows, including fields and aliases.
    async fn list_all_known_names(&self) -> Result<HashSet<String>>;

    /// The subset of `names` that is not archived yet.
    async fn unarchived(&self, names: &[String]) -> Result<Vec<String>>;

    async fn pause(&self, names: &[String]) -> Result<Ack>;

    async fn resume(&self, names: &[String]) -> Result<Ack>;

    async fn submit(&self, configs: &[PvConfig]) -> Result<Ack>;
}
