// archiver/client.rs

use super::error::{ArchiverError, Result};
use super::validation::Validator;
use super::Registry;
use crate::constants::{DEFAULT_HTTP_RETRIES, DEFAULT_HTTP_TIMEOUT, RETRY_BACKOFF};
use crate::types::{Ack, DisconnectedPv, PausedPv, PvConfig};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

pub const GET_DISCONNECTED: &str = "getCurrentlyDisconnectedPVs";
pub const GET_PAUSED: &str = "getPausedPVsReport";
pub const GET_ALL_EXPANDED: &str = "getAllExpandedPVNames";
pub const POST_UNARCHIVED: &str = "unarchivedPVs";
pub const POST_ARCHIVE: &str = "archivePV";
pub const POST_PAUSE: &str = "pauseArchivingPV";
pub const POST_RESUME: &str = "resumeArchivingPV";

/// Client for the management BPL of an Archiver Appliance cluster.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    max_retries: usize,
}

impl RegistryClient {
    /// Creates a client for `base_url`, which must point at the mgmt BPL.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_settings(base_url, DEFAULT_HTTP_TIMEOUT, DEFAULT_HTTP_RETRIES)
    }

    pub fn with_settings(base_url: &str, request_timeout: Duration, max_retries: usize) -> Result<Self> {
        let base = Validator::validate_bpl_url(base_url)?;
        let client = Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| ArchiverError::http(base.as_str(), e))?;

        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            request_timeout,
            max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, endpoint: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base_url, endpoint))
            .map_err(|e| ArchiverError::InvalidUrl(format!("{}/{}: {}", self.base_url, endpoint, e)))
    }

    /// GET with retries for transient failures.
    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.build_url(endpoint)?;
        let mut attempt = 0;
        loop {
            let request = self.client.get(url.clone());
            match self.send(&url, request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("{} (attempt {} of {}), retrying", e, attempt, self.max_retries + 1);
                    tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// POST a JSON body. Not retried: the BPL mutations are not idempotent
    /// from the caller's point of view.
    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.build_url(endpoint)?;
        let request = self.client.post(url.clone()).json(body);
        self.send(&url, request).await
    }

    async fn send<T: DeserializeOwned>(&self, url: &Url, request: reqwest::RequestBuilder) -> Result<T> {
        debug!("Request URL: {}", url);
        let response = timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| ArchiverError::Timeout {
                url: url.to_string(),
                after: self.request_timeout,
            })?
            .map_err(|e| ArchiverError::http(url.as_str(), e))?;

        Self::decode(url, response).await
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ArchiverError::http(url.as_str(), e))?;

        if !status.is_success() {
            return Err(ArchiverError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: (!body.is_empty()).then_some(body),
            });
        }

        serde_json::from_str(&body).map_err(|source| ArchiverError::Json {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn list_disconnected(&self) -> Result<Vec<DisconnectedPv>> {
        self.get(GET_DISCONNECTED).await
    }

    async fn list_paused(&self) -> Result<Vec<PausedPv>> {
        self.get(GET_PAUSED).await
    }

    async fn list_all_known_names(&self) -> Result<HashSet<String>> {
        let names: Vec<String> = self.get(GET_ALL_EXPANDED).await?;
        Ok(names.into_iter().collect())
    }

    async fn unarchived(&self, names: &[String]) -> Result<Vec<String>> {
        self.post(POST_UNARCHIVED, names).await
    }

    async fn pause(&self, names: &[String]) -> Result<Ack> {
        self.post(POST_PAUSE, names).await
    }

    async fn resume(&self, names: &[String]) -> Result<Ack> {
        self.post(POST_RESUME, names).await
    }

    async fn submit(&self, configs: &[PvConfig]) -> Result<Ack> {
        self.post(POST_ARCHIVE, configs).await
    }
}
