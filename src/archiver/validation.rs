// validation.rs

use crate::archiver::error::{ArchiverError, Result};
use crate::constants::{BPL_SUFFIX, EXAMPLE_BPL_URL};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// EPICS record names plus the field, alias and expansion characters the
// archiver accepts.
static PV_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-+:\.\[\]<>;{}$]+$").expect("Failed to compile PV name regex")
});

const MAX_PV_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct Validator;

impl Validator {
    /// Checks that `url` points at the management BPL of an appliance, for
    /// example `http://arch.slac.stanford.edu/mgmt/bpl`.
    pub fn validate_bpl_url(url: &str) -> Result<Url> {
        let trimmed = url.trim_end_matches('/');
        let parsed = Url::parse(trimmed)
            .map_err(|e| ArchiverError::InvalidUrl(format!("{}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ArchiverError::InvalidUrl(format!(
                "{} must use http or https",
                url
            )));
        }
        if !parsed.path().ends_with(BPL_SUFFIX) {
            return Err(ArchiverError::InvalidUrl(format!(
                "The URL {} needs to point to the mgmt bpl; for example, {}",
                url, EXAMPLE_BPL_URL
            )));
        }
        Ok(parsed)
    }

    /// Returns a reason if `name` cannot be a PV name.
    pub fn check_pv_name(name: &str) -> Option<&'static str> {
        if name.is_empty() {
            Some("PV name cannot be empty")
        } else if name.len() > MAX_PV_NAME_LEN {
            Some("PV name exceeds maximum length of 255 characters")
        } else if !PV_NAME_REGEX.is_match(name) {
            Some("PV name contains invalid characters")
        } else {
            None
        }
    }
}
