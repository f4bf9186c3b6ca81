//! Archive request files.
//!
//! Plain text, one request per line: `name [samplingPeriod [samplingMethod]]`,
//! whitespace separated. Blank lines and `#` comments are skipped; missing
//! fields take the caller's defaults.

use crate::archiver::Validator;
use crate::types::{PvConfig, SamplingMethod};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RequestFileError {
    #[error("Cannot read request file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Request file {path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestLineError {
    #[error("line {line}: invalid PV name {name:?}: {reason}")]
    InvalidName {
        line: usize,
        name: String,
        reason: &'static str,
    },

    #[error("line {line}: invalid sampling period {value:?}")]
    InvalidPeriod { line: usize, value: String },

    #[error("line {line}: {message}")]
    InvalidMethod { line: usize, message: String },
}

/// Values applied when a request line omits them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestDefaults {
    pub sampling_period: f64,
    pub sampling_method: SamplingMethod,
}

/// Parsed content of one request file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestFile {
    pub entries: Vec<PvConfig>,
    pub rejected: Vec<RequestLineError>,
}

impl RequestFile {
    pub fn parse(contents: &str, defaults: RequestDefaults) -> Self {
        let mut file = RequestFile::default();
        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(index + 1, line, defaults) {
                Ok(entry) => file.entries.push(entry),
                Err(e) => file.rejected.push(e),
            }
        }
        file
    }

    pub fn read(path: &Path, defaults: RequestDefaults) -> Result<Self, RequestFileError> {
        let bytes = std::fs::read(path).map_err(|source| RequestFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let contents = String::from_utf8(bytes).map_err(|_| RequestFileError::Encoding {
            path: path.to_path_buf(),
        })?;
        let file = Self::parse(&contents, defaults);
        for rejected in &file.rejected {
            warn!("Skipping request in {}: {}", path.display(), rejected);
        }
        debug!("Read {} requests from {}", file.entries.len(), path.display());
        Ok(file)
    }

    /// Requests keyed by PV name; a later line for the same PV wins.
    pub fn by_name(&self) -> HashMap<String, PvConfig> {
        self.entries
            .iter()
            .map(|entry| (entry.pv.clone(), entry.clone()))
            .collect()
    }
}

fn parse_line(line: usize, text: &str, defaults: RequestDefaults) -> Result<PvConfig, RequestLineError> {
    let mut tokens = text.split_whitespace();
    let name = tokens.next().unwrap_or_default();
    if let Some(reason) = Validator::check_pv_name(name) {
        return Err(RequestLineError::InvalidName {
            line,
            name: name.to_string(),
            reason,
        });
    }

    let sampling_period = match tokens.next() {
        Some(value) => match value.parse::<f64>() {
            Ok(period) if period.is_finite() && period > 0.0 => period,
            _ => {
                return Err(RequestLineError::InvalidPeriod {
                    line,
                    value: value.to_string(),
                })
            }
        },
        None => defaults.sampling_period,
    };

    let sampling_method = match tokens.next() {
        Some(value) => value
            .parse::<SamplingMethod>()
            .map_err(|message| RequestLineError::InvalidMethod { line, message })?,
        None => defaults.sampling_method,
    };

    Ok(PvConfig::new(name, sampling_period, sampling_method))
}
