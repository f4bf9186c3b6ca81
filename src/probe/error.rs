// probe/error.rs

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a probe call as a whole.
///
/// Individual endpoints never produce one of these; an endpoint that cannot
/// be reached is simply left out of the live set.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to open network session: {0}")]
    Session(#[source] std::io::Error),
}

/// Why a single connection attempt did not succeed.
///
/// Recorded as [`super::ProbeState::Failed`] and only visible in logs and the
/// detailed report.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("channel refused by server: {0}")]
    Refused(String),

    #[error("connection to {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("circuit closed before the channel connected")]
    CircuitClosed,
}

impl ProbeError {
    pub fn invalid_timeout<T: std::fmt::Display>(value: T) -> Self {
        Self::InvalidArgument(format!(
            "timeout must be a finite, non-negative number of seconds (got {})",
            value
        ))
    }
}

/// Parses a timeout given in (possibly fractional) seconds.
///
/// ```
/// use rusty_archive_keeper::probe::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("2.5").unwrap(), Duration::from_millis(2500));
/// assert!(parse_timeout("-1").is_err());
/// ```
pub fn parse_timeout(value: &str) -> Result<Duration, ProbeError> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| ProbeError::invalid_timeout(value))?;
    timeout_from_secs(secs)
}

pub fn timeout_from_secs(secs: f64) -> Result<Duration, ProbeError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ProbeError::invalid_timeout(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ProbeError::invalid_timeout(secs))
}
