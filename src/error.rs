use crate::archiver::ArchiverError;
use crate::changes::ChangeError;
use crate::config::ConfigError;
use crate::probe::ProbeError;
use crate::request_file::RequestFileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Registry error: {0}")]
    Registry(#[from] ArchiverError),
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("Request file error: {0}")]
    RequestFile(#[from] RequestFileError),
    #[error("Change detection error: {0}")]
    Change(#[from] ChangeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Errors that mean the run was misconfigured rather than that a
    /// remote call failed.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Registry(ArchiverError::InvalidUrl(_)) | Self::Probe(ProbeError::InvalidArgument(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
