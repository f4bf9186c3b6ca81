// In src/lib.rs
pub mod archiver;
pub mod ca;
pub mod changes;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod probe;
pub mod request_file;
pub mod types;

pub use archiver::{ArchiverError, Registry, RegistryClient};
pub use ca::{CaConfig, CaNetwork};
pub use config::KeeperConfig;
pub use driver::{BatchDriver, FlowSummary};
pub use error::AppError;
pub use probe::{ProbeReport, ProbeRequest, ProbeState, Prober};
pub use types::{PvConfig, SamplingMethod};
