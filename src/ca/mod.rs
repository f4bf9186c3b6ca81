//! Channel Access network backend.
//!
//! Connects channels the way a CA client library does: a UDP name search
//! against the configured address list, then channel creation on a TCP
//! virtual circuit to whichever server answered. A channel counts as
//! connected once the server acknowledges `CREATE_CHAN`.

pub mod proto;
mod session;

pub use session::CaSession;

use crate::config::ConfigError;
use crate::probe::{AttemptSettings, Network};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_ADDR_LIST: &str = "EPICS_CA_ADDR_LIST";
pub const ENV_AUTO_ADDR_LIST: &str = "EPICS_CA_AUTO_ADDR_LIST";
pub const ENV_SERVER_PORT: &str = "EPICS_CA_SERVER_PORT";

/// Static Channel Access client settings, resolved once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaConfig {
    pub addr_list: Vec<SocketAddr>,
    pub server_port: u16,
    pub user_name: String,
    pub host_name: String,
    pub initial_search_interval: Duration,
    pub max_search_interval: Duration,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            addr_list: vec![SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                proto::DEFAULT_SERVER_PORT,
            ))],
            server_port: proto::DEFAULT_SERVER_PORT,
            user_name: "archive-keeper".to_string(),
            host_name: "localhost".to_string(),
            initial_search_interval: Duration::from_millis(100),
            max_search_interval: Duration::from_secs(1),
        }
    }
}

impl CaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an environment lookup function.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_port = match lookup(ENV_SERVER_PORT) {
            Some(value) if !value.trim().is_empty() => {
                value.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                    key: ENV_SERVER_PORT.to_string(),
                    message: format!("not a port number: {}", value),
                })?
            }
            _ => proto::DEFAULT_SERVER_PORT,
        };

        let mut addr_list = Vec::new();
        if let Some(list) = lookup(ENV_ADDR_LIST) {
            for entry in list.split_whitespace() {
                addr_list.push(parse_addr(entry, server_port)?);
            }
        }

        let auto = lookup(ENV_AUTO_ADDR_LIST)
            .map(|v| !v.trim().eq_ignore_ascii_case("NO"))
            .unwrap_or(true);
        if auto {
            let broadcast = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, server_port));
            if !addr_list.contains(&broadcast) {
                addr_list.push(broadcast);
            }
        }

        let defaults = Self::default();
        Ok(Self {
            addr_list,
            server_port,
            user_name: lookup("USER")
                .or_else(|| lookup("USERNAME"))
                .unwrap_or(defaults.user_name),
            host_name: lookup("HOSTNAME").unwrap_or(defaults.host_name),
            ..defaults
        })
    }

    pub fn with_addr_list(mut self, addr_list: Vec<SocketAddr>) -> Self {
        self.addr_list = addr_list;
        self
    }
}

fn parse_addr(entry: &str, default_port: u16) -> Result<SocketAddr, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        key: ENV_ADDR_LIST.to_string(),
        message,
    };
    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(format!("bad port in {}", entry)))?;
            (host, port)
        }
        None => (entry, default_port),
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(format!("cannot resolve {}: {}", entry, e)))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| invalid(format!("no IPv4 address for {}", entry)))
}

/// [`Network`] backed by Channel Access.
#[derive(Debug, Clone)]
pub struct CaNetwork {
    config: Arc<CaConfig>,
}

impl CaNetwork {
    pub fn new(config: CaConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }
}

#[async_trait]
impl Network for CaNetwork {
    type Session = CaSession;

    async fn open_session(&self, settings: AttemptSettings) -> Result<CaSession, std::io::Error> {
        CaSession::open(Arc::clone(&self.config), settings).await
    }
}
