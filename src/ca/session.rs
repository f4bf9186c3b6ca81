// ca/session.rs

use super::proto::{self, command, Message};
use super::CaConfig;
use crate::probe::{AttemptSettings, ChannelSession, ConnectError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

const DATAGRAM_BUFFER: usize = 16 * 1024;

/// Resources of one probe call: a UDP socket shared by every name search
/// and one TCP circuit per responding server. Dropping the session closes
/// all of them.
pub struct CaSession {
    inner: Arc<SessionInner>,
    search_reader: JoinHandle<()>,
}

struct SessionInner {
    config: Arc<CaConfig>,
    settings: AttemptSettings,
    socket: UdpSocket,
    next_search_id: AtomicU32,
    searches: DashMap<u32, oneshot::Sender<SocketAddr>>,
    circuits: DashMap<SocketAddr, Arc<OnceCell<Arc<Circuit>>>>,
}

impl CaSession {
    pub(super) async fn open(
        config: Arc<CaConfig>,
        settings: AttemptSettings,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let inner = Arc::new(SessionInner {
            config,
            settings,
            socket,
            next_search_id: AtomicU32::new(1),
            searches: DashMap::new(),
            circuits: DashMap::new(),
        });
        let search_reader = tokio::spawn(read_search_replies(Arc::clone(&inner)));
        Ok(Self {
            inner,
            search_reader,
        })
    }
}

impl Drop for CaSession {
    fn drop(&mut self) {
        self.search_reader.abort();
        self.inner.searches.clear();
        self.inner.circuits.clear();
    }
}

#[async_trait]
impl ChannelSession for CaSession {
    async fn connect(&self, name: &str) -> Result<(), ConnectError> {
        let server = self.inner.search(name).await?;
        debug!("{} found on {}", name, server);
        let circuit = self.inner.circuit(server).await?;
        circuit.create_channel(name).await
    }
}

/// Removes a map entry when the owning attempt finishes or is aborted.
struct Registration<'a, V> {
    map: &'a DashMap<u32, V>,
    id: u32,
}

impl<V> Drop for Registration<'_, V> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl SessionInner {
    async fn search(&self, name: &str) -> Result<SocketAddr, ConnectError> {
        if self.config.addr_list.is_empty() {
            return Err(ConnectError::Protocol(
                "no Channel Access search addresses configured".to_string(),
            ));
        }

        let id = self.next_search_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        self.searches.insert(id, tx);
        let _registration = Registration {
            map: &self.searches,
            id,
        };

        let mut datagram = proto::version(0).to_bytes();
        proto::search(name, id).encode(&mut datagram);

        let mut interval = self.config.initial_search_interval;
        loop {
            for addr in &self.config.addr_list {
                if let Err(e) = self.socket.send_to(&datagram, addr).await {
                    debug!("Search for {} to {} failed: {}", name, addr, e);
                }
            }
            match timeout(interval, &mut rx).await {
                Ok(Ok(server)) => return Ok(server),
                Ok(Err(_)) => {
                    return Err(ConnectError::Protocol("search abandoned".to_string()))
                }
                Err(_) => interval = (interval * 2).min(self.config.max_search_interval),
            }
        }
    }

    async fn circuit(&self, server: SocketAddr) -> Result<Arc<Circuit>, ConnectError> {
        let cell = self
            .circuits
            .entry(server)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| Circuit::open(server, &self.config, self.settings))
            .await
            .map(Arc::clone)
    }
}

async fn read_search_replies(inner: Arc<SessionInner>) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        let (len, from) = match inner.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                warn!("Channel Access search socket failed: {}", e);
                return;
            }
        };

        for message in proto::decode_datagram(&buf[..len]) {
            if message.header.command != command::SEARCH {
                continue;
            }
            let server = server_address(&message, from);
            if let Some((_, reply)) = inner.searches.remove(&message.header.param2) {
                let _ = reply.send(server);
            }
        }
    }
}

fn server_address(reply: &Message, from: SocketAddr) -> SocketAddr {
    let ip = match reply.header.param1 {
        proto::USE_SOURCE_ADDR | 0 => from.ip(),
        raw => IpAddr::V4(Ipv4Addr::from(raw)),
    };
    SocketAddr::new(ip, reply.header.data_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelReply {
    Created,
    Failed,
}

/// A TCP virtual circuit to one server.
struct Circuit {
    server: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    shared: Arc<CircuitShared>,
    reader: JoinHandle<()>,
}

struct CircuitShared {
    next_cid: AtomicU32,
    pending: DashMap<u32, oneshot::Sender<ChannelReply>>,
    closed: AtomicBool,
}

impl Circuit {
    async fn open(
        server: SocketAddr,
        config: &CaConfig,
        settings: AttemptSettings,
    ) -> Result<Arc<Circuit>, ConnectError> {
        let io_error = |source: std::io::Error| ConnectError::Io {
            address: server.to_string(),
            source,
        };

        let stream = timeout(settings.timeout, TcpStream::connect(server))
            .await
            .map_err(|_| io_error(std::io::ErrorKind::TimedOut.into()))?
            .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;
        let (reader, mut writer) = stream.into_split();

        let mut hello = proto::version(0).to_bytes();
        proto::client_name(&config.user_name).encode(&mut hello);
        proto::host_name(&config.host_name).encode(&mut hello);
        writer.write_all(&hello).await.map_err(io_error)?;

        let shared = Arc::new(CircuitShared {
            next_cid: AtomicU32::new(1),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_circuit(reader, Arc::clone(&shared), server));
        debug!("Opened virtual circuit to {}", server);

        Ok(Arc::new(Circuit {
            server,
            writer: Mutex::new(writer),
            shared,
            reader,
        }))
    }

    async fn create_channel(&self, name: &str) -> Result<(), ConnectError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ConnectError::CircuitClosed);
        }

        let cid = self.shared.next_cid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(cid, tx);
        let _registration = Registration {
            map: &self.shared.pending,
            id: cid,
        };

        let request = proto::create_chan(name, cid).to_bytes();
        self.writer
            .lock()
            .await
            .write_all(&request)
            .await
            .map_err(|source| ConnectError::Io {
                address: self.server.to_string(),
                source,
            })?;

        match rx.await {
            Ok(ChannelReply::Created) => Ok(()),
            Ok(ChannelReply::Failed) => Err(ConnectError::Refused(name.to_string())),
            Err(_) => Err(ConnectError::CircuitClosed),
        }
    }
}

impl Drop for Circuit {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_circuit(mut reader: OwnedReadHalf, shared: Arc<CircuitShared>, server: SocketAddr) {
    loop {
        let message = match proto::read_message(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                debug!("Virtual circuit to {} closed: {}", server, e);
                break;
            }
        };

        let reply = match message.header.command {
            command::CREATE_CHAN => ChannelReply::Created,
            command::CREATE_CH_FAIL | command::SERVER_DISCONN => ChannelReply::Failed,
            _ => continue,
        };
        if let Some((_, waiter)) = shared.pending.remove(&message.header.param1) {
            let _ = waiter.send(reply);
        }
    }

    shared.closed.store(true, Ordering::Release);
    shared.pending.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::proto::Header;

    #[test]
    fn test_server_address_from_reply() {
        let from: SocketAddr = "192.168.1.20:5064".parse().unwrap();

        let reply = proto::search_reply(5064, proto::USE_SOURCE_ADDR, 1);
        assert_eq!(server_address(&reply, from), from);

        let reply = proto::search_reply(6001, u32::from(Ipv4Addr::new(10, 1, 2, 3)), 1);
        assert_eq!(server_address(&reply, from), "10.1.2.3:6001".parse::<SocketAddr>().unwrap());

        let reply = Message::new(
            Header {
                command: command::SEARCH,
                data_type: 5070,
                ..Header::default()
            },
            Vec::new(),
        );
        assert_eq!(server_address(&reply, from), "192.168.1.20:5070".parse::<SocketAddr>().unwrap());
    }
}
