#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rusty_archive_keeper::archiver::{ArchiverError, Registry, Result};
use rusty_archive_keeper::types::{Ack, DisconnectedPv, PausedPv, PvConfig};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub endpoint: String,
    pub body: String,
}

#[derive(Debug, Clone)]
enum Reply {
    Json(u16, String),
    Stall,
}

#[derive(Default)]
struct StubState {
    requests: Vec<Recorded>,
    // The last reply of each queue repeats.
    replies: HashMap<String, VecDeque<Reply>>,
}

/// Minimal HTTP/1.1 server standing in for the mgmt BPL. Serves one request
/// per connection.
pub struct BplStub {
    addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
    handle: JoinHandle<()>,
}

impl BplStub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(StubState::default()));
        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });
        Self { addr, state, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/mgmt/bpl", self.addr)
    }

    pub fn respond(&self, endpoint: &str, status: u16, body: &str) -> &Self {
        self.push(endpoint, Reply::Json(status, body.to_string()));
        self
    }

    pub fn stall(&self, endpoint: &str) -> &Self {
        self.push(endpoint, Reply::Stall);
        self
    }

    fn push(&self, endpoint: &str, reply: Reply) {
        self.state
            .lock()
            .replies
            .entry(endpoint.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }
}

impl Drop for BplStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<StubState>>) {
    let Some((method, path, body)) = read_request(&mut stream).await else {
        return;
    };
    let endpoint = path.rsplit('/').next().unwrap_or_default().to_string();
    let reply = {
        let mut state = state.lock();
        state.requests.push(Recorded {
            method,
            endpoint: endpoint.clone(),
            body,
        });
        match state.replies.get_mut(&endpoint) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };

    let (status, body) = match reply {
        Some(Reply::Json(status, body)) => (status, body),
        Some(Reply::Stall) => {
            std::future::pending::<()>().await;
            return;
        }
        None => (404, String::new()),
    };
    let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some((method, path, body))
}

/// In-memory [`Registry`] recording every mutation.
#[derive(Default)]
pub struct FakeRegistry {
    pub disconnected: Vec<DisconnectedPv>,
    pub paused: Vec<PausedPv>,
    pub known: HashSet<String>,
    /// Names `unarchived` reports as already archived.
    pub archived: HashSet<String>,
    /// Calls to these operations fail with a 503.
    pub failing: HashSet<&'static str>,
    pub calls: Mutex<Vec<(&'static str, Vec<String>)>>,
    pub submitted: Mutex<Vec<PvConfig>>,
}

impl FakeRegistry {
    fn call(&self, op: &'static str, names: Vec<String>) -> Result<()> {
        self.calls.lock().push((op, names));
        if self.failing.contains(op) {
            return Err(ArchiverError::Status {
                url: format!("http://fake/mgmt/bpl/{}", op),
                status: 503,
                body: None,
            });
        }
        Ok(())
    }

    pub fn calls_to(&self, op: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| *name == op)
            .map(|(_, names)| {
                let mut names = names.clone();
                names.sort();
                names
            })
            .collect()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn list_disconnected(&self) -> Result<Vec<DisconnectedPv>> {
        self.call("list_disconnected", Vec::new())?;
        Ok(self.disconnected.clone())
    }

    async fn list_paused(&self) -> Result<Vec<PausedPv>> {
        self.call("list_paused", Vec::new())?;
        Ok(self.paused.clone())
    }

    async fn list_all_known_names(&self) -> Result<HashSet<String>> {
        self.call("list_all_known_names", Vec::new())?;
        Ok(self.known.clone())
    }

    async fn unarchived(&self, names: &[String]) -> Result<Vec<String>> {
        self.call("unarchived", names.to_vec())?;
        Ok(names
            .iter()
            .filter(|name| !self.archived.contains(*name))
            .cloned()
            .collect())
    }

    async fn pause(&self, names: &[String]) -> Result<Ack> {
        self.call("pause", names.to_vec())?;
        Ok(Ack::default())
    }

    async fn resume(&self, names: &[String]) -> Result<Ack> {
        self.call("resume", names.to_vec())?;
        Ok(Ack::default())
    }

    async fn submit(&self, configs: &[PvConfig]) -> Result<Ack> {
        self.call("submit", configs.iter().map(|c| c.pv.clone()).collect())?;
        self.submitted.lock().extend_from_slice(configs);
        Ok(Ack::default())
    }
}
