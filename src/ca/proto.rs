//! Channel Access message framing.
//!
//! Only the handful of commands needed to search for a channel and create it
//! on a virtual circuit are modelled. All header fields are big-endian.

use tokio::io::{AsyncRead, AsyncReadExt};

pub const MINOR_VERSION: u16 = 13;
pub const DEFAULT_SERVER_PORT: u16 = 5064;
pub const HEADER_LEN: usize = 16;
const EXTENDED_HEADER_LEN: usize = 24;
const EXTENDED_MARKER: u16 = 0xFFFF;

/// `data_type` of a search request asking servers without the channel to
/// stay silent.
pub const DONT_REPLY: u16 = 5;

/// Search replies carry this address when the client should use the
/// datagram's source address instead.
pub const USE_SOURCE_ADDR: u32 = 0xFFFF_FFFF;

/// Largest payload accepted from a server.
pub const MAX_PAYLOAD: usize = 1 << 20;

pub mod command {
    pub const VERSION: u16 = 0;
    pub const SEARCH: u16 = 6;
    pub const CREATE_CHAN: u16 = 18;
    pub const CLIENT_NAME: u16 = 20;
    pub const HOST_NAME: u16 = 21;
    pub const ACCESS_RIGHTS: u16 = 22;
    pub const CREATE_CH_FAIL: u16 = 26;
    pub const SERVER_DISCONN: u16 = 27;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub command: u16,
    pub payload_size: u32,
    pub data_type: u16,
    pub data_count: u32,
    pub param1: u32,
    pub param2: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Header {
    /// Appends the header to `buf`, switching to the extended form when a
    /// field does not fit the 16-bit slots.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let extended = self.payload_size >= u32::from(EXTENDED_MARKER)
            || self.data_count > u32::from(u16::MAX);
        buf.extend_from_slice(&self.command.to_be_bytes());
        if extended {
            buf.extend_from_slice(&EXTENDED_MARKER.to_be_bytes());
            buf.extend_from_slice(&self.data_type.to_be_bytes());
            buf.extend_from_slice(&0u16.to_be_bytes());
        } else {
            buf.extend_from_slice(&(self.payload_size as u16).to_be_bytes());
            buf.extend_from_slice(&self.data_type.to_be_bytes());
            buf.extend_from_slice(&(self.data_count as u16).to_be_bytes());
        }
        buf.extend_from_slice(&self.param1.to_be_bytes());
        buf.extend_from_slice(&self.param2.to_be_bytes());
        if extended {
            buf.extend_from_slice(&self.payload_size.to_be_bytes());
            buf.extend_from_slice(&self.data_count.to_be_bytes());
        }
    }

    /// Decodes a header from the front of `bytes`, returning it with the
    /// number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Option<(Header, usize)> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let header = Self::decode_basic(bytes);
        if !header.is_extended() {
            return Some((header, HEADER_LEN));
        }
        if bytes.len() < EXTENDED_HEADER_LEN {
            return None;
        }
        Some((header.with_extension(&bytes[16..24]), EXTENDED_HEADER_LEN))
    }

    fn decode_basic(bytes: &[u8]) -> Header {
        Header {
            command: be_u16(&bytes[0..2]),
            payload_size: u32::from(be_u16(&bytes[2..4])),
            data_type: be_u16(&bytes[4..6]),
            data_count: u32::from(be_u16(&bytes[6..8])),
            param1: be_u32(&bytes[8..12]),
            param2: be_u32(&bytes[12..16]),
        }
    }

    fn is_extended(&self) -> bool {
        self.payload_size == u32::from(EXTENDED_MARKER) && self.data_count == 0
    }

    fn with_extension(self, extension: &[u8]) -> Header {
        Header {
            payload_size: be_u32(&extension[0..4]),
            data_count: be_u32(&extension[4..8]),
            ..self
        }
    }
}

impl Message {
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        let header = Header {
            payload_size: payload.len() as u32,
            ..header
        };
        Self { header, payload }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.header.encode(buf);
        buf.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.encode(&mut buf);
        buf
    }

    /// Payload interpreted as a nul-terminated string.
    pub fn payload_str(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

/// Nul-terminates `text` and pads it to a multiple of 8 bytes.
pub fn padded(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    let padded_len = bytes.len().div_ceil(8) * 8;
    bytes.resize(padded_len, 0);
    bytes
}

pub fn version(priority: u16) -> Message {
    Message::new(
        Header {
            command: command::VERSION,
            data_type: priority,
            data_count: u32::from(MINOR_VERSION),
            ..Header::default()
        },
        Vec::new(),
    )
}

pub fn search(name: &str, search_id: u32) -> Message {
    Message::new(
        Header {
            command: command::SEARCH,
            data_type: DONT_REPLY,
            data_count: u32::from(MINOR_VERSION),
            param1: search_id,
            param2: search_id,
            ..Header::default()
        },
        padded(name),
    )
}

pub fn search_reply(server_port: u16, server_ip: u32, search_id: u32) -> Message {
    let mut payload = MINOR_VERSION.to_be_bytes().to_vec();
    payload.resize(8, 0);
    Message::new(
        Header {
            command: command::SEARCH,
            data_type: server_port,
            param1: server_ip,
            param2: search_id,
            ..Header::default()
        },
        payload,
    )
}

pub fn client_name(user: &str) -> Message {
    Message::new(
        Header {
            command: command::CLIENT_NAME,
            ..Header::default()
        },
        padded(user),
    )
}

pub fn host_name(host: &str) -> Message {
    Message::new(
        Header {
            command: command::HOST_NAME,
            ..Header::default()
        },
        padded(host),
    )
}

pub fn create_chan(name: &str, cid: u32) -> Message {
    Message::new(
        Header {
            command: command::CREATE_CHAN,
            param1: cid,
            param2: u32::from(MINOR_VERSION),
            ..Header::default()
        },
        padded(name),
    )
}

/// Splits a datagram into messages. A truncated trailing message ends the
/// iteration.
pub fn decode_datagram(mut bytes: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some((header, header_len)) = Header::decode(bytes) {
        let end = header_len + header.payload_size as usize;
        if bytes.len() < end {
            break;
        }
        messages.push(Message {
            header,
            payload: bytes[header_len..end].to_vec(),
        });
        bytes = &bytes[end..];
    }
    messages
}

/// Reads one message from a stream.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).await?;
    let mut header = Header::decode_basic(&head);
    if header.is_extended() {
        let mut extension = [0u8; EXTENDED_HEADER_LEN - HEADER_LEN];
        reader.read_exact(&mut extension).await?;
        header = header.with_extension(&extension);
    }

    let size = header.payload_size as usize;
    if size > MAX_PAYLOAD {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("payload of {} bytes exceeds limit", size),
        ));
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(Message { header, payload })
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_padded_names() {
        assert_eq!(padded("PV1"), b"PV1\0\0\0\0\0".to_vec());
        assert_eq!(padded("ABCDEFGH").len(), 16);
        assert_eq!(padded("").len(), 8);
    }

    #[test]
    fn test_search_request_layout() {
        let bytes = search("XCOR:LI21:101", 7).to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        assert_eq!(&bytes[0..2], &[0, 6]);
        assert_eq!(&bytes[2..4], &[0, 16]);
        assert_eq!(&bytes[4..6], &[0, DONT_REPLY as u8]);
        assert_eq!(&bytes[6..8], &[0, MINOR_VERSION as u8]);
        assert_eq!(&bytes[8..12], &7u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &7u32.to_be_bytes());
        assert_eq!(&bytes[16..29], b"XCOR:LI21:101");
    }

    #[test]
    fn test_datagram_with_several_messages() {
        let mut datagram = version(0).to_bytes();
        search_reply(5064, USE_SOURCE_ADDR, 3).encode(&mut datagram);
        search_reply(5065, 0x7F00_0001, 4).encode(&mut datagram);
        datagram.extend_from_slice(&[0, 6, 0]);

        let messages = decode_datagram(&datagram);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].header.command, command::VERSION);
        assert_eq!(messages[1].header.data_type, 5064);
        assert_eq!(messages[1].header.param1, USE_SOURCE_ADDR);
        assert_eq!(messages[2].header.param2, 4);
    }

    #[test]
    fn test_extended_header() {
        let header = Header {
            command: command::CREATE_CHAN,
            payload_size: 70_000,
            data_count: 100_000,
            ..Header::default()
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), EXTENDED_HEADER_LEN);

        let (decoded, used) = Header::decode(&buf).unwrap();
        assert_eq!(used, EXTENDED_HEADER_LEN);
        assert_eq!(decoded, header);
    }

    #[tokio::test]
    async fn test_read_message_from_stream() {
        let mut bytes = create_chan("PV:A", 11).to_bytes();
        bytes.extend(host_name("ioc01").to_bytes());
        let mut reader = std::io::Cursor::new(bytes);

        let first = read_message(&mut reader).await.unwrap();
        assert_eq!(first.header.command, command::CREATE_CHAN);
        assert_eq!(first.header.param1, 11);
        assert_eq!(first.payload_str(), "PV:A");

        let second = read_message(&mut reader).await.unwrap();
        assert_eq!(second.payload_str(), "ioc01");
        assert!(read_message(&mut reader).await.is_err());
    }
}
