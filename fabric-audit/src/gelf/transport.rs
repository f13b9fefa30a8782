//! GELF transport
//!
//! Sends encoded messages to a collector over UDP. Payloads larger than one
//! datagram are split using GELF chunking. The destination is held in an
//! `ArcSwap`, so reconfiguration never blocks or tears an in-flight send.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Collector used when no host is configured
pub const DEFAULT_HOST: &str = "localhost:12201";

/// Standard GELF UDP port
pub const DEFAULT_PORT: u16 = 12201;

/// Chunked message magic bytes
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];

/// Magic + message id + sequence number + sequence count
const CHUNK_HEADER_LEN: usize = 12;

/// Most chunks a collector will reassemble
pub const MAX_CHUNKS: usize = 128;

/// Largest UDP payload we will ever write
const MAX_DATAGRAM: usize = 65_507;

/// Delivers encoded messages to a collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one encoded message, best effort
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Replace the destination
    fn set_host(&self, host: GelfHost);

    /// Current destination
    fn host(&self) -> Arc<GelfHost>;
}

/// Collector address as configured, resolved at send time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GelfHost {
    host: String,
    port: u16,
}

impl GelfHost {
    /// Parse `host`, `host:port`, `ip:port` or `[v6]:port`
    ///
    /// A missing port means [`DEFAULT_PORT`].
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidHost("empty host".to_string()));
        }

        if let Ok(addr) = input.parse::<SocketAddr>() {
            return Ok(Self {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidHost(input.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(input, port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(Error::InvalidHost(input.to_string())),
            };
            return Self::checked(input, host, port);
        }

        match input.rsplit_once(':') {
            // bare IPv6 without brackets
            Some((host, _)) if host.contains(':') => Self::checked(input, input, DEFAULT_PORT),
            Some((host, port)) => Self::checked(input, host, parse_port(input, port)?),
            None => Self::checked(input, input, DEFAULT_PORT),
        }
    }

    fn checked(input: &str, host: &str, port: u16) -> Result<Self> {
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(Error::InvalidHost(input.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to the first socket address
    pub async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| Error::InvalidHost(format!("{} did not resolve", self)))
    }
}

impl Default for GelfHost {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for GelfHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(input: &str, port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::InvalidHost(input.to_string()))
}

/// Split a payload into GELF chunks no larger than `chunk_size`
///
/// A payload that fits is returned as the single element. `message_id`
/// must be unique per message so the collector can reassemble it.
pub fn chunk_payload(payload: &[u8], chunk_size: usize, message_id: [u8; 8]) -> Result<Vec<Vec<u8>>> {
    let chunk_size = chunk_size.clamp(CHUNK_HEADER_LEN + 1, MAX_DATAGRAM);
    if payload.len() <= chunk_size {
        return Ok(vec![payload.to_vec()]);
    }

    let data_len = chunk_size - CHUNK_HEADER_LEN;
    let count = payload.len().div_ceil(data_len);
    if count > MAX_CHUNKS {
        return Err(Error::MessageTooLarge {
            size: payload.len(),
            chunks: count,
            max: MAX_CHUNKS,
        });
    }

    Ok(payload
        .chunks(data_len)
        .enumerate()
        .map(|(seq, data)| {
            let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
            chunk.extend_from_slice(&CHUNK_MAGIC);
            chunk.extend_from_slice(&message_id);
            chunk.push(seq as u8);
            chunk.push(count as u8);
            chunk.extend_from_slice(data);
            chunk
        })
        .collect())
}

/// Connectionless GELF sender
pub struct UdpTransport {
    host: ArcSwap<GelfHost>,
    chunk_size: usize,
}

impl UdpTransport {
    /// Create a transport sending to `host` in datagrams of at most `chunk_size` bytes
    pub fn new(host: GelfHost, chunk_size: usize) -> Self {
        Self {
            host: ArcSwap::from_pointee(host),
            chunk_size,
        }
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("host", &self.host.load().to_string())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        let host = self.host.load_full();
        let address = host.resolve().await?;

        let message_id = *uuid::Uuid::new_v4().as_bytes();
        let mut id = [0u8; 8];
        id.copy_from_slice(&message_id[..8]);
        let chunks = chunk_payload(payload, self.chunk_size, id)?;

        let bind_addr = if address.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        for chunk in &chunks {
            socket.send_to(chunk, address).await?;
        }

        Ok(())
    }

    fn set_host(&self, host: GelfHost) {
        tracing::info!(host = %host, "GELF collector host updated");
        self.host.store(Arc::new(host));
    }

    fn host(&self) -> Arc<GelfHost> {
        self.host.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_forms() {
        let host = GelfHost::parse("graylog.internal").unwrap();
        assert_eq!((host.host(), host.port()), ("graylog.internal", 12201));

        let host = GelfHost::parse("graylog.internal:5555").unwrap();
        assert_eq!((host.host(), host.port()), ("graylog.internal", 5555));

        let host = GelfHost::parse("10.1.2.3:12202").unwrap();
        assert_eq!((host.host(), host.port()), ("10.1.2.3", 12202));

        let host = GelfHost::parse("[::1]:7000").unwrap();
        assert_eq!((host.host(), host.port()), ("::1", 7000));

        let host = GelfHost::parse("[fe80::1]").unwrap();
        assert_eq!((host.host(), host.port()), ("fe80::1", 12201));

        let host = GelfHost::parse("::1").unwrap();
        assert_eq!((host.host(), host.port()), ("::1", 12201));

        assert_eq!(GelfHost::parse(DEFAULT_HOST).unwrap(), GelfHost::default());
    }

    #[test]
    fn test_parse_host_rejects_garbage() {
        assert!(matches!(GelfHost::parse(""), Err(Error::InvalidHost(_))));
        assert!(matches!(GelfHost::parse("   "), Err(Error::InvalidHost(_))));
        assert!(matches!(GelfHost::parse("host:notaport"), Err(Error::InvalidHost(_))));
        assert!(matches!(GelfHost::parse("host:70000"), Err(Error::InvalidHost(_))));
        assert!(matches!(GelfHost::parse(":12201"), Err(Error::InvalidHost(_))));
        assert!(matches!(GelfHost::parse("[::1"), Err(Error::InvalidHost(_))));
    }

    #[test]
    fn test_host_display() {
        assert_eq!(GelfHost::parse("a.example:1").unwrap().to_string(), "a.example:1");
        assert_eq!(GelfHost::parse("[::1]:2").unwrap().to_string(), "[::1]:2");
    }

    #[test]
    fn test_small_payload_is_not_chunked() {
        let chunks = chunk_payload(b"{\"short_message\":\"x\"}", 1420, [7; 8]).unwrap();
        assert_eq!(chunks, vec![b"{\"short_message\":\"x\"}".to_vec()]);
    }

    #[test]
    fn test_chunk_headers() {
        let payload: Vec<u8> = (0..250u8).collect();
        let chunks = chunk_payload(&payload, 112, [1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        // 100 data bytes per chunk
        assert_eq!(chunks.len(), 3);
        for (seq, chunk) in chunks.iter().enumerate() {
            assert_eq!(&chunk[..2], &CHUNK_MAGIC);
            assert_eq!(&chunk[2..10], &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(chunk[10] as usize, seq);
            assert_eq!(chunk[11], 3);
            assert!(chunk.len() <= 112);
        }

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c[12..].to_vec()).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_too_many_chunks() {
        let payload = vec![b'x'; 129 * 100];
        let err = chunk_payload(&payload, 112, [0; 8]).unwrap_err();
        assert!(matches!(
            err,
            Error::MessageTooLarge { chunks: 129, max: 128, .. }
        ));
    }

    #[tokio::test]
    async fn test_udp_send_and_host_swap() {
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let transport = UdpTransport::new(
            GelfHost::parse(&first.local_addr().unwrap().to_string()).unwrap(),
            1420,
        );
        transport.send(b"one").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = first.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"one");

        transport.set_host(GelfHost::parse(&second.local_addr().unwrap().to_string()).unwrap());
        transport.send(b"two").await.unwrap();

        let (len, _) = second.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"two");
        assert_eq!(transport.host().port(), second.local_addr().unwrap().port());
    }
}
