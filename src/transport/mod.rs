//! Transport layer for Kinetica.
//!
//! Connections move whole packets. Stream transports (TCP, serial, BLE
//! adapters) isolate a packet with a two-phase read: the 6-byte header, then
//! the payload and footer it announces. Datagram transports carry exactly
//! one packet per datagram.

mod socket;
mod stream;
mod tcp;
mod udp;

pub use socket::{create_tcp_socket, create_udp_socket, SocketConfig};
pub use stream::StreamConnection;
pub use tcp::{TcpConnection, TcpTransport};
pub use udp::UdpConnection;

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result, TransportError};
use crate::protocol::{
    Header, Message, MessageType, Packet, TransportCrc, HEADER_SIZE, MAX_PACKET_SIZE,
};
use crate::types::{ConnectionState, TrafficStats};

/// Physical medium a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    /// Reliable stream, no footer needed.
    #[default]
    Tcp,
    /// Datagrams, CRC-8 protected.
    Udp,
    /// UART byte stream.
    Serial,
    /// BLE characteristic writes/notifications.
    Ble,
}

impl Medium {
    /// Footer scheme peers on this medium expect.
    pub fn default_crc(self) -> TransportCrc {
        match self {
            Self::Tcp => TransportCrc::None,
            Self::Udp | Self::Serial | Self::Ble => TransportCrc::Crc8,
        }
    }

    /// Largest encoded packet peers on this medium accept.
    pub fn max_message_size(self) -> usize {
        match self {
            Self::Tcp => 65536,
            Self::Udp => 1472,
            Self::Serial => 4096,
            Self::Ble => 255,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Serial => "serial",
            Self::Ble => "ble",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Medium {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "serial" => Ok(Self::Serial),
            "ble" => Ok(Self::Ble),
            other => Err(format!("unknown medium: {other}")),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Read timeout (none = wait forever).
    #[serde(default, with = "humantime_serde")]
    pub read_timeout: Option<Duration>,

    /// Write timeout (none = wait forever).
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Option<Duration>,

    /// Connection timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Footer scheme override (default: per medium).
    #[serde(default)]
    pub crc: Option<TransportCrc>,

    /// Max encoded packet size override (default: per medium).
    #[serde(default)]
    pub max_message_size: Option<usize>,

    /// Send buffer size in bytes.
    #[serde(default = "default_send_buffer")]
    pub send_buffer_size: usize,

    /// Receive buffer size in bytes.
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer_size: usize,

    /// TCP keep-alive interval.
    #[serde(default = "default_keepalive", with = "humantime_serde")]
    pub keepalive_interval: Option<Duration>,

    /// Enable TCP_NODELAY.
    #[serde(default = "default_nodelay")]
    pub tcp_nodelay: bool,

    /// Enable SO_REUSEADDR.
    #[serde(default = "default_reuse_addr")]
    pub reuse_addr: bool,
}

fn default_write_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_send_buffer() -> usize {
    256 * 1024
}
fn default_recv_buffer() -> usize {
    256 * 1024
}
fn default_keepalive() -> Option<Duration> {
    Some(Duration::from_secs(30))
}
fn default_nodelay() -> bool {
    true
}
fn default_reuse_addr() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: default_write_timeout(),
            connect_timeout: default_connect_timeout(),
            crc: None,
            max_message_size: None,
            send_buffer_size: default_send_buffer(),
            recv_buffer_size: default_recv_buffer(),
            keepalive_interval: default_keepalive(),
            tcp_nodelay: default_nodelay(),
            reuse_addr: default_reuse_addr(),
        }
    }
}

impl TransportConfig {
    /// Footer scheme for `medium`, honoring the override.
    pub fn effective_crc(&self, medium: Medium) -> TransportCrc {
        self.crc.unwrap_or_else(|| medium.default_crc())
    }

    /// Max packet size for `medium`, honoring the override.
    pub fn effective_max_message_size(&self, medium: Medium) -> usize {
        self.max_message_size
            .unwrap_or_else(|| medium.max_message_size())
    }
}

/// A packet connection to one peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Encode and send a message under `declared`, returning the packet ID used.
    ///
    /// Packets larger than the connection's limit are rejected unless the
    /// message is a fragment.
    async fn send_as(&self, message: &Message, declared: MessageType) -> Result<u8>;

    /// Send a message under its own type tag.
    async fn send(&self, message: &Message) -> Result<u8> {
        self.send_as(message, message.message_type()).await
    }

    /// Receive the next packet.
    ///
    /// Codec failures affect only the packet in question; see
    /// [`Error::is_packet_error`].
    async fn recv(&self) -> Result<Packet>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;

    /// Footer scheme in use.
    fn crc(&self) -> TransportCrc;

    fn max_message_size(&self) -> usize;

    /// Remote address, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    fn stats(&self) -> TrafficStats;

    /// Get transport type name.
    fn transport_type(&self) -> &'static str;
}

/// Whether a packet of `size` bytes breaks a `max` limit.
///
/// Fragments are exempt: they are already as small as a payload allows.
pub(crate) fn exceeds_limit(header: &Header, size: usize, max: usize) -> bool {
    size > max && header.message_type() != Some(MessageType::Fragment)
}

/// Reads whole packets from a byte stream.
///
/// Bytes of a partly received packet stay buffered between calls, so
/// [`FrameReader::read_frame`] is cancel safe and can run under a timeout.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
        }
    }

    /// Bytes received but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read one packet.
    ///
    /// Waits for the 6-byte header, then for the payload and footer it
    /// announces. Returns header and remainder as one buffer, ready for
    /// [`crate::protocol::decode_packet`]. An oversized frame is consumed
    /// before the error is returned so the stream stays aligned; a header
    /// with bad magic is discarded.
    pub async fn read_frame(&mut self, crc: TransportCrc, max_size: usize) -> Result<Vec<u8>> {
        self.fill(HEADER_SIZE).await?;

        let header = match Header::decode(&self.buf[..HEADER_SIZE]) {
            Ok(header) => header,
            Err(e) => {
                self.buf.advance(HEADER_SIZE);
                return Err(e);
            }
        };

        let frame_len = header.frame_len(crc);
        self.fill(frame_len).await?;
        let frame = self.buf.split_to(frame_len);

        if exceeds_limit(&header, frame_len, max_size) {
            return Err(TransportError::MessageTooLarge {
                size: frame_len,
                max: max_size,
            }
            .into());
        }

        Ok(frame.to_vec())
    }

    async fn fill(&mut self, len: usize) -> Result<()> {
        while self.buf.len() < len {
            self.buf.reserve(len - self.buf.len());
            let n = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(read_error)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
        Ok(())
    }
}

fn read_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        ErrorKind::TimedOut => TransportError::ReadTimeout.into(),
        _ => TransportError::ReceiveFailed(format!("failed to read packet: {e}")).into(),
    }
}
