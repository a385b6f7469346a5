//! Packet connection over any byte stream.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{Connection, FrameReader, Medium, TransportConfig};
use crate::error::{Error, Result, TransportError};
use crate::protocol::{decode_packet, marshal, Message, MessageType, Packet, TransportCrc};
use crate::types::{ConnectionState, PacketIdSequence, TrafficStats};

/// Packet connection over a byte stream: TCP, a serial port, a BLE bridge
/// or an in-memory pipe.
pub struct StreamConnection<S> {
    reader: Mutex<FrameReader<ReadHalf<S>>>,
    writer: Mutex<WriteHalf<S>>,
    ids: PacketIdSequence,
    medium: Medium,
    crc: TransportCrc,
    max_message_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    peer: Option<SocketAddr>,
    state: RwLock<ConnectionState>,
    stats: SyncMutex<TrafficStats>,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream, taking footer scheme and size limit from `medium`
    /// unless `config` overrides them.
    pub fn new(stream: S, medium: Medium, config: &TransportConfig) -> Self {
        let (read_half, write_half) = split(stream);

        Self {
            reader: Mutex::new(FrameReader::new(read_half)),
            writer: Mutex::new(write_half),
            ids: PacketIdSequence::new(),
            medium,
            crc: config.effective_crc(medium),
            max_message_size: config.effective_max_message_size(medium),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            peer: None,
            state: RwLock::new(ConnectionState::Connected),
            stats: SyncMutex::new(TrafficStats::default()),
        }
    }

    /// Record the remote address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Medium this connection was configured for.
    pub fn medium(&self) -> Medium {
        self.medium
    }

    fn mark_closed(&self) {
        *self.state.write() = ConnectionState::Disconnected;
    }

    async fn write_packet(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok::<_, std::io::Error>(())
        };

        let result = match self.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| Error::from(TransportError::WriteTimeout))?,
            None => write.await,
        };

        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::NotConnected => {
                self.mark_closed();
                Error::ConnectionClosed
            }
            _ => TransportError::SendFailed(format!("failed to write {} bytes: {e}", bytes.len()))
                .into(),
        })
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send_as(&self, message: &Message, declared: MessageType) -> Result<u8> {
        if !self.state().is_connected() {
            return Err(Error::ConnectionClosed);
        }

        let packet_id = self.ids.next();
        let bytes = marshal(message, packet_id, declared, self.crc)?;

        if bytes.len() > self.max_message_size && !message.is_fragment() {
            return Err(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            }
            .into());
        }

        self.write_packet(&bytes).await?;
        self.stats.lock().record_sent(bytes.len());
        trace!(packet_id, msg_type = %declared, size = bytes.len(), "sent packet");

        Ok(packet_id)
    }

    async fn recv(&self) -> Result<Packet> {
        if !self.state().is_connected() {
            return Err(Error::ConnectionClosed);
        }

        // A timeout leaves any partial packet buffered for the next call.
        let mut reader = self.reader.lock().await;
        let read = reader.read_frame(self.crc, self.max_message_size);

        let frame = match self.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| Error::from(TransportError::ReadTimeout))?,
            None => read.await,
        };
        drop(reader);

        let frame = match frame {
            Ok(frame) => frame,
            Err(Error::ConnectionClosed) => {
                self.mark_closed();
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(e),
        };

        match decode_packet(&frame, self.crc) {
            Ok(packet) => {
                self.stats.lock().record_received(frame.len());
                trace!(
                    packet_id = packet.packet_id(),
                    msg_type = %packet.message_type(),
                    size = frame.len(),
                    "received packet"
                );
                Ok(packet)
            }
            Err(e) => {
                self.stats.lock().record_dropped(frame.len());
                debug!(error = %e, size = frame.len(), "dropped packet");
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn crc(&self) -> TransportCrc {
        self.crc
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn stats(&self) -> TrafficStats {
        *self.stats.lock()
    }

    fn transport_type(&self) -> &'static str {
        self.medium.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        encode_packet, Ack, AckStatus, Capabilities, DeviceType, Fragment, Registration,
        SensorHeartbeat,
    };
    use tokio::io::{duplex, AsyncWriteExt};

    fn pair(medium: Medium) -> (
        StreamConnection<tokio::io::DuplexStream>,
        StreamConnection<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(4096);
        let config = TransportConfig::default();
        (
            StreamConnection::new(a, medium, &config),
            StreamConnection::new(b, medium, &config),
        )
    }

    fn registration() -> Message {
        Registration {
            sensor_id: 1,
            device_type: DeviceType::NINE_AXIS,
            capabilities: Capabilities::new(0x03),
            fw_version: 0x0100,
        }
        .into()
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (client, server) = pair(Medium::Serial);
        assert_eq!(client.crc(), TransportCrc::Crc8);

        let id = client.send(&registration()).await.unwrap();
        assert_eq!(id, 1);
        let id = client.send(&registration()).await.unwrap();
        assert_eq!(id, 2);

        let packet = server.recv().await.unwrap();
        assert_eq!(packet.packet_id(), 1);
        assert_eq!(packet.message, registration());
        assert_eq!(server.recv().await.unwrap().packet_id(), 2);

        assert_eq!(client.stats().packets_sent, 2);
        assert_eq!(server.stats().packets_received, 2);
        assert_eq!(server.stats().bytes_received, 2 * 12);
    }

    #[tokio::test]
    async fn test_size_limit_spares_fragments() {
        let (client, server) = pair(Medium::Ble);

        let big = Fragment {
            message_id: 1,
            fragment_num: 0,
            total_fragments: 1,
            data: vec![0; crate::protocol::fragment::MAX_CHUNK_SIZE],
        };
        // 6 + 255 + 1 bytes exceeds the BLE limit, but fragments may pass.
        assert!(client.send(&big.clone().into()).await.is_ok());
        let packet = server.recv().await.unwrap();
        assert_eq!(packet.message, Message::Fragment(big));

        let custom = crate::protocol::CustomData {
            items: vec![crate::protocol::Item::new(0u8, vec![0; 240])],
            ..Default::default()
        };
        assert!(matches!(
            client.send(&custom.into()).await,
            Err(Error::Transport(TransportError::MessageTooLarge { max: 255, .. }))
        ));
    }

    #[tokio::test]
    async fn test_declared_type_checked() {
        let (client, _server) = pair(Medium::Tcp);
        let msg: Message = SensorHeartbeat::default().into();
        assert!(client.send_as(&msg, MessageType::Heartbeat).await.is_ok());
        assert!(client.send_as(&msg, MessageType::Ack).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_packet_does_not_end_connection() {
        let (mut raw, conn) = {
            let (a, b) = duplex(1024);
            (a, StreamConnection::new(b, Medium::Serial, &TransportConfig::default()))
        };

        let ack: Message = Ack {
            sensor_id: 2,
            message_id: 9,
            status: AckStatus::OK,
        }
        .into();
        let mut corrupt = encode_packet(1, &ack, TransportCrc::Crc8).unwrap();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        raw.write_all(&corrupt).await.unwrap();
        raw.write_all(&encode_packet(2, &ack, TransportCrc::Crc8).unwrap())
            .await
            .unwrap();

        let err = conn.recv().await.unwrap_err();
        assert!(err.is_packet_error());
        assert_eq!(conn.state(), ConnectionState::Connected);

        let packet = conn.recv().await.unwrap();
        assert_eq!(packet.packet_id(), 2);
        assert_eq!(conn.stats().packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_peer_close() {
        let (client, server) = pair(Medium::Tcp);
        drop(client);
        assert!(matches!(server.recv().await, Err(Error::ConnectionClosed)));
        assert_eq!(server.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (a, _b) = duplex(64);
        let config = TransportConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let conn = StreamConnection::new(a, Medium::Tcp, &config);
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::ReadTimeout)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_timeout_mid_packet_keeps_alignment() {
        let (mut raw, b) = duplex(1024);
        let config = TransportConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let conn = StreamConnection::new(b, Medium::Serial, &config);

        let first = encode_packet(1, &registration(), TransportCrc::Crc8).unwrap();
        let second = encode_packet(2, &registration(), TransportCrc::Crc8).unwrap();

        raw.write_all(&first[..6]).await.unwrap();
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::ReadTimeout)));
        assert!(err.is_recoverable());

        raw.write_all(&first[6..]).await.unwrap();
        raw.write_all(&second).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().packet_id(), 1);
        assert_eq!(conn.recv().await.unwrap().packet_id(), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_send() {
        let (client, _server) = pair(Medium::Tcp);
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send(&registration()).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
