//! Packet encoding and decoding.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::checksum::{footer, TransportCrc};
use super::decoder::decode_payload;
use super::encoder::encode_payload;
use super::{Header, Message, MessageType, Packet, HEADER_SIZE};
use crate::error::{ProtocolError, Result, TransportError};

/// Encode a message into a complete packet (header, payload, footer).
///
/// `declared` is written to the header's type byte and must match the
/// message variant.
pub fn marshal(
    message: &Message,
    packet_id: u8,
    declared: MessageType,
    crc: TransportCrc,
) -> Result<Vec<u8>> {
    let actual = message.message_type();
    if declared != actual {
        return Err(ProtocolError::InvalidMessageType { declared, actual }.into());
    }

    let payload = encode_payload(message)?;
    let length = u8::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: payload.len(),
        max: usize::from(u8::MAX),
    })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + crc.footer_size());
    buf.put_slice(&Header::new(packet_id, declared, length).to_bytes());
    buf.put_slice(&payload);

    let footer = footer(crc, &buf);
    buf.put_slice(&footer);

    Ok(buf)
}

/// Encode a message under its own type tag.
pub fn encode_packet(packet_id: u8, message: &Message, crc: TransportCrc) -> Result<Vec<u8>> {
    marshal(message, packet_id, message.message_type(), crc)
}

/// Decode a packet and return only its message.
pub fn unmarshal(data: &[u8], crc: TransportCrc) -> Result<Message> {
    decode_packet(data, crc).map(Packet::into_message)
}

/// Decode a complete packet.
///
/// The buffer must hold one packet: header, `length` payload bytes and the
/// footer for `crc`. Bytes after the footer are ignored.
pub fn decode_packet(data: &[u8], crc: TransportCrc) -> Result<Packet> {
    let header = Header::decode(data)?;

    let end = HEADER_SIZE + usize::from(header.length);
    if data.len() < end {
        return Err(ProtocolError::InsufficientData {
            needed: end,
            got: data.len(),
        }
        .into());
    }

    let msg_type = MessageType::try_from(header.msg_type)?;
    let message = decode_payload(msg_type, &data[HEADER_SIZE..end])?;

    verify_footer(data, end, crc)?;

    Ok(Packet { header, message })
}

fn verify_footer(data: &[u8], end: usize, crc: TransportCrc) -> Result<()> {
    if crc == TransportCrc::None {
        return Ok(());
    }

    let expected = footer(crc, &data[..end]);
    let got = &data[end..data.len().min(end + crc.footer_size())];

    if got != expected.as_slice() {
        return Err(ProtocolError::InvalidFooter {
            expected,
            got: got.to_vec(),
        }
        .into());
    }

    Ok(())
}

/// Total packet size announced by a header under `crc`.
pub fn frame_len(header: &[u8], crc: TransportCrc) -> Result<usize> {
    Ok(Header::decode(header)?.frame_len(crc))
}

/// Tokio codec for packet framing on byte streams.
///
/// Decodes [`Packet`]s and encodes `(packet_id, Message)` pairs.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    crc: TransportCrc,
    max_frame_size: usize,
}

impl PacketCodec {
    /// Create a codec with no frame size limit beyond the header's.
    pub fn new(crc: TransportCrc) -> Self {
        Self {
            crc,
            max_frame_size: HEADER_SIZE + usize::from(u8::MAX) + crc.footer_size(),
        }
    }

    /// Create a codec with a custom max frame size.
    pub fn with_max_frame_size(crc: TransportCrc, max_frame_size: usize) -> Self {
        Self {
            crc,
            max_frame_size,
        }
    }

    pub fn crc(&self) -> TransportCrc {
        self.crc
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(TransportCrc::None)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = crate::Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // Need at least header to determine packet size
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let total_len = frame_len(&src[..HEADER_SIZE], self.crc)?;
        if total_len > self.max_frame_size {
            return Err(TransportError::MessageTooLarge {
                size: total_len,
                max: self.max_frame_size,
            }
            .into());
        }

        // Wait for complete packet
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_len);
        decode_packet(&frame, self.crc).map(Some)
    }
}

impl Encoder<(u8, Message)> for PacketCodec {
    type Error = crate::Error;

    fn encode(
        &mut self,
        (packet_id, message): (u8, Message),
        dst: &mut BytesMut,
    ) -> std::result::Result<(), Self::Error> {
        let encoded = encode_packet(packet_id, &message, self.crc)?;

        if encoded.len() > self.max_frame_size && !message.is_fragment() {
            return Err(TransportError::MessageTooLarge {
                size: encoded.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        dst.reserve(encoded.len());
        dst.put_slice(&encoded);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{Ack, AckStatus, DataType, Reading, SensorData, SensorHeartbeat};

    fn heartbeat() -> Message {
        SensorHeartbeat {
            sensor_id: 2,
            timestamp: 500,
            battery: 90,
            status: Default::default(),
        }
        .into()
    }

    #[test]
    fn test_sensor_data_vector() {
        let msg: Message = SensorData {
            sensor_id: 1,
            timestamp: 12345,
            reading: Reading::new(DataType::ACCELEROMETER, vec![1.2, 3.4, 5.6]),
        }
        .into();

        let bytes = encode_packet(0, &msg, TransportCrc::Crc8).unwrap();
        assert_eq!(
            hex::encode_upper(&bytes),
            "4B4E0001041301393000000103 9A99993F 9A995940 3333B340 30".replace(' ', "")
        );
        assert_eq!(unmarshal(&bytes, TransportCrc::Crc8).unwrap(), msg);
    }

    #[test]
    fn test_declared_type_mismatch() {
        let err = marshal(&heartbeat(), 1, MessageType::Ack, TransportCrc::None).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::InvalidMessageType {
                declared: MessageType::Ack,
                actual: MessageType::Heartbeat,
            })
        ));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let bytes = [0x4B, 0x4E, 1, 1, 0x42, 0];
        assert!(matches!(
            decode_packet(&bytes, TransportCrc::None),
            Err(Error::Protocol(ProtocolError::UnknownMessageType(0x42)))
        ));
    }

    #[test]
    fn test_insufficient_data() {
        let bytes = encode_packet(1, &heartbeat(), TransportCrc::None).unwrap();
        assert!(matches!(
            decode_packet(&bytes[..10], TransportCrc::None),
            Err(Error::Protocol(ProtocolError::InsufficientData { needed: 13, got: 10 }))
        ));
    }

    #[test]
    fn test_missing_footer() {
        let bytes = encode_packet(1, &heartbeat(), TransportCrc::Crc32).unwrap();
        match decode_packet(&bytes[..bytes.len() - 2], TransportCrc::Crc32) {
            Err(Error::Protocol(ProtocolError::InvalidFooter { expected, got })) => {
                assert_eq!(expected.len(), 4);
                assert_eq!(got.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_crc_mode_fails() {
        let bytes = encode_packet(1, &heartbeat(), TransportCrc::Crc16).unwrap();
        assert!(decode_packet(&bytes, TransportCrc::Crc32).is_err());
        assert!(decode_packet(&bytes, TransportCrc::Crc16).is_ok());
        // A reader with no footer accepts the packet and ignores the extra bytes.
        assert!(decode_packet(&bytes, TransportCrc::None).is_ok());
    }

    #[test]
    fn test_frame_len() {
        let bytes = encode_packet(3, &heartbeat(), TransportCrc::Crc16).unwrap();
        assert_eq!(frame_len(&bytes[..6], TransportCrc::Crc16).unwrap(), bytes.len());
        assert!(frame_len(&[0, 0, 0, 0, 0, 0], TransportCrc::Crc16).is_err());
    }

    #[test]
    fn test_packet_codec() {
        let mut codec = PacketCodec::new(TransportCrc::Crc8);
        let ack: Message = Ack {
            sensor_id: 1,
            message_id: 7,
            status: AckStatus::OK,
        }
        .into();

        let mut buf = BytesMut::new();
        codec.encode((5, heartbeat()), &mut buf).unwrap();
        codec.encode((6, ack.clone()), &mut buf).unwrap();

        // Feed a partial frame first.
        let mut partial = buf.split_to(4);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        let mut buf = partial;

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.packet_id(), 5);
        assert_eq!(first.message, heartbeat());

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.packet_id(), 6);
        assert_eq!(second.message, ack);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_packet_codec_rejects_oversized_frame() {
        let mut codec = PacketCodec::with_max_frame_size(TransportCrc::None, 8);
        let mut buf = BytesMut::new();
        assert!(codec.encode((1, heartbeat()), &mut buf).is_err());

        buf.put_slice(&encode_packet(1, &heartbeat(), TransportCrc::None).unwrap());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Transport(TransportError::MessageTooLarge { size: 13, max: 8 }))
        ));
    }
}
