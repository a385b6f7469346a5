//! Packet header and decoded packet.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::PROTOCOL_VERSION;

use super::{Message, MessageType, TransportCrc, HEADER_SIZE, MAGIC};

/// Fixed 6-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Magic bytes, `KN` on a valid packet.
    pub magic: [u8; 2],
    /// Sender-assigned sequence number, wraps at 256.
    pub packet_id: u8,
    /// Protocol version.
    pub version: u8,
    /// Raw message type tag.
    pub msg_type: i8,
    /// Payload length in bytes.
    pub length: u8,
}

impl Header {
    /// Create a new header.
    pub fn new(packet_id: u8, msg_type: MessageType, length: u8) -> Self {
        Self {
            magic: MAGIC,
            packet_id,
            version: PROTOCOL_VERSION,
            msg_type: msg_type.as_i8(),
            length,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::encoding(
                "header",
                format!("buffer holds {} bytes, need {HEADER_SIZE}", buf.len()),
            )
            .into());
        }

        buf[0..2].copy_from_slice(&self.magic);
        buf[2] = self.packet_id;
        buf[3] = self.version;
        buf[4] = self.msg_type as u8;
        buf[5] = self.length;
        Ok(())
    }

    /// Header as a byte array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [
            self.magic[0],
            self.magic[1],
            self.packet_id,
            self.version,
            self.msg_type as u8,
            self.length,
        ]
    }

    /// Decode header from bytes, rejecting a wrong magic before anything else
    /// is interpreted.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MessageTooShort {
                needed: HEADER_SIZE,
                got: buf.len(),
            }
            .into());
        }

        let magic = [buf[0], buf[1]];
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagicBytes(magic).into());
        }

        Ok(Self {
            magic,
            packet_id: buf[2],
            version: buf[3],
            msg_type: buf[4] as i8,
            length: buf[5],
        })
    }

    /// Check version compatibility. Decoding does not enforce it.
    pub fn is_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }

    /// Registered message type, if the tag is known.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_i8(self.msg_type)
    }

    /// Total packet size implied by this header under `crc`.
    pub fn frame_len(&self, crc: TransportCrc) -> usize {
        HEADER_SIZE + usize::from(self.length) + crc.footer_size()
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: Header,
    pub message: Message,
}

impl Packet {
    pub fn packet_id(&self) -> u8 {
        self.header.packet_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// Encoded size without footer.
    pub fn size(&self) -> usize {
        HEADER_SIZE + usize::from(self.header.length)
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
