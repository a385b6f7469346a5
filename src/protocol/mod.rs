//! Wire protocol for Kinetica sensors.
//!
//! Defines the packet format, message types, and serialization.
//!
//! ## Packet Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Magic "KN" (2) │ Packet ID (1) │ Version (1) │ Type (1) │ Len (1) │
//! ├───────────────────────────────────────────────────────────────┤
//! │                    Payload (Len bytes)                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │           Footer (0, 1, 2 or 4 bytes, per transport)          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte fields are little-endian. The footer is computed over the
//! header and payload.

mod checksum;
mod codec;
mod decoder;
mod encoder;
pub mod fragment;
mod message;
mod packet;
pub mod relay;

pub use checksum::{crc16, crc32, crc8, footer, length_byte, TransportCrc};
pub use codec::{decode_packet, encode_packet, frame_len, marshal, unmarshal, PacketCodec};
pub use decoder::decode_payload;
pub use encoder::encode_payload;
pub use fragment::{split, Reassembler};
pub use message::{
    Ack, AckStatus, Capabilities, ConfigKey, CustomData, CustomType, DataType, DeviceStatus,
    DeviceType, Fragment, Item, Message, MessageType, Reading, Registration, RelayedMessage,
    SensorCommand, SensorConfig, SensorData, SensorDataMulti, SensorHeartbeat, TimeSync,
};
pub use packet::{Header, Packet};
pub use relay::unwrap_relayed;

/// Magic bytes opening every packet.
pub const MAGIC: [u8; 2] = *b"KN";

/// Header size in bytes.
pub const HEADER_SIZE: usize = 6;

/// Maximum payload size (the header length field is one byte).
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Minimum packet size (header only).
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE;

/// Largest packet any transport can produce.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + 4;
