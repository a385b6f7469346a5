//! Relay encapsulation.
//!
//! A relay forwards a complete encoded packet as the opaque payload of a
//! [`RelayedMessage`]. Unwrapping is a second decode over those bytes.

use super::checksum::TransportCrc;
use super::codec::decode_packet;
use super::{Message, Packet, RelayedMessage};
use crate::error::{ProtocolError, Result};

/// Default bound on nested relays.
pub const DEFAULT_MAX_RELAY_DEPTH: usize = 4;

impl RelayedMessage {
    /// Wrap an encoded packet for forwarding by `relay_id`.
    pub fn wrap(relay_id: u8, packet: impl Into<Vec<u8>>) -> Self {
        Self {
            relay_id,
            original_data: packet.into(),
        }
    }

    /// Decode the embedded packet, which must use `crc`.
    pub fn unwrap(&self, crc: TransportCrc) -> Result<Packet> {
        decode_packet(&self.original_data, crc)
    }
}

/// Unwrap nested relays down to the originating packet.
///
/// Returns the innermost packet and the relay IDs it passed through,
/// outermost first. A packet that is not relayed comes back unchanged with
/// an empty path.
pub fn unwrap_relayed(
    packet: Packet,
    crc: TransportCrc,
    max_depth: usize,
) -> Result<(Packet, Vec<u8>)> {
    let mut path = Vec::new();
    let mut current = packet;

    while let Message::Relayed(relayed) = &current.message {
        if path.len() >= max_depth {
            return Err(ProtocolError::RelayDepthExceeded(max_depth).into());
        }
        path.push(relayed.relay_id);
        current = relayed.unwrap(crc)?;
    }

    Ok((current, path))
}
