//! Footer checksums.
//!
//! All CRCs are the non-reflected, MSB-first variants. They are taken from the
//! `crc` catalogue rather than a table-driven reflected CRC-32, which would not
//! be bit-compatible with the sensor firmware.

use std::fmt;
use std::str::FromStr;

use crc::{Crc, CRC_16_IBM_3740, CRC_32_BZIP2, CRC_8_SMBUS};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Poly 0x07, init 0x00, no final XOR.
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// CCITT: poly 0x1021, init 0xFFFF.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Poly 0x04C11DB7, init 0xFFFFFFFF, final complement, not reflected.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// Integrity scheme negotiated by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransportCrc {
    /// 8-bit CRC, for low-overhead links (BLE, serial, UDP).
    Crc8 = 0x01,
    /// 16-bit CCITT CRC.
    Crc16 = 0x02,
    /// 32-bit CRC.
    Crc32 = 0x03,
    /// Single byte holding the encoded length modulo 256.
    Length = 0x04,
    /// No footer at all (reliable streams).
    None = 0x05,
}

impl TransportCrc {
    /// Number of footer bytes this scheme appends.
    pub const fn footer_size(self) -> usize {
        match self {
            Self::Crc8 | Self::Length => 1,
            Self::Crc16 => 2,
            Self::Crc32 => 4,
            Self::None => 0,
        }
    }

    /// Compute the footer over `data` (header and payload).
    pub fn footer(self, data: &[u8]) -> Vec<u8> {
        footer(self, data)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Crc8 => "crc8",
            Self::Crc16 => "crc16",
            Self::Crc32 => "crc32",
            Self::Length => "length",
            Self::None => "none",
        }
    }
}

impl TryFrom<u8> for TransportCrc {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Crc8),
            0x02 => Ok(Self::Crc16),
            0x03 => Ok(Self::Crc32),
            0x04 => Ok(Self::Length),
            0x05 => Ok(Self::None),
            other => Err(ProtocolError::UnknownTransportCrc(other)),
        }
    }
}

impl From<TransportCrc> for u8 {
    fn from(crc: TransportCrc) -> u8 {
        crc as u8
    }
}

impl fmt::Display for TransportCrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportCrc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crc8" => Ok(Self::Crc8),
            "crc16" => Ok(Self::Crc16),
            "crc32" => Ok(Self::Crc32),
            "length" => Ok(Self::Length),
            "none" => Ok(Self::None),
            other => Err(format!("unknown CRC mode: {other}")),
        }
    }
}

/// CRC-8 (poly 0x07).
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// CRC-16/CCITT (poly 0x1021, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// CRC-32 (poly 0x04C11DB7, MSB-first).
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Length footer value.
pub fn length_byte(data: &[u8]) -> u8 {
    (data.len() % 256) as u8
}

/// Footer bytes for `data`. Multi-byte checksums are little-endian.
pub fn footer(crc: TransportCrc, data: &[u8]) -> Vec<u8> {
    match crc {
        TransportCrc::Crc8 => vec![crc8(data)],
        TransportCrc::Crc16 => crc16(data).to_le_bytes().to_vec(),
        TransportCrc::Crc32 => crc32(data).to_le_bytes().to_vec(),
        TransportCrc::Length => vec![length_byte(data)],
        TransportCrc::None => Vec::new(),
    }
}
