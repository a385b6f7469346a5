//! Message types carried in packet payloads.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Message type tag, as written in the header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum MessageType {
    /// Command addressed to a sensor.
    Command = 0x01,
    /// Configuration items for a sensor.
    Config = 0x02,
    /// Periodic battery/status report.
    Heartbeat = 0x03,
    /// One set of sensor readings.
    SensorData = 0x04,
    /// Application-defined items.
    CustomData = 0x05,
    /// Server/sensor clock exchange.
    TimeSync = 0x06,
    /// Acknowledgment.
    Ack = 0x07,
    /// Device registration.
    Registration = 0x08,
    /// Part of a larger message.
    Fragment = 0x09,
    /// A complete packet forwarded by a relay.
    Relayed = 0x0A,
    /// Several sets of sensor readings.
    SensorDataMulti = 0x0B,
}

impl MessageType {
    /// All registered message types, in tag order.
    pub const ALL: [Self; 11] = [
        Self::Command,
        Self::Config,
        Self::Heartbeat,
        Self::SensorData,
        Self::CustomData,
        Self::TimeSync,
        Self::Ack,
        Self::Registration,
        Self::Fragment,
        Self::Relayed,
        Self::SensorDataMulti,
    ];

    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::Config),
            0x03 => Some(Self::Heartbeat),
            0x04 => Some(Self::SensorData),
            0x05 => Some(Self::CustomData),
            0x06 => Some(Self::TimeSync),
            0x07 => Some(Self::Ack),
            0x08 => Some(Self::Registration),
            0x09 => Some(Self::Fragment),
            0x0A => Some(Self::Relayed),
            0x0B => Some(Self::SensorDataMulti),
            _ => None,
        }
    }

    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Config => "config",
            Self::Heartbeat => "heartbeat",
            Self::SensorData => "sensor-data",
            Self::CustomData => "custom-data",
            Self::TimeSync => "time-sync",
            Self::Ack => "ack",
            Self::Registration => "registration",
            Self::Fragment => "fragment",
            Self::Relayed => "relayed",
            Self::SensorDataMulti => "sensor-data-multi",
        }
    }
}

impl TryFrom<i8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        Self::from_i8(value).ok_or(ProtocolError::UnknownMessageType(value))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declares a transparent one-byte code with named values.
///
/// Unknown bytes are preserved, so decoding never fails on a code point the
/// firmware added later.
macro_rules! code_point {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $cname:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u8);

        impl $name {
            $($(#[$cmeta])* pub const $cname: Self = Self($value);)+

            /// Name of a known code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($cname)),)+
                    _ => None,
                }
            }
        }

        impl From<u8> for $name {
            fn from(v: u8) -> Self {
                Self(v)
            }
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "0x{:02x}", self.0),
                }
            }
        }
    };
}

code_point! {
    /// Kind of sensor measurement.
    DataType {
        /// 3-axis acceleration (m/s²).
        ACCELEROMETER = 0x01,
        /// 3-axis angular velocity (rad/s).
        GYROSCOPE = 0x02,
        /// 4-component orientation.
        QUATERNION = 0x03,
        /// Roll, pitch, yaw.
        EULER_ANGLES = 0x04,
    }
}

code_point! {
    /// Operational status reported in heartbeats.
    DeviceStatus {
        OK = 0x01,
        EXPECTATION = 0x02,
        COLLECTION = 0x03,
        LOW_BATTERY = 0x04,
        ERROR = 0x05,
    }
}

code_point! {
    /// Configuration item keys.
    ConfigKey {
        SAMPLE_RATE = 0x01,
        RANGE = 0x02,
        MAC = 0x03,
        DEVICE_NAME = 0x04,
        IP_ADDRESS = 0x05,
        MODE = 0x06,
        SENSITIVITY = 0x07,
        CALIBRATION = 0x08,
    }
}

code_point! {
    /// Kind of custom payload.
    CustomType {
        LOG = 0x01,
        ERROR = 0x02,
        DEBUG = 0x03,
        STRING = 0x04,
        BINARY = 0x05,
    }
}

code_point! {
    /// Acknowledgment result.
    AckStatus {
        OK = 0x01,
        ERROR = 0x02,
        INVALID_CRC = 0x03,
        UNKNOWN_MESSAGE = 0x04,
        BUFFER_FULL = 0x05,
    }
}

code_point! {
    /// Hardware type of a device.
    DeviceType {
        THREE_AXIS = 0x01,
        SIX_AXIS = 0x02,
        NINE_AXIS = 0x03,
        HUB = 0x10,
        RELAY = 0x11,
        CUSTOM = 0xFF,
    }
}

/// Device capability bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);

    pub const ACCELEROMETER: u8 = 1 << 0;
    pub const GYROSCOPE: u8 = 1 << 1;
    pub const MAGNETOMETER: u8 = 1 << 2;
    pub const QUATERNION: u8 = 1 << 3;
    pub const TEMPERATURE: u8 = 1 << 4;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Check if a capability is set.
    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr<u8> for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: u8) -> Self {
        Self(self.0 | rhs)
    }
}

/// Key/value entry used by config and custom data. The wire length byte is
/// the value length.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub key: u8,
    pub value: Vec<u8>,
}

impl Item {
    pub fn new(key: impl Into<u8>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// One typed set of readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    pub data_type: DataType,
    pub values: Vec<f32>,
}

impl Reading {
    pub fn new(data_type: DataType, values: impl Into<Vec<f32>>) -> Self {
        Self {
            data_type,
            values: values.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorCommand {
    pub sensor_id: u8,
    pub timestamp: u32,
    pub command: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: u8,
    pub timestamp: u32,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorHeartbeat {
    pub sensor_id: u8,
    pub timestamp: u32,
    /// Battery level, percent.
    pub battery: u8,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorData {
    pub sensor_id: u8,
    pub timestamp: u32,
    pub reading: Reading,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomData {
    pub sensor_id: u8,
    pub timestamp: u32,
    pub data_type: CustomType,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSync {
    pub sensor_id: u8,
    pub server_time: u32,
    pub sensor_time: u32,
}

impl TimeSync {
    /// Sensor clock offset relative to the server, in seconds.
    pub fn offset(&self) -> i64 {
        i64::from(self.sensor_time) - i64::from(self.server_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ack {
    pub sensor_id: u8,
    pub message_id: u16,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registration {
    pub sensor_id: u8,
    pub device_type: DeviceType,
    pub capabilities: Capabilities,
    /// Firmware version, major in the high byte.
    pub fw_version: u16,
}

impl Registration {
    /// Firmware version as (major, minor).
    pub fn fw_version_parts(&self) -> (u8, u8) {
        ((self.fw_version >> 8) as u8, (self.fw_version & 0xFF) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub message_id: u16,
    /// Zero-based position of this fragment.
    pub fragment_num: u8,
    pub total_fragments: u8,
    pub data: Vec<u8>,
}

/// A complete encoded packet forwarded by a relay. The codec treats
/// `original_data` as opaque bytes; see [`crate::protocol::relay`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub relay_id: u8,
    pub original_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorDataMulti {
    pub sensor_id: u8,
    pub timestamp: u32,
    pub readings: Vec<Reading>,
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Command(SensorCommand),
    Config(SensorConfig),
    Heartbeat(SensorHeartbeat),
    SensorData(SensorData),
    CustomData(CustomData),
    TimeSync(TimeSync),
    Ack(Ack),
    Registration(Registration),
    Fragment(Fragment),
    Relayed(RelayedMessage),
    SensorDataMulti(SensorDataMulti),
}

impl Message {
    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Command(_) => MessageType::Command,
            Self::Config(_) => MessageType::Config,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::SensorData(_) => MessageType::SensorData,
            Self::CustomData(_) => MessageType::CustomData,
            Self::TimeSync(_) => MessageType::TimeSync,
            Self::Ack(_) => MessageType::Ack,
            Self::Registration(_) => MessageType::Registration,
            Self::Fragment(_) => MessageType::Fragment,
            Self::Relayed(_) => MessageType::Relayed,
            Self::SensorDataMulti(_) => MessageType::SensorDataMulti,
        }
    }

    /// Sensor the message concerns. Fragments and relayed packets carry none.
    pub fn sensor_id(&self) -> Option<u8> {
        match self {
            Self::Command(m) => Some(m.sensor_id),
            Self::Config(m) => Some(m.sensor_id),
            Self::Heartbeat(m) => Some(m.sensor_id),
            Self::SensorData(m) => Some(m.sensor_id),
            Self::CustomData(m) => Some(m.sensor_id),
            Self::TimeSync(m) => Some(m.sensor_id),
            Self::Ack(m) => Some(m.sensor_id),
            Self::Registration(m) => Some(m.sensor_id),
            Self::SensorDataMulti(m) => Some(m.sensor_id),
            Self::Fragment(_) | Self::Relayed(_) => None,
        }
    }

    /// Check whether transports may exceed their size limit for this message.
    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment(_))
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(impl From<$ty> for Message {
            fn from(m: $ty) -> Self {
                Self::$variant(m)
            }
        })+
    };
}

impl_from_variant! {
    Command(SensorCommand),
    Config(SensorConfig),
    Heartbeat(SensorHeartbeat),
    SensorData(SensorData),
    CustomData(CustomData),
    TimeSync(TimeSync),
    Ack(Ack),
    Registration(Registration),
    Fragment(Fragment),
    Relayed(RelayedMessage),
    SensorDataMulti(SensorDataMulti),
}
