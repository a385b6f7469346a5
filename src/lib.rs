//! # Kinetica
//!
//! Binary wire protocol for motion-sensor devices and the transports that
//! carry it.
//!
//! Sensors (accelerometers, gyroscopes, IMUs, hubs and relays) exchange small
//! self-describing packets with a collector over TCP, UDP, serial or BLE.
//! Each transport picks an integrity footer suited to the link.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Application / Collector                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Connections (TCP stream, UDP datagram, byte stream)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      Framing: 6-byte header, then length + footer bytes         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   Codec: header │ payload (11 message types) │ CRC footer       │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_possible_truncation)]  // Wire fields are narrowed after range checks
#![allow(clippy::cast_possible_wrap)]        // Type tag is a signed byte
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for wire compatibility
pub const PROTOCOL_VERSION: u8 = 1;

/// Default collector port
pub const DEFAULT_PORT: u16 = 8080;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{
        decode_packet, encode_packet, marshal, unmarshal, Message, MessageType, Packet,
        TransportCrc,
    };
    pub use crate::server::{Collector, CollectorConfig, Inbound};
    pub use crate::transport::{
        Connection, Medium, StreamConnection, TcpConnection, TcpTransport, TransportConfig,
        UdpConnection,
    };
    pub use crate::types::*;
}
