//! Command-line interface for Kinetica.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::protocol::TransportCrc;
use crate::transport::Medium;

/// Kinetica - compact binary protocol for sensor nodes
#[derive(Parser, Debug)]
#[command(
    name = "kinetica",
    author,
    version,
    about = "Compact binary wire protocol for low-power sensor nodes",
    long_about = r#"
Kinetica encodes sensor telemetry into small, self-describing packets
carried over TCP, UDP, serial or BLE.

QUICK START:
  Collector:  kinetica listen --medium udp
  Sensor:     kinetica send register --medium udp
  Inspect:    kinetica decode 4b4e0101030701000000005501
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a collector and print every inbound message
    Listen(ListenArgs),

    /// Send a demo message to a collector
    Send(SendArgs),

    /// Print the hex encoding of a demo message
    Encode(EncodeArgs),

    /// Decode a hex-encoded packet
    Decode(DecodeArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Listen command arguments
#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Listen address (default: from config)
    #[arg(short, long)]
    pub addr: Option<SocketAddr>,

    /// Listening medium (default: from config)
    #[arg(short, long)]
    pub medium: Option<Medium>,

    /// Footer scheme override
    #[arg(long)]
    pub crc: Option<TransportCrc>,

    /// Do not acknowledge registrations
    #[arg(long)]
    pub no_ack: bool,

    /// Join fragments before printing the packet they carry
    #[arg(long)]
    pub reassemble: bool,
}

/// Send command arguments
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Message to send
    pub kind: DemoMessage,

    /// Collector address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,

    /// Transport medium
    #[arg(short, long, default_value = "tcp")]
    pub medium: Medium,

    /// Footer scheme override
    #[arg(long)]
    pub crc: Option<TransportCrc>,

    /// Sensor ID to use
    #[arg(short, long, default_value = "1")]
    pub sensor_id: u8,

    /// Wait this long for an acknowledgment (e.g. 2s)
    #[arg(long, value_parser = humantime_duration)]
    pub wait_ack: Option<std::time::Duration>,
}

/// Encode command arguments
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Message to encode
    pub kind: DemoMessage,

    /// Footer scheme
    #[arg(long, default_value = "none")]
    pub crc: TransportCrc,

    /// Packet ID to stamp into the header
    #[arg(short, long, default_value = "1")]
    pub packet_id: u8,

    /// Sensor ID to use
    #[arg(short, long, default_value = "1")]
    pub sensor_id: u8,
}

/// Decode command arguments
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Packet bytes as hex (whitespace allowed)
    pub hex: String,

    /// Footer scheme the packet was encoded with
    #[arg(long, default_value = "none")]
    pub crc: TransportCrc,

    /// Footer scheme of packets embedded in relays
    #[arg(long, default_value = "none")]
    pub relay_crc: TransportCrc,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Demo messages the CLI can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoMessage {
    /// Heartbeat with battery level
    Heartbeat,
    /// Single accelerometer reading
    Data,
    /// Device registration
    Register,
    /// Accelerometer and gyroscope readings
    Multi,
    /// Heartbeat wrapped by a relay
    Relay,
}

fn humantime_duration(s: &str) -> Result<std::time::Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}
