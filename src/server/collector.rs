//! Sensor collector: accepts sensor connections and forwards decoded packets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::relay::{unwrap_relayed, DEFAULT_MAX_RELAY_DEPTH};
use crate::protocol::{decode_packet, Ack, AckStatus, Message, Packet, Reassembler, TransportCrc};
use crate::transport::{Connection, Medium, TcpTransport, TransportConfig, UdpConnection};

/// Collector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Listening medium (tcp or udp).
    #[serde(default)]
    pub medium: Medium,

    /// Answer registrations with an OK acknowledgment.
    #[serde(default = "default_ack_registrations")]
    pub ack_registrations: bool,

    /// Maximum nesting of relayed packets.
    #[serde(default = "default_max_relay_depth")]
    pub max_relay_depth: usize,

    /// Footer scheme of packets embedded in relays and fragments.
    #[serde(default = "default_relay_crc")]
    pub relay_crc: TransportCrc,

    /// Join fragments into the packet they carry before forwarding.
    #[serde(default)]
    pub reassemble_fragments: bool,

    /// Drop partially received fragmented packets after this long.
    #[serde(default = "default_fragment_timeout", with = "humantime_serde")]
    pub fragment_timeout: Duration,

    /// Capacity of the inbound packet channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT))
}
fn default_ack_registrations() -> bool {
    true
}
fn default_max_relay_depth() -> usize {
    DEFAULT_MAX_RELAY_DEPTH
}
fn default_relay_crc() -> TransportCrc {
    TransportCrc::None
}
fn default_fragment_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_channel_capacity() -> usize {
    1024
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            medium: Medium::default(),
            ack_registrations: default_ack_registrations(),
            max_relay_depth: default_max_relay_depth(),
            relay_crc: default_relay_crc(),
            reassemble_fragments: false,
            fragment_timeout: default_fragment_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// A packet received by the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Address the packet arrived from.
    pub peer: SocketAddr,
    /// Originating packet, with relays unwrapped.
    pub packet: Packet,
    /// Relays the packet passed through, outermost first.
    pub relay_path: Vec<u8>,
}

impl Inbound {
    pub fn message(&self) -> &Message {
        &self.packet.message
    }

    pub fn is_relayed(&self) -> bool {
        !self.relay_path.is_empty()
    }
}

/// Handle for stopping a running collector.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Request shutdown of the accept loop and every connection task.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

enum Listener {
    Tcp(TcpTransport),
    Udp(UdpConnection),
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    relay_crc: TransportCrc,
    ack_registrations: bool,
    max_relay_depth: usize,
    reassemble_fragments: bool,
    fragment_timeout: Duration,
}

impl Settings {
    fn from_config(config: &CollectorConfig) -> Self {
        Self {
            relay_crc: config.relay_crc,
            ack_registrations: config.ack_registrations,
            max_relay_depth: config.max_relay_depth,
            reassemble_fragments: config.reassemble_fragments,
            fragment_timeout: config.fragment_timeout,
        }
    }
}

/// Collects packets from sensors over TCP or UDP.
pub struct Collector {
    config: CollectorConfig,
    listener: Listener,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    active: Arc<AtomicUsize>,
}

impl Collector {
    /// Bind the listening socket.
    pub fn bind(config: CollectorConfig, transport: &TransportConfig) -> Result<Self> {
        let (listener, local_addr) = match config.medium {
            Medium::Tcp => {
                let tcp = TcpTransport::bind(config.listen, transport)?;
                let addr = tcp.local_addr();
                (Listener::Tcp(tcp), addr)
            }
            Medium::Udp => {
                let udp = UdpConnection::bind(config.listen, transport)?;
                let addr = udp.local_addr()?;
                (Listener::Udp(udp), addr)
            }
            other => {
                return Err(Error::InvalidConfig(format!(
                    "collector cannot listen on {other}"
                )))
            }
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            local_addr,
            shutdown_tx,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Number of open TCP connections.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Run in a background task, returning the inbound packet stream.
    pub fn spawn(self) -> (mpsc::Receiver<Inbound>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    /// Serve until shutdown is requested or `tx` is closed.
    pub async fn run(self, tx: mpsc::Sender<Inbound>) -> Result<()> {
        info!(addr = %self.local_addr, medium = %self.config.medium, "collector listening");

        match &self.listener {
            Listener::Tcp(tcp) => self.run_tcp(tcp, tx).await,
            Listener::Udp(udp) => self.run_udp(udp, tx).await,
        }

        info!("collector stopped");
        Ok(())
    }

    async fn run_tcp(&self, tcp: &TcpTransport, tx: mpsc::Sender<Inbound>) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                () = tx.closed() => break,
                accepted = tcp.accept() => accepted,
            };

            let (conn, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            info!(%peer, "sensor connected");
            let settings = Settings::from_config(&self.config);
            let tx = tx.clone();
            let shutdown = self.shutdown_tx.subscribe();
            let active = Arc::clone(&self.active);

            active.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                serve_stream(conn, peer, settings, tx, shutdown).await;
                active.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    async fn run_udp(&self, udp: &UdpConnection, tx: mpsc::Sender<Inbound>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let settings = Settings::from_config(&self.config);
        let mut reassemblers: HashMap<SocketAddr, Reassembler> = HashMap::new();

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break,
                () = tx.closed() => break,
                received = udp.recv_from() => received,
            };

            let (packet, peer) = match received {
                Ok(received) => received,
                Err(e) if e.is_packet_error() || e.is_recoverable() => {
                    warn!(error = %e, "dropped datagram");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "udp socket failed");
                    break;
                }
            };

            let packet = if settings.reassemble_fragments {
                let reassembler = reassemblers.entry(peer).or_default();
                let joined = reassemble(reassembler, packet, peer, settings);
                reassemblers.retain(|_, r| r.pending() > 0);
                match joined {
                    Some(packet) => packet,
                    None => continue,
                }
            } else {
                packet
            };

            let inbound = process_packet(packet, peer, settings);

            if let Some(ack) = registration_ack(&inbound, settings) {
                if let Err(e) = udp.send_to(&ack, peer).await {
                    warn!(%peer, error = %e, "failed to send ack");
                }
            }

            if tx.send(inbound).await.is_err() {
                break;
            }
        }
    }
}

/// Serve one stream connection until it closes, fails, or shutdown.
async fn serve_stream<C: Connection>(
    conn: C,
    peer: SocketAddr,
    settings: Settings,
    tx: mpsc::Sender<Inbound>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut reassembler = Reassembler::new();

    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => break,
            received = conn.recv() => received,
        };

        let packet = match received {
            Ok(packet) => packet,
            Err(Error::ConnectionClosed) => {
                info!(%peer, "sensor disconnected");
                break;
            }
            // A bad magic means the stream lost packet alignment.
            Err(Error::Protocol(e)) if e.kind() != ErrorKind::Framing => {
                warn!(%peer, error = %e, "dropped packet");
                continue;
            }
            Err(e) if e.is_packet_error() && !matches!(e, Error::Protocol(_)) => {
                warn!(%peer, error = %e, "dropped packet");
                continue;
            }
            Err(e) => {
                warn!(%peer, error = %e, "closing connection");
                break;
            }
        };

        let packet = if settings.reassemble_fragments {
            match reassemble(&mut reassembler, packet, peer, settings) {
                Some(packet) => packet,
                None => continue,
            }
        } else {
            packet
        };

        let inbound = process_packet(packet, peer, settings);

        if let Some(ack) = registration_ack(&inbound, settings) {
            if let Err(e) = conn.send(&ack).await {
                warn!(%peer, error = %e, "failed to send ack");
            }
        }

        if tx.send(inbound).await.is_err() {
            break;
        }
    }

    let _ = conn.close().await;
}

/// Unwrap relays. A relay whose embedded packet cannot be decoded is
/// forwarded as is, with an empty path.
fn process_packet(packet: Packet, peer: SocketAddr, settings: Settings) -> Inbound {
    if !matches!(packet.message, Message::Relayed(_)) {
        debug!(
            %peer,
            packet_id = packet.packet_id(),
            msg_type = %packet.message_type(),
            "packet received"
        );
        return Inbound {
            peer,
            packet,
            relay_path: Vec::new(),
        };
    }

    match unwrap_relayed(packet.clone(), settings.relay_crc, settings.max_relay_depth) {
        Ok((packet, relay_path)) => {
            debug!(
                %peer,
                packet_id = packet.packet_id(),
                msg_type = %packet.message_type(),
                relays = relay_path.len(),
                "relayed packet received"
            );
            Inbound {
                peer,
                packet,
                relay_path,
            }
        }
        Err(e) => {
            warn!(%peer, error = %e, "failed to unwrap relayed packet, forwarding as is");
            Inbound {
                peer,
                packet,
                relay_path: Vec::new(),
            }
        }
    }
}

/// Hold back fragments until the packet they carry is complete.
///
/// Other packets pass through. The joined bytes must form one packet
/// encoded with the relay footer scheme.
fn reassemble(
    reassembler: &mut Reassembler,
    packet: Packet,
    peer: SocketAddr,
    settings: Settings,
) -> Option<Packet> {
    let fragment = match packet.message {
        Message::Fragment(fragment) => fragment,
        message => {
            return Some(Packet {
                header: packet.header,
                message,
            })
        }
    };

    let evicted = reassembler.evict_older_than(settings.fragment_timeout);
    if evicted > 0 {
        debug!(%peer, evicted, "dropped stale fragmented packets");
    }

    let message_id = fragment.message_id;
    match reassembler.push(fragment) {
        Ok(Some(data)) => match decode_packet(&data, settings.relay_crc) {
            Ok(packet) => {
                debug!(%peer, message_id, size = data.len(), "fragmented packet reassembled");
                Some(packet)
            }
            Err(e) => {
                warn!(%peer, message_id, error = %e, "reassembled data is not a packet");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(%peer, message_id, error = %e, "dropped fragment");
            None
        }
    }
}

fn registration_ack(inbound: &Inbound, settings: Settings) -> Option<Message> {
    if !settings.ack_registrations {
        return None;
    }

    match inbound.message() {
        Message::Registration(reg) => {
            info!(
                sensor_id = reg.sensor_id,
                device_type = %reg.device_type,
                capabilities = reg.capabilities.bits(),
                "sensor registered"
            );
            Some(
                Ack {
                    sensor_id: reg.sensor_id,
                    message_id: u16::from(inbound.packet.packet_id()),
                    status: AckStatus::OK,
                }
                .into(),
            )
        }
        _ => None,
    }
}
