//! Collector tests - sensors talking to a running collector.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use kinetica::protocol::{
    encode_packet, split, Ack, AckStatus, Capabilities, ConfigKey, DeviceType, Item, Message,
    Registration, RelayedMessage, SensorConfig, SensorHeartbeat, TransportCrc,
};
use kinetica::server::{Collector, CollectorConfig, Inbound};
use kinetica::transport::{Connection, Medium, TcpTransport, TransportConfig, UdpConnection};

const WAIT: Duration = Duration::from_secs(5);

fn config(medium: Medium) -> CollectorConfig {
    CollectorConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        medium,
        ..Default::default()
    }
}

fn registration(sensor_id: u8) -> Message {
    Registration {
        sensor_id,
        device_type: DeviceType::SIX_AXIS,
        capabilities: Capabilities::new(Capabilities::ACCELEROMETER),
        fw_version: 0x0100,
    }
    .into()
}

fn heartbeat(sensor_id: u8) -> Message {
    SensorHeartbeat {
        sensor_id,
        timestamp: 1,
        battery: 80,
        status: Default::default(),
    }
    .into()
}

async fn next(rx: &mut mpsc::Receiver<Inbound>) -> Inbound {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for inbound packet")
        .expect("collector channel closed")
}

#[tokio::test]
async fn test_tcp_registration_acknowledged() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(config(Medium::Tcp), &transport).unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    let sensor = TcpTransport::connect(addr, &transport).await.unwrap();
    let packet_id = sensor.send(&registration(3)).await.unwrap();

    let inbound = next(&mut rx).await;
    assert_eq!(inbound.message(), &registration(3));
    assert!(!inbound.is_relayed());
    assert_eq!(inbound.peer.ip(), addr.ip());

    let ack = timeout(WAIT, sensor.recv()).await.unwrap().unwrap();
    assert_eq!(
        ack.message,
        Message::Ack(Ack {
            sensor_id: 3,
            message_id: u16::from(packet_id),
            status: AckStatus::OK,
        })
    );
}

#[tokio::test]
async fn test_tcp_bad_packet_does_not_end_connection() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(config(Medium::Tcp), &transport).unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Well-framed packet with an unknown type tag, then a valid one.
    stream.write_all(&[0x4B, 0x4E, 1, 1, 0x42, 0]).await.unwrap();
    let good = encode_packet(2, &heartbeat(9), TransportCrc::None).unwrap();
    stream.write_all(&good).await.unwrap();

    let inbound = next(&mut rx).await;
    assert_eq!(inbound.packet.packet_id(), 2);
    assert_eq!(inbound.message(), &heartbeat(9));
}

#[tokio::test]
async fn test_udp_relayed_registration() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(config(Medium::Udp), &transport).unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    // Embedded packets carry no footer; only the UDP link adds CRC-8.
    let origin = encode_packet(11, &registration(21), TransportCrc::None).unwrap();
    let hop =
        encode_packet(0, &RelayedMessage::wrap(2, origin).into(), TransportCrc::None).unwrap();
    let relayed: Message = RelayedMessage::wrap(1, hop).into();

    let relay = UdpConnection::connect(addr, &transport).await.unwrap();
    assert_eq!(relay.crc(), TransportCrc::Crc8);
    relay.send(&relayed).await.unwrap();

    let inbound = next(&mut rx).await;
    assert!(inbound.is_relayed());
    assert_eq!(inbound.relay_path, vec![1, 2]);
    assert_eq!(inbound.packet.packet_id(), 11);
    assert_eq!(inbound.message(), &registration(21));

    // The ack goes back to whoever delivered the packet.
    let ack = timeout(WAIT, relay.recv()).await.unwrap().unwrap();
    assert_eq!(
        ack.message,
        Message::Ack(Ack {
            sensor_id: 21,
            message_id: 11,
            status: AckStatus::OK,
        })
    );
}

#[tokio::test]
async fn test_undecodable_relay_forwarded_as_is() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(config(Medium::Udp), &transport).unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    // Embedded bytes lost their magic on the way.
    let mut damaged = encode_packet(11, &registration(21), TransportCrc::None).unwrap();
    damaged[0] = b'X';
    let relayed: Message = RelayedMessage::wrap(7, damaged).into();

    let relay = UdpConnection::connect(addr, &transport).await.unwrap();
    relay.send(&relayed).await.unwrap();

    let inbound = next(&mut rx).await;
    assert!(!inbound.is_relayed());
    assert_eq!(inbound.message(), &relayed);
}

#[tokio::test]
async fn test_udp_fragments_reassembled() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(
        CollectorConfig {
            reassemble_fragments: true,
            ..config(Medium::Udp)
        },
        &transport,
    )
    .unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    let settings: Message = SensorConfig {
        sensor_id: 4,
        timestamp: 100,
        items: vec![
            Item::new(ConfigKey::DEVICE_NAME, vec![b'n'; 120]),
            Item::new(ConfigKey::SAMPLE_RATE, 200u16.to_le_bytes()),
            Item::new(ConfigKey::DEVICE_NAME, vec![b'm'; 100]),
        ],
    }
    .into();
    let bytes = encode_packet(8, &settings, TransportCrc::None).unwrap();
    assert!(bytes.len() > 200);

    let sensor = UdpConnection::connect(addr, &transport).await.unwrap();
    for fragment in split(3, &bytes, 100).unwrap() {
        sensor.send(&fragment.into()).await.unwrap();
    }
    sensor.send(&heartbeat(4)).await.unwrap();

    let inbound = next(&mut rx).await;
    assert_eq!(inbound.packet.packet_id(), 8);
    assert_eq!(inbound.message(), &settings);

    // Nothing else was held back or forwarded in pieces.
    assert_eq!(next(&mut rx).await.message(), &heartbeat(4));
}

#[tokio::test]
async fn test_udp_without_acks() {
    let transport = TransportConfig {
        read_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let collector = Collector::bind(
        CollectorConfig {
            ack_registrations: false,
            ..config(Medium::Udp)
        },
        &transport,
    )
    .unwrap();
    let addr = collector.local_addr();
    let (mut rx, _handle) = collector.spawn();

    let sensor = UdpConnection::connect(addr, &transport).await.unwrap();
    sensor.send(&registration(5)).await.unwrap();
    assert_eq!(next(&mut rx).await.message(), &registration(5));

    assert!(sensor.recv().await.is_err());
}

#[tokio::test]
async fn test_shutdown_stops_collector() {
    let transport = TransportConfig::default();
    let collector = Collector::bind(config(Medium::Tcp), &transport).unwrap();
    let addr: SocketAddr = collector.local_addr();
    let shutdown = collector.shutdown_handle();
    let (mut rx, handle) = collector.spawn();

    let sensor = TcpTransport::connect(addr, &transport).await.unwrap();
    sensor.send(&heartbeat(1)).await.unwrap();
    next(&mut rx).await;

    shutdown.shutdown();
    timeout(WAIT, handle).await.unwrap().unwrap().unwrap();

    // Every connection task drops its sender, closing the channel.
    assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
}
