//! UDP transport tests - one packet per datagram over loopback.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use kinetica::error::{Error, ProtocolError, TransportError};
use kinetica::protocol::{
    encode_packet, Ack, AckStatus, CustomData, CustomType, Fragment, Item, Message,
    SensorHeartbeat, TimeSync, TransportCrc,
};
use kinetica::transport::{Connection, TransportConfig, UdpConnection};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn heartbeat() -> Message {
    SensorHeartbeat {
        sensor_id: 12,
        timestamp: 77,
        battery: 99,
        status: Default::default(),
    }
    .into()
}

#[tokio::test]
async fn test_udp_request_reply() {
    let config = TransportConfig::default();
    let server = UdpConnection::bind(loopback(), &config).unwrap();
    let server_addr = server.local_addr().unwrap();
    assert_eq!(server.crc(), TransportCrc::Crc8);

    let client = UdpConnection::connect(server_addr, &config).await.unwrap();
    assert_eq!(client.transport_type(), "udp");

    client.send(&heartbeat()).await.unwrap();
    let (packet, from) = server.recv_from().await.unwrap();
    assert_eq!(packet.message, heartbeat());
    assert_eq!(from.port(), client.local_addr().unwrap().port());
    assert_eq!(server.peer_addr(), Some(from));

    // Plain send replies to the last sender.
    let ack: Message = Ack {
        sensor_id: 12,
        message_id: u16::from(packet.packet_id()),
        status: AckStatus::OK,
    }
    .into();
    server.send(&ack).await.unwrap();

    let reply = client.recv().await.unwrap();
    assert_eq!(reply.message, ack);
}

#[tokio::test]
async fn test_udp_send_to_explicit_peer() {
    let config = TransportConfig::default();
    let a = UdpConnection::bind(loopback(), &config).unwrap();
    let b = UdpConnection::bind(loopback(), &config).unwrap();

    let sync: Message = TimeSync {
        sensor_id: 1,
        server_time: 500,
        sensor_time: 450,
    }
    .into();

    let id = a.send_to(&sync, b.local_addr().unwrap()).await.unwrap();
    let (packet, from) = b.recv_from().await.unwrap();
    assert_eq!(packet.packet_id(), id);
    assert_eq!(packet.message, sync);
    assert_eq!(from, a.local_addr().unwrap());
}

#[tokio::test]
async fn test_udp_unknown_peer_send_fails() {
    let server = UdpConnection::bind(loopback(), &TransportConfig::default()).unwrap();
    assert!(matches!(
        server.send(&heartbeat()).await,
        Err(Error::Transport(TransportError::SendFailed(_)))
    ));
}

#[tokio::test]
async fn test_udp_corrupt_datagram_then_recovery() {
    let config = TransportConfig::default();
    let server = UdpConnection::bind(loopback(), &config).unwrap();
    let server_addr = server.local_addr().unwrap();

    let raw = UdpSocket::bind(loopback()).await.unwrap();
    let mut bytes = encode_packet(3, &heartbeat(), TransportCrc::Crc8).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5A;
    raw.send_to(&bytes, server_addr).await.unwrap();

    let err = server.recv_from().await.unwrap_err();
    assert!(err.is_packet_error());
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::InvalidFooter { .. })
    ));
    assert_eq!(server.stats().packets_dropped, 1);

    // The next good datagram is unaffected.
    let good = encode_packet(4, &heartbeat(), TransportCrc::Crc8).unwrap();
    raw.send_to(&good, server_addr).await.unwrap();
    let (packet, _) = server.recv_from().await.unwrap();
    assert_eq!(packet.packet_id(), 4);
}

#[tokio::test]
async fn test_udp_size_limit() {
    let config = TransportConfig {
        max_message_size: Some(64),
        ..Default::default()
    };
    let server = UdpConnection::bind(loopback(), &config).unwrap();
    let server_addr = server.local_addr().unwrap();
    let client = UdpConnection::connect(server_addr, &config).await.unwrap();

    let big = Fragment {
        message_id: 1,
        fragment_num: 0,
        total_fragments: 1,
        data: vec![7; 100],
    };

    // Fragments may exceed the limit in both directions.
    client.send(&big.clone().into()).await.unwrap();
    let (packet, _) = server.recv_from().await.unwrap();
    assert_eq!(packet.message, Message::Fragment(big));

    // Anything else over the limit is dropped by the receiver.
    let custom: Message = CustomData {
        sensor_id: 1,
        timestamp: 2,
        data_type: CustomType::BINARY,
        items: vec![Item::new(1u8, vec![0; 80])],
    }
    .into();
    let raw = UdpSocket::bind(loopback()).await.unwrap();
    let bytes = encode_packet(1, &custom, TransportCrc::Crc8).unwrap();
    raw.send_to(&bytes, server_addr).await.unwrap();

    let err = server.recv_from().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::MessageTooLarge { max: 64, .. })
    ));
}

#[tokio::test]
async fn test_udp_read_timeout() {
    let config = TransportConfig {
        read_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let server = UdpConnection::bind(loopback(), &config).unwrap();
    let err = server.recv_from().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::ReadTimeout)
    ));
    assert!(err.is_recoverable());
}
