//! Core types used throughout Kinetica.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Per-connection packet ID generator.
///
/// IDs increase by one per packet and wrap from 255 to 0. Safe to share
/// between concurrent senders on the same connection.
#[derive(Debug, Default)]
pub struct PacketIdSequence(AtomicU8);

impl PacketIdSequence {
    /// Create a sequence whose first ID is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequence whose next ID is `start + 1`.
    pub fn starting_at(start: u8) -> Self {
        Self(AtomicU8::new(start))
    }

    /// Advance and return the new ID.
    pub fn next(&self) -> u8 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Last ID handed out (0 before the first call).
    pub fn current(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Connection established and usable
    Connected,
    /// Closed locally or by the peer
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Traffic statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Packets received but rejected by the codec.
    pub packets_dropped: u64,
}

impl TrafficStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn record_dropped(&mut self, bytes: usize) {
        self.packets_dropped += 1;
        self.bytes_received += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequence_starts_at_one() {
        let seq = PacketIdSequence::new();
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn test_sequence_wraps() {
        let seq = PacketIdSequence::starting_at(254);
        assert_eq!(seq.next(), 255);
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_sequence_concurrent_ids_unique() {
        let seq = Arc::new(PacketIdSequence::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..64).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        // 256 calls cover every ID exactly once.
        assert_eq!(ids.len(), 256);
    }

    #[test]
    fn test_traffic_stats() {
        let mut stats = TrafficStats::default();
        stats.record_sent(26);
        stats.record_received(11);
        stats.record_dropped(5);
        stats.record_received(16);

        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.bytes_sent, 26);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.bytes_received, 32);
        assert_eq!(stats.packets_dropped, 1);
    }
}
