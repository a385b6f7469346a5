//! Server-side components for Kinetica.
//!
//! The collector accepts sensor connections, unwraps relayed packets,
//! acknowledges registrations and hands every packet to the application
//! over a channel.

mod collector;

pub use collector::{Collector, CollectorConfig, Inbound, ShutdownHandle};
