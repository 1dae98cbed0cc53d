//! Packet counters for one (or many) sessions.
//!
//! Counters are plain relaxed atomics so a shared `Arc<PacketMetrics>` can
//! be bumped from any session task and scraped by the host's exporter.

use crate::packet::Packet;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe metric updates.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-packet-type counters plus protocol error tallies.
#[derive(Debug, Default)]
pub struct PacketMetrics {
    pub sent_connack: Counter,
    pub sent_publish: Counter,
    pub sent_puback: Counter,
    pub sent_suback: Counter,
    pub sent_unsuback: Counter,
    pub sent_pingresp: Counter,

    pub recv_connect: Counter,
    pub recv_publish: Counter,
    pub recv_puback: Counter,
    pub recv_subscribe: Counter,
    pub recv_unsubscribe: Counter,
    pub recv_pingreq: Counter,
    pub recv_disconnect: Counter,

    pub acl_denials: Counter,
    pub protocol_errors: Counter,
    pub retransmissions: Counter,
}

impl PacketMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, packet: &Packet) {
        match packet {
            Packet::Connack { .. } => self.sent_connack.inc(),
            Packet::Publish(_) => self.sent_publish.inc(),
            Packet::Puback { .. } => self.sent_puback.inc(),
            Packet::Suback { .. } => self.sent_suback.inc(),
            Packet::Unsuback { .. } => self.sent_unsuback.inc(),
            Packet::Pingresp => self.sent_pingresp.inc(),
            _ => {}
        }
    }

    pub fn record_received(&self, packet: &Packet) {
        match packet {
            Packet::Connect(_) => self.recv_connect.inc(),
            Packet::Publish(_) => self.recv_publish.inc(),
            Packet::Puback { .. } => self.recv_puback.inc(),
            Packet::Subscribe(_) => self.recv_subscribe.inc(),
            Packet::Unsubscribe(_) => self.recv_unsubscribe.inc(),
            Packet::Pingreq => self.recv_pingreq.inc(),
            Packet::Disconnect => self.recv_disconnect.inc(),
            _ => {}
        }
    }

    /// Point-in-time copy for export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent_connack: self.sent_connack.get(),
            sent_publish: self.sent_publish.get(),
            sent_puback: self.sent_puback.get(),
            sent_suback: self.sent_suback.get(),
            sent_unsuback: self.sent_unsuback.get(),
            sent_pingresp: self.sent_pingresp.get(),
            recv_connect: self.recv_connect.get(),
            recv_publish: self.recv_publish.get(),
            recv_puback: self.recv_puback.get(),
            recv_subscribe: self.recv_subscribe.get(),
            recv_unsubscribe: self.recv_unsubscribe.get(),
            recv_pingreq: self.recv_pingreq.get(),
            recv_disconnect: self.recv_disconnect.get(),
            acl_denials: self.acl_denials.get(),
            protocol_errors: self.protocol_errors.get(),
            retransmissions: self.retransmissions.get(),
        }
    }
}

/// Serializable view of `PacketMetrics`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sent_connack: u64,
    pub sent_publish: u64,
    pub sent_puback: u64,
    pub sent_suback: u64,
    pub sent_unsuback: u64,
    pub sent_pingresp: u64,
    pub recv_connect: u64,
    pub recv_publish: u64,
    pub recv_puback: u64,
    pub recv_subscribe: u64,
    pub recv_unsubscribe: u64,
    pub recv_pingreq: u64,
    pub recv_disconnect: u64,
    pub acl_denials: u64,
    pub protocol_errors: u64,
    pub retransmissions: u64,
}
