//! Byte/packet counters, consumed from the packet handler's hot path on
//! every frame read and written.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait Monitor: Send + Sync {
    fn downstream_add(&self, bytes: u64);
    fn downstream_packet_inc(&self);
    fn upstream_add(&self, bytes: u64);
    fn upstream_packet_inc(&self);
}

#[derive(Default)]
pub struct AtomicMonitor {
    downstream_bytes: AtomicU64,
    downstream_packets: AtomicU64,
    upstream_bytes: AtomicU64,
    upstream_packets: AtomicU64,
}

impl AtomicMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            downstream_bytes: self.downstream_bytes.load(Ordering::Relaxed),
            downstream_packets: self.downstream_packets.load(Ordering::Relaxed),
            upstream_bytes: self.upstream_bytes.load(Ordering::Relaxed),
            upstream_packets: self.upstream_packets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub downstream_bytes: u64,
    pub downstream_packets: u64,
    pub upstream_bytes: u64,
    pub upstream_packets: u64,
}

impl Monitor for AtomicMonitor {
    fn downstream_add(&self, bytes: u64) {
        self.downstream_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn downstream_packet_inc(&self) {
        self.downstream_packets.fetch_add(1, Ordering::Relaxed);
    }

    fn upstream_add(&self, bytes: u64) {
        self.upstream_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn upstream_packet_inc(&self) {
        self.upstream_packets.fetch_add(1, Ordering::Relaxed);
    }
}
