//! Packet counters for one network stack.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters owned by a `NetworkStack`, shared with its handle.
#[derive(Debug, Default)]
pub struct StackMetrics {
    pub rx_frames: Counter,
    pub rx_bytes: Counter,
    pub tx_frames: Counter,
    pub tx_bytes: Counter,
    /// Sends the interface refused.
    pub tx_errors: Counter,
    /// Frames or packets that failed to decode.
    pub parse_errors: Counter,

    /// Frames classified as DHCP and given to the interceptor.
    pub dhcp_frames: Counter,
    /// Frames given to the generic dispatcher.
    pub dispatched_frames: Counter,
    /// Frames the dispatcher dropped without error (no listener, not for us, ...).
    pub dropped_frames: Counter,

    pub lease_updates: Counter,
    pub dhcp_replies: Counter,
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,
    pub icmp_echo_replies: Counter,
    pub udp_delivered: Counter,
    pub tcp_delivered: Counter,
}

impl StackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_frames.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_frames.inc();
        self.tx_bytes.add(bytes as u64);
    }

    /// Exports all counters as name/value pairs, in a fixed order.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("rx_frames", self.rx_frames.get()),
            ("rx_bytes", self.rx_bytes.get()),
            ("tx_frames", self.tx_frames.get()),
            ("tx_bytes", self.tx_bytes.get()),
            ("tx_errors", self.tx_errors.get()),
            ("parse_errors", self.parse_errors.get()),
            ("dhcp_frames", self.dhcp_frames.get()),
            ("dispatched_frames", self.dispatched_frames.get()),
            ("dropped_frames", self.dropped_frames.get()),
            ("lease_updates", self.lease_updates.get()),
            ("dhcp_replies", self.dhcp_replies.get()),
            ("arp_requests_sent", self.arp_requests_sent.get()),
            ("arp_replies_sent", self.arp_replies_sent.get()),
            ("icmp_echo_replies", self.icmp_echo_replies.get()),
            ("udp_delivered", self.udp_delivered.get()),
            ("tcp_delivered", self.tcp_delivered.get()),
        ]
    }
}
