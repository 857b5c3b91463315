//! ARP engine
//!
//! Answers requests for the interface address, learns senders, and holds
//! IPv4 packets that are waiting on resolution.

use super::ArpTable;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Result of processing an ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpAction {
    None,
    /// Send this reply to the requester
    Reply(ArpPacket),
    /// Sender binding was learned or refreshed
    TableUpdated,
}

/// Process an incoming ARP packet
///
/// The sender is learned when it is already in the table or when the
/// packet targets `local_ip` (RFC 826 merge rule).
pub fn process_arp(
    packet: &ArpPacket,
    table: &mut ArpTable,
    local_ip: Ipv4Addr,
    local_mac: MacAddr,
    now: u64,
) -> ArpAction {
    if packet.sender_ip.is_unspecified() || packet.sender_mac.is_multicast() {
        // probes and bogus senders
        return match packet.operation {
            ArpOp::Request if packet.target_ip == local_ip => ArpAction::Reply(ArpPacket::reply(
                local_mac,
                local_ip,
                packet.sender_mac,
                packet.sender_ip,
            )),
            _ => ArpAction::None,
        };
    }

    let targets_us = packet.target_ip == local_ip;
    let learned = table.contains(&packet.sender_ip) || targets_us;
    if learned {
        table.insert(packet.sender_ip, packet.sender_mac, now);
    }

    match packet.operation {
        ArpOp::Request if targets_us => ArpAction::Reply(ArpPacket::reply(
            local_mac,
            local_ip,
            packet.sender_mac,
            packet.sender_ip,
        )),
        _ if learned => ArpAction::TableUpdated,
        _ => ArpAction::None,
    }
}

#[derive(Debug)]
struct PendingPacket {
    /// IPv4 packet, without the Ethernet header
    data: Vec<u8>,
    queued_at: u64,
}

/// IPv4 packets waiting for a next-hop MAC
#[derive(Debug, Default)]
pub struct ArpPendingQueue {
    pending: HashMap<Ipv4Addr, Vec<PendingPacket>>,
    max_per_ip: usize,
    max_age_secs: u64,
}

impl ArpPendingQueue {
    pub fn new(max_per_ip: usize, max_age_secs: u64) -> Self {
        Self {
            pending: HashMap::new(),
            max_per_ip,
            max_age_secs,
        }
    }

    /// Returns false if the queue for `next_hop` is full
    pub fn enqueue(&mut self, next_hop: Ipv4Addr, packet: Vec<u8>, now: u64) -> bool {
        let queue = self.pending.entry(next_hop).or_default();
        if queue.len() >= self.max_per_ip {
            return false;
        }
        queue.push(PendingPacket {
            data: packet,
            queued_at: now,
        });
        true
    }

    /// Take every packet queued for `ip`, oldest first
    pub fn dequeue(&mut self, ip: &Ipv4Addr) -> Vec<Vec<u8>> {
        self.pending
            .remove(ip)
            .map(|packets| packets.into_iter().map(|p| p.data).collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, ip: &Ipv4Addr) -> bool {
        self.pending.get(ip).is_some_and(|v| !v.is_empty())
    }

    /// Drop packets older than the max age; returns how many were dropped
    pub fn expire_old(&mut self, now: u64) -> usize {
        let max_age = self.max_age_secs;
        let mut dropped = 0;
        for queue in self.pending.values_mut() {
            let before = queue.len();
            queue.retain(|p| now.saturating_sub(p.queued_at) < max_age);
            dropped += before - queue.len();
        }
        self.pending.retain(|_, v| !v.is_empty());
        dropped
    }

    /// Number of addresses with pending packets
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
