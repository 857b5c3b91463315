//! IPv4 egress: next-hop selection, ARP resolution and framing

use super::arp_processor::{process_arp, ArpAction, ArpPendingQueue};
use super::arp_table::ArpTable;
use super::lease::prefix_mask;
use super::listener::{TcpSend, UdpSend};
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::ipv4::Ipv4Builder;
use crate::protocol::tcp::{self, TcpBuilder};
use crate::protocol::udp::{self, UdpBuilder};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::StackMetrics;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

const ARP_REACHABLE_SECS: u64 = 30;
const ARP_STALE_SECS: u64 = 120;
const ARP_QUEUE_MAX_PER_IP: usize = 8;
const ARP_QUEUE_MAX_AGE_SECS: u64 = 5;

/// Addressing of the single interface the stack owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub mtu: usize,
}

impl InterfaceInfo {
    pub fn subnet_mask(&self) -> Ipv4Addr {
        prefix_mask(self.prefix_len)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = u32::from(self.subnet_mask());
        Ipv4Addr::from((u32::from(self.ip) & mask) | !mask)
    }

    pub fn is_on_link(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.subnet_mask());
        u32::from(addr) & mask == u32::from(self.ip) & mask
    }

    /// Destinations the stack takes delivery for
    pub fn accepts(&self, dst: Ipv4Addr) -> bool {
        dst == self.ip || dst == Ipv4Addr::BROADCAST || dst == self.broadcast()
    }

    fn is_broadcast(&self, dst: Ipv4Addr) -> bool {
        dst == Ipv4Addr::BROADCAST || dst == self.broadcast()
    }
}

/// Turns IPv4 payloads into Ethernet frames ready for the interface
pub struct Egress {
    iface: InterfaceInfo,
    arp_table: ArpTable,
    pending: ArpPendingQueue,
    ip_id: u16,
    metrics: Arc<StackMetrics>,
}

impl Egress {
    pub fn new(iface: InterfaceInfo, metrics: Arc<StackMetrics>) -> Self {
        Self {
            iface,
            arp_table: ArpTable::new(ARP_REACHABLE_SECS, ARP_STALE_SECS),
            pending: ArpPendingQueue::new(ARP_QUEUE_MAX_PER_IP, ARP_QUEUE_MAX_AGE_SECS),
            ip_id: 0,
            metrics,
        }
    }

    pub fn interface(&self) -> &InterfaceInfo {
        &self.iface
    }

    pub fn arp_table(&self) -> &ArpTable {
        &self.arp_table
    }

    /// Send an IPv4 packet from the interface address.
    ///
    /// Returns the frames to put on the wire: the packet itself, an ARP
    /// request while the next hop is unresolved, or nothing.
    pub fn send_ipv4(
        &mut self,
        dst: Ipv4Addr,
        protocol: u8,
        payload: &[u8],
        now: u64,
    ) -> Vec<Vec<u8>> {
        self.ip_id = self.ip_id.wrapping_add(1);
        let packet = Ipv4Builder::new()
            .identification(self.ip_id)
            .protocol(protocol)
            .src_addr(self.iface.ip)
            .dst_addr(dst)
            .payload(payload)
            .build();

        if self.iface.is_broadcast(dst) {
            return vec![self.frame(MacAddr::BROADCAST, EtherType::Ipv4, &packet)];
        }

        let next_hop = if self.iface.is_on_link(dst) {
            dst
        } else if let Some(gateway) = self.iface.gateway {
            gateway
        } else {
            debug!("No route to {}, dropping packet", dst);
            return Vec::new();
        };

        if let Some(mac) = self.arp_table.lookup(&next_hop) {
            return vec![self.frame(mac, EtherType::Ipv4, &packet)];
        }

        if !self.pending.enqueue(next_hop, packet, now) {
            debug!("ARP queue full for {}, dropping packet", next_hop);
            return Vec::new();
        }
        if !self.arp_table.mark_incomplete(next_hop, now) {
            trace!("ARP request for {} already outstanding", next_hop);
            return Vec::new();
        }

        debug!("Resolving {} via ARP", next_hop);
        self.metrics.arp_requests_sent.inc();
        let request = ArpPacket::request(self.iface.mac, self.iface.ip, next_hop);
        vec![self.frame(MacAddr::BROADCAST, EtherType::Arp, &request.to_bytes())]
    }

    pub fn send_udp(&mut self, send: &UdpSend, now: u64) -> Vec<Vec<u8>> {
        let dst = *send.dst.ip();
        let datagram = UdpBuilder::new()
            .src_port(send.src_port)
            .dst_port(send.dst.port())
            .payload(&send.payload)
            .build(self.iface.ip, dst);
        self.send_ipv4(dst, udp::PROTOCOL_NUMBER, &datagram, now)
    }

    pub fn send_tcp(&mut self, send: &TcpSend, now: u64) -> Vec<Vec<u8>> {
        let dst = *send.dst.ip();
        let segment = TcpBuilder::new()
            .src_port(send.src_port)
            .dst_port(send.dst.port())
            .seq_num(send.seq)
            .ack_num(send.ack)
            .flags(send.flags)
            .window(send.window)
            .payload(&send.payload)
            .build(self.iface.ip, dst);
        self.send_ipv4(dst, tcp::PROTOCOL_NUMBER, &segment, now)
    }

    /// Record an on-link sender seen in IPv4 traffic for us
    ///
    /// Returns any packets that were waiting on it.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr, now: u64) -> Vec<Vec<u8>> {
        if !mac.is_unicast()
            || ip.is_unspecified()
            || !self.iface.is_on_link(ip)
            || self.iface.is_broadcast(ip)
            || ip == self.iface.ip
        {
            return Vec::new();
        }
        self.arp_table.insert(ip, mac, now);
        self.flush(ip, mac)
    }

    /// Run the ARP engine on a received packet
    pub fn on_arp(&mut self, packet: &ArpPacket, now: u64) -> Vec<Vec<u8>> {
        let action = process_arp(packet, &mut self.arp_table, self.iface.ip, self.iface.mac, now);
        match action {
            ArpAction::Reply(reply) => {
                debug!("Sending ARP reply to {}", reply.target_ip);
                self.metrics.arp_replies_sent.inc();
                let mut frames = vec![self.frame(reply.target_mac, EtherType::Arp, &reply.to_bytes())];
                frames.extend(self.flush(packet.sender_ip, packet.sender_mac));
                frames
            }
            ArpAction::TableUpdated => self.flush(packet.sender_ip, packet.sender_mac),
            ArpAction::None => Vec::new(),
        }
    }

    /// Age the ARP table and drop stale queued packets
    pub fn age(&mut self, now: u64) {
        self.arp_table.refresh_states(now);
        let dropped = self.pending.expire_old(now);
        if dropped > 0 {
            debug!("Dropped {} packets waiting on ARP", dropped);
        }
    }

    fn flush(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Vec<Vec<u8>> {
        let queued = self.pending.dequeue(&ip);
        if !queued.is_empty() {
            debug!("ARP resolved for {}, sending {} queued packets", ip, queued.len());
        }
        queued
            .iter()
            .map(|packet| self.frame(mac, EtherType::Ipv4, packet))
            .collect()
    }

    fn frame(&self, dst: MacAddr, ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
        FrameBuilder::new()
            .src_mac(self.iface.mac)
            .dst_mac(dst)
            .ethertype(ethertype as u16)
            .payload(payload)
            .build()
    }
}
