//! Generic frame dispatcher
//!
//! Handles every frame the DHCP classifier did not claim:
//!
//! - ARP goes to the ARP engine
//! - IPv4 ICMP goes to the echo responder
//! - IPv4 UDP/TCP goes to the listener registered for the destination port
//! - Everything else, IPv6 included, is dropped
//!
//! Traffic to a port with no listener is dropped without a reply (no RST,
//! no port unreachable).

use super::egress::Egress;
use super::listener::{TcpRegistry, TcpSegment, UdpDatagram, UdpRegistry};
use super::stack::Outbound;
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::Frame;
use crate::protocol::icmp::{build_echo_reply, IcmpPacket};
use crate::protocol::ipv4::{Ipv4Header, Protocol};
use crate::protocol::tcp::TcpHeader;
use crate::protocol::udp::UdpHeader;
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::StackMetrics;
use crate::{Error, Result};
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct Dispatcher {
    udp: Arc<UdpRegistry>,
    tcp: Arc<TcpRegistry>,
    egress: Egress,
    metrics: Arc<StackMetrics>,
}

impl Dispatcher {
    pub fn new(
        udp: Arc<UdpRegistry>,
        tcp: Arc<TcpRegistry>,
        egress: Egress,
        metrics: Arc<StackMetrics>,
    ) -> Self {
        Self {
            udp,
            tcp,
            egress,
            metrics,
        }
    }

    pub fn egress(&self) -> &Egress {
        &self.egress
    }

    /// Route one frame; returns the frames to transmit in response.
    ///
    /// Decode failures are logged and counted, never returned.
    pub fn dispatch(&mut self, frame: &[u8], now: u64) -> Vec<Vec<u8>> {
        match self.try_dispatch(frame, now) {
            Ok(frames) => frames,
            Err(e) => {
                debug!("Dropping frame: {}", e);
                self.metrics.parse_errors.inc();
                Vec::new()
            }
        }
    }

    /// Send traffic originated through the stack accessors
    pub fn originate(&mut self, outbound: Outbound, now: u64) -> Vec<Vec<u8>> {
        match outbound {
            Outbound::Ipv4 {
                dst,
                protocol,
                payload,
            } => self.egress.send_ipv4(dst, protocol, &payload, now),
            Outbound::Udp(send) => self.egress.send_udp(&send, now),
            Outbound::Tcp(send) => self.egress.send_tcp(&send, now),
        }
    }

    pub fn age(&mut self, now: u64) {
        self.egress.age(now);
    }

    fn try_dispatch(&mut self, frame: &[u8], now: u64) -> Result<Vec<Vec<u8>>> {
        let eth = Frame::parse(frame)?;

        match EtherType::from_u16(eth.ethertype()) {
            Some(EtherType::Arp) => {
                let arp = ArpPacket::parse(eth.payload())?;
                trace!("ARP {:?} from {}", arp.operation, arp.sender_ip);
                Ok(self.egress.on_arp(&arp, now))
            }
            Some(EtherType::Ipv4) => self.handle_ipv4(eth.src_mac(), eth.payload(), now),
            Some(EtherType::Ipv6) | None => {
                trace!("Ignoring EtherType {:#06x}", eth.ethertype());
                self.metrics.dropped_frames.inc();
                Ok(Vec::new())
            }
        }
    }

    fn handle_ipv4(&mut self, src_mac: MacAddr, payload: &[u8], now: u64) -> Result<Vec<Vec<u8>>> {
        let ip = Ipv4Header::parse(payload)?;
        if !ip.validate_checksum() {
            return Err(Error::InvalidPacket(format!(
                "bad IPv4 header checksum from {}",
                ip.src_addr()
            )));
        }

        if !self.egress.interface().accepts(ip.dst_addr()) {
            trace!("Ignoring IPv4 packet for {}", ip.dst_addr());
            self.metrics.dropped_frames.inc();
            return Ok(Vec::new());
        }
        if ip.is_fragment() {
            debug!("Dropping fragment from {}", ip.src_addr());
            self.metrics.dropped_frames.inc();
            return Ok(Vec::new());
        }

        match Protocol::from_u8(ip.protocol()) {
            Some(Protocol::Icmp) => self.handle_icmp(src_mac, &ip, now),
            Some(Protocol::Udp) => self.handle_udp(src_mac, &ip, now),
            Some(Protocol::Tcp) => self.handle_tcp(src_mac, &ip, now),
            None => {
                trace!("Ignoring IP protocol {} from {}", ip.protocol(), ip.src_addr());
                self.metrics.dropped_frames.inc();
                Ok(Vec::new())
            }
        }
    }

    fn handle_icmp(
        &mut self,
        src_mac: MacAddr,
        ip: &Ipv4Header<'_>,
        now: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let icmp = IcmpPacket::parse(ip.payload())?;
        if !icmp.validate_checksum() {
            return Err(Error::InvalidPacket(format!(
                "bad ICMP checksum from {}",
                ip.src_addr()
            )));
        }

        // only unicast echo is answered
        if !icmp.is_echo_request() || ip.dst_addr() != self.egress.interface().ip {
            trace!("Ignoring ICMP type {} from {}", icmp.icmp_type(), ip.src_addr());
            self.metrics.dropped_frames.inc();
            return Ok(Vec::new());
        }

        let mut frames = self.egress.learn(ip.src_addr(), src_mac, now);
        let reply = build_echo_reply(&icmp);
        frames.extend(
            self.egress
                .send_ipv4(ip.src_addr(), Protocol::Icmp as u8, &reply, now),
        );
        debug!(
            "Echo reply to {} id={} seq={}",
            ip.src_addr(),
            icmp.identifier(),
            icmp.sequence()
        );
        self.metrics.icmp_echo_replies.inc();
        Ok(frames)
    }

    fn handle_udp(
        &mut self,
        src_mac: MacAddr,
        ip: &Ipv4Header<'_>,
        now: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let udp = UdpHeader::parse(ip.payload())?;
        if !udp.validate_checksum(ip.src_addr(), ip.dst_addr()) {
            return Err(Error::InvalidPacket(format!(
                "bad UDP checksum from {}:{}",
                ip.src_addr(),
                udp.src_port()
            )));
        }

        let Some(listener) = self.udp.lookup(udp.dst_port()) else {
            trace!("No UDP listener on port {}", udp.dst_port());
            self.metrics.dropped_frames.inc();
            return Ok(Vec::new());
        };

        let datagram = UdpDatagram {
            src: SocketAddrV4::new(ip.src_addr(), udp.src_port()),
            dst: SocketAddrV4::new(ip.dst_addr(), udp.dst_port()),
            payload: udp.payload(),
        };
        self.metrics.udp_delivered.inc();

        let mut frames = self.egress.learn(ip.src_addr(), src_mac, now);
        for send in listener.on_datagram(&datagram) {
            frames.extend(self.egress.send_udp(&send, now));
        }
        Ok(frames)
    }

    fn handle_tcp(
        &mut self,
        src_mac: MacAddr,
        ip: &Ipv4Header<'_>,
        now: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let tcp = TcpHeader::parse(ip.payload())?;
        if !tcp.validate_checksum(ip.src_addr(), ip.dst_addr()) {
            return Err(Error::InvalidPacket(format!(
                "bad TCP checksum from {}:{}",
                ip.src_addr(),
                tcp.src_port()
            )));
        }

        let Some(binding) = self.tcp.lookup(tcp.dst_port()) else {
            trace!("No TCP listener on port {}", tcp.dst_port());
            self.metrics.dropped_frames.inc();
            return Ok(Vec::new());
        };

        let segment = TcpSegment {
            src: SocketAddrV4::new(ip.src_addr(), tcp.src_port()),
            dst: SocketAddrV4::new(ip.dst_addr(), tcp.dst_port()),
            seq: tcp.seq_num(),
            ack: tcp.ack_num(),
            flags: tcp.flags(),
            window: tcp.window(),
            payload: tcp.payload(),
        };
        self.metrics.tcp_delivered.inc();

        let mut frames = self.egress.learn(ip.src_addr(), src_mac, now);
        for send in binding
            .listener
            .on_segment(&segment, binding.keepalive.as_ref())
        {
            frames.extend(self.egress.send_tcp(&send, now));
        }
        Ok(frames)
    }
}
