//! DHCP fast path
//!
//! Frames that look like DHCP never reach the dispatcher. The interceptor
//! owns the lease database and is the only writer of it.

use super::lease::{DhcpConfig, LeaseDatabase, LeaseEngine, LeaseOutcome};
use crate::protocol::dhcp::{looks_like_dhcp, DhcpMessage, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::protocol::ethernet::{Frame, FrameBuilder};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Header, MIN_HEADER_SIZE as IPV4_HEADER_SIZE};
use crate::protocol::udp::{UdpBuilder, UdpHeader, HEADER_SIZE as UDP_HEADER_SIZE};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::StackMetrics;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Cheap check run on every received frame.
///
/// True when the frame is addressed to `own_mac` (or is not unicast) and the
/// fixed-offset fields identify a BOOTP message with the DHCP cookie.
pub fn is_dhcp_frame(frame: &[u8], own_mac: MacAddr) -> bool {
    let Some(dst) = frame.get(..6).and_then(MacAddr::from_slice) else {
        return false;
    };
    (dst == own_mac || !dst.is_unicast()) && looks_like_dhcp(frame)
}

pub struct DhcpInterceptor {
    config: DhcpConfig,
    leases: LeaseDatabase,
    engine: Arc<dyn LeaseEngine>,
    mtu: usize,
    ip_id: u16,
    metrics: Arc<StackMetrics>,
}

impl DhcpInterceptor {
    pub fn new(
        config: DhcpConfig,
        engine: Arc<dyn LeaseEngine>,
        mtu: usize,
        metrics: Arc<StackMetrics>,
    ) -> Self {
        Self {
            config,
            leases: LeaseDatabase::new(),
            engine,
            mtu,
            ip_id: 0,
            metrics,
        }
    }

    pub fn config(&self) -> &DhcpConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseDatabase {
        &self.leases
    }

    /// Feed one classified frame to the lease engine.
    ///
    /// Returns the reply frame to transmit, if the engine produced one.
    pub fn handle(&mut self, frame: &[u8], now: u64) -> Option<Vec<u8>> {
        let msg = match Self::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping malformed DHCP frame: {}", e);
                self.metrics.parse_errors.inc();
                return None;
            }
        };

        match self.engine.input(&self.config, &self.leases, &msg, now) {
            LeaseOutcome::Silence => {
                trace!("DHCP {:?} xid={:#010x}: no action", msg.message_type, msg.xid);
                None
            }
            LeaseOutcome::Update(db) => {
                debug!(
                    "Lease database updated by {:?} from {} ({} leases)",
                    msg.message_type,
                    msg.client_mac(),
                    db.len()
                );
                self.leases = db;
                self.metrics.lease_updates.inc();
                None
            }
            LeaseOutcome::Warning(text) => {
                warn!("DHCP: {}", text);
                None
            }
            LeaseOutcome::Error(text) => {
                error!("DHCP: {}", text);
                None
            }
            LeaseOutcome::Reply(reply, db) => {
                let frame = self.encapsulate(reply.packet, reply.dst_ip, reply.dst_mac);
                let Some(frame) = frame else {
                    error!(
                        "DHCP {:?} for {} does not fit MTU {}, dropped with its lease update",
                        reply.message_type, reply.dst_mac, self.mtu
                    );
                    self.metrics.tx_errors.inc();
                    return None;
                };
                info!(
                    "DHCP {:?} to {} ({}) xid={:#010x}",
                    reply.message_type,
                    reply.dst_mac,
                    reply.dst_ip,
                    msg.xid
                );
                self.leases = db;
                self.metrics.dhcp_replies.inc();
                Some(frame)
            }
        }
    }

    fn decode(frame: &[u8]) -> Result<DhcpMessage> {
        let eth = Frame::parse(frame)?;
        let ip = Ipv4Header::parse(eth.payload())?;
        let udp = UdpHeader::parse(ip.payload())?;
        DhcpMessage::parse(udp.payload())
    }

    /// Wrap a BOOTP payload in UDP 67 -> 68, IPv4 and Ethernet.
    ///
    /// The payload is zero-padded so the frame is exactly MTU plus the
    /// Ethernet header. `None` when the payload is already too big for that.
    fn encapsulate(
        &mut self,
        mut packet: Vec<u8>,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
    ) -> Option<Vec<u8>> {
        let target = self
            .mtu
            .saturating_sub(IPV4_HEADER_SIZE + UDP_HEADER_SIZE);
        if packet.len() > target {
            return None;
        }
        packet.resize(target, 0);

        let src_ip = self.config.interface_ip;
        let udp = UdpBuilder::new()
            .src_port(DHCP_SERVER_PORT)
            .dst_port(DHCP_CLIENT_PORT)
            .payload(&packet)
            .build(src_ip, dst_ip);

        self.ip_id = self.ip_id.wrapping_add(1);
        let ip = Ipv4Builder::new()
            .identification(self.ip_id)
            .protocol(crate::protocol::udp::PROTOCOL_NUMBER)
            .src_addr(src_ip)
            .dst_addr(dst_ip)
            .payload(&udp)
            .build();

        Some(
            FrameBuilder::new()
                .dst_mac(dst_mac)
                .src_mac(self.config.interface_mac)
                .ethertype(EtherType::Ipv4 as u16)
                .payload(&ip)
                .build(),
        )
    }
}
