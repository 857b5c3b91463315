//! Lease state and the lease-engine contract
//!
//! The stack keeps exactly one [`LeaseDatabase`] and swaps it for whatever
//! the engine hands back; the engine never mutates the stack's copy.

use crate::protocol::dhcp::{DhcpMessage, DhcpMessageType};
use crate::protocol::MacAddr;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const DEFAULT_LEASE_TIME: u32 = 86_400;
pub const DEFAULT_OFFER_TIMEOUT: u32 = 60;

/// Static DHCP parameters, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfig {
    pub interface_ip: Ipv4Addr,
    pub interface_mac: MacAddr,
    pub prefix_len: u8,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    /// Seconds
    pub lease_time: u32,
    /// Seconds an OFFER holds its address
    pub offer_timeout: u32,
}

impl DhcpConfig {
    /// Defaults for an interface: the .100 - .254 pool of its /24, the
    /// interface itself as DNS server, no routers
    pub fn for_interface(interface_ip: Ipv4Addr, interface_mac: MacAddr, prefix_len: u8) -> Self {
        let (range_start, range_end) = default_range(interface_ip);
        Self {
            interface_ip,
            interface_mac,
            prefix_len,
            range_start,
            range_end,
            routers: Vec::new(),
            dns_servers: vec![interface_ip],
            domain_name: None,
            lease_time: DEFAULT_LEASE_TIME,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
        }
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        prefix_mask(self.prefix_len)
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.interface_ip) & u32::from(self.subnet_mask()))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !u32::from(self.subnet_mask()))
    }

    pub fn in_subnet(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & u32::from(self.subnet_mask()) == u32::from(self.network())
    }

    /// Option bytes of the largest reply (OFFER/ACK), END included
    pub fn reply_options_len(&self) -> usize {
        // message type, server id, mask, broadcast, lease time, T1, T2: 3 + 6 * 6
        let fixed = 3 + 6 * 6 + 1;
        let list = |addrs: &[Ipv4Addr]| match addrs.len() {
            0 => 0,
            n => 2 + (4 * n).min(255),
        };
        let domain = self
            .domain_name
            .as_ref()
            .map_or(0, |d| 2 + d.len().min(255));
        fixed + list(&self.routers) + list(&self.dns_servers) + domain
    }

    pub fn in_range(&self, ip: Ipv4Addr) -> bool {
        ip >= self.range_start && ip <= self.range_end
    }

    /// In range and not one of the addresses the pool must never hand out
    pub fn is_assignable(&self, ip: Ipv4Addr) -> bool {
        self.in_range(ip)
            && ip != self.interface_ip
            && ip != self.network()
            && ip != self.broadcast()
            && !self.routers.contains(&ip)
    }
}

/// Default pool assuming a /24 around `ip`
pub fn default_range(ip: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    let [a, b, c, _] = ip.octets();
    (Ipv4Addr::new(a, b, c, 100), Ipv4Addr::new(a, b, c, 254))
}

pub fn prefix_mask(prefix_len: u8) -> Ipv4Addr {
    match prefix_len {
        0 => Ipv4Addr::UNSPECIFIED,
        n if n >= 32 => Ipv4Addr::BROADCAST,
        n => Ipv4Addr::from(u32::MAX << (32 - n as u32)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// OFFER sent, waiting for REQUEST
    Offered,
    Bound,
    /// Client reported a conflict; held out of the pool until expiry
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub client: MacAddr,
    pub hostname: Option<String>,
    pub state: LeaseState,
    /// Clock seconds
    pub expires_at: u64,
}

impl Lease {
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Address to lease map plus a version bumped on every mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseDatabase {
    leases: BTreeMap<Ipv4Addr, Lease>,
    version: u64,
}

impl LeaseDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, ip: &Ipv4Addr) -> Option<&Lease> {
        self.leases.get(ip)
    }

    /// The client's Offered or Bound lease
    pub fn find_by_mac(&self, mac: MacAddr) -> Option<&Lease> {
        self.leases
            .values()
            .find(|l| l.client == mac && l.state != LeaseState::Declined)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn insert(&mut self, lease: Lease) {
        self.leases.insert(lease.ip, lease);
        self.version += 1;
    }

    pub fn remove(&mut self, ip: &Ipv4Addr) -> Option<Lease> {
        let removed = self.leases.remove(ip);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    /// Drop leases whose expiry has passed; returns how many went
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, l| l.is_live(now));
        let pruned = before - self.leases.len();
        if pruned > 0 {
            self.version += 1;
        }
        pruned
    }
}

/// Encoded DHCP reply and where it must go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpReply {
    /// BOOTP payload, without UDP/IP/Ethernet headers
    pub packet: Vec<u8>,
    pub message_type: DhcpMessageType,
    pub dst_ip: Ipv4Addr,
    pub dst_mac: MacAddr,
}

/// Result of feeding one message to the lease engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Silence,
    Update(LeaseDatabase),
    Warning(String),
    Error(String),
    Reply(DhcpReply, LeaseDatabase),
}

impl LeaseOutcome {
    /// Database that should replace the current one, if any
    pub fn next_database(&self) -> Option<&LeaseDatabase> {
        match self {
            LeaseOutcome::Update(db) | LeaseOutcome::Reply(_, db) => Some(db),
            LeaseOutcome::Silence | LeaseOutcome::Warning(_) | LeaseOutcome::Error(_) => None,
        }
    }
}

/// One atomic transition per received message
pub trait LeaseEngine: Send + Sync {
    fn input(
        &self,
        config: &DhcpConfig,
        db: &LeaseDatabase,
        msg: &DhcpMessage,
        now: u64,
    ) -> LeaseOutcome;
}
