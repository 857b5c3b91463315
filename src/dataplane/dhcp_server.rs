//! DHCPv4 address pool (RFC 2131 server side)
//!
//! [`PoolAllocator`] is the default [`LeaseEngine`]. It is a pure function
//! of its inputs: every call clones the database it is given and returns
//! the modified copy, so folding it over a message sequence is
//! deterministic.

use super::lease::{
    DhcpConfig, DhcpReply, Lease, LeaseDatabase, LeaseEngine, LeaseOutcome, LeaseState,
};
use crate::protocol::dhcp::{BootpOp, DhcpBuilder, DhcpMessage, DhcpMessageType};
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolAllocator;

impl PoolAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl LeaseEngine for PoolAllocator {
    fn input(
        &self,
        config: &DhcpConfig,
        db: &LeaseDatabase,
        msg: &DhcpMessage,
        now: u64,
    ) -> LeaseOutcome {
        if msg.op != BootpOp::Request {
            return LeaseOutcome::Silence;
        }
        if msg.htype != 1 || msg.hlen != 6 {
            return LeaseOutcome::Error(format!(
                "unsupported hardware type {} / length {} from xid {:#010x}",
                msg.htype, msg.hlen, msg.xid
            ));
        }

        debug!(
            "DHCP {:?} from {} xid={:#010x}",
            msg.message_type,
            msg.client_mac(),
            msg.xid
        );

        match msg.message_type {
            DhcpMessageType::Discover => handle_discover(config, db, msg, now),
            DhcpMessageType::Request => handle_request(config, db, msg, now),
            DhcpMessageType::Decline => handle_decline(config, db, msg, now),
            DhcpMessageType::Release => handle_release(db, msg),
            DhcpMessageType::Inform => handle_inform(config, db, msg),
            DhcpMessageType::Offer | DhcpMessageType::Ack | DhcpMessageType::Nak => {
                LeaseOutcome::Error(format!(
                    "server message {:?} received from client {}",
                    msg.message_type,
                    msg.client_mac()
                ))
            }
        }
    }
}

/// Pick an address for `mac`: its current lease, then the requested
/// address, then the lowest free one. `db` must already be pruned.
fn choose_address(
    config: &DhcpConfig,
    db: &LeaseDatabase,
    mac: MacAddr,
    requested: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    if let Some(lease) = db.find_by_mac(mac) {
        return Some(lease.ip);
    }

    let free = |ip: Ipv4Addr| config.is_assignable(ip) && db.get(&ip).is_none();
    if let Some(ip) = requested.filter(|ip| free(*ip)) {
        return Some(ip);
    }

    (u32::from(config.range_start)..=u32::from(config.range_end))
        .map(Ipv4Addr::from)
        .find(|ip| free(*ip))
}

fn handle_discover(
    config: &DhcpConfig,
    db: &LeaseDatabase,
    msg: &DhcpMessage,
    now: u64,
) -> LeaseOutcome {
    let mac = msg.client_mac();
    let mut next = db.clone();
    next.prune_expired(now);

    let ip = match choose_address(config, &next, mac, msg.requested_ip) {
        Some(ip) => ip,
        None => {
            return LeaseOutcome::Warning(format!(
                "address pool {}-{} exhausted, no offer for {}",
                config.range_start, config.range_end, mac
            ))
        }
    };

    // A bound client that rediscovers keeps its binding
    let already_bound = next
        .get(&ip)
        .is_some_and(|l| l.client == mac && l.state == LeaseState::Bound);
    if !already_bound {
        next.insert(Lease {
            ip,
            client: mac,
            hostname: msg.hostname.clone(),
            state: LeaseState::Offered,
            expires_at: now + u64::from(config.offer_timeout),
        });
    }

    debug!("offering {} to {}", ip, mac);
    let packet = with_options(DhcpBuilder::reply(msg), config)
        .message_type(DhcpMessageType::Offer)
        .yiaddr(ip)
        .siaddr(config.interface_ip)
        .server_id(config.interface_ip)
        .lease_time(config.lease_time)
        .renewal_time(config.lease_time / 2)
        .rebinding_time(config.lease_time / 8 * 7)
        .build();

    LeaseOutcome::Reply(reply(msg, packet, DhcpMessageType::Offer), next)
}

fn handle_request(
    config: &DhcpConfig,
    db: &LeaseDatabase,
    msg: &DhcpMessage,
    now: u64,
) -> LeaseOutcome {
    let mac = msg.client_mac();

    if let Some(server) = msg.server_id.filter(|s| *s != config.interface_ip) {
        // Client picked another server's offer; withdraw ours
        return match db.find_by_mac(mac).filter(|l| l.state == LeaseState::Offered) {
            Some(offer) => {
                debug!("{} chose server {}, releasing offer {}", mac, server, offer.ip);
                let mut next = db.clone();
                next.remove(&offer.ip);
                LeaseOutcome::Update(next)
            }
            None => LeaseOutcome::Silence,
        };
    }

    let requested = msg
        .requested_ip
        .or_else(|| Some(msg.ciaddr).filter(|ip| !ip.is_unspecified()));
    let requested = match requested {
        Some(ip) => ip,
        None => return nak(config, db, msg, "REQUEST without an address"),
    };

    let mut next = db.clone();
    next.prune_expired(now);

    match next.get(&requested).cloned() {
        Some(lease) if lease.client == mac && lease.state != LeaseState::Declined => {
            let hostname = msg.hostname.clone().or(lease.hostname);
            next.insert(Lease {
                ip: requested,
                client: mac,
                hostname,
                state: LeaseState::Bound,
                expires_at: now + u64::from(config.lease_time),
            });
        }
        None if msg.server_id.is_none() && !config.in_subnet(requested) => {
            return nak(config, db, msg, "requested address is on another network")
        }
        // INIT-REBOOT or renewal from a client we have no record of
        None if msg.server_id.is_none() => return LeaseOutcome::Silence,
        _ => return nak(config, db, msg, "requested address not leased to client"),
    }

    debug!("acknowledging {} for {}", requested, mac);
    let packet = with_options(DhcpBuilder::reply(msg), config)
        .message_type(DhcpMessageType::Ack)
        .yiaddr(requested)
        .siaddr(config.interface_ip)
        .server_id(config.interface_ip)
        .lease_time(config.lease_time)
        .renewal_time(config.lease_time / 2)
        .rebinding_time(config.lease_time / 8 * 7)
        .build();

    LeaseOutcome::Reply(reply(msg, packet, DhcpMessageType::Ack), next)
}

fn handle_decline(
    config: &DhcpConfig,
    db: &LeaseDatabase,
    msg: &DhcpMessage,
    now: u64,
) -> LeaseOutcome {
    let mac = msg.client_mac();
    let ip = match msg.requested_ip {
        Some(ip) => ip,
        None => return LeaseOutcome::Silence,
    };

    match db.get(&ip) {
        Some(lease) if lease.client == mac => {
            let mut next = db.clone();
            next.insert(Lease {
                ip,
                client: mac,
                hostname: None,
                state: LeaseState::Declined,
                expires_at: now + u64::from(config.lease_time),
            });
            LeaseOutcome::Update(next)
        }
        _ => LeaseOutcome::Silence,
    }
}

fn handle_release(db: &LeaseDatabase, msg: &DhcpMessage) -> LeaseOutcome {
    let mac = msg.client_mac();
    match db.get(&msg.ciaddr) {
        Some(lease) if lease.client == mac && lease.state != LeaseState::Declined => {
            let mut next = db.clone();
            next.remove(&msg.ciaddr);
            LeaseOutcome::Update(next)
        }
        _ => LeaseOutcome::Silence,
    }
}

/// Configuration only: no yiaddr and no lease time
fn handle_inform(config: &DhcpConfig, db: &LeaseDatabase, msg: &DhcpMessage) -> LeaseOutcome {
    let packet = with_options(DhcpBuilder::reply(msg), config)
        .message_type(DhcpMessageType::Ack)
        .siaddr(config.interface_ip)
        .server_id(config.interface_ip)
        .build();

    LeaseOutcome::Reply(reply(msg, packet, DhcpMessageType::Ack), db.clone())
}

fn nak(config: &DhcpConfig, db: &LeaseDatabase, msg: &DhcpMessage, reason: &str) -> LeaseOutcome {
    debug!("NAK to {}: {}", msg.client_mac(), reason);
    let packet = DhcpBuilder::reply(msg)
        .message_type(DhcpMessageType::Nak)
        .server_id(config.interface_ip)
        .build();

    LeaseOutcome::Reply(reply(msg, packet, DhcpMessageType::Nak), db.clone())
}

fn with_options(builder: DhcpBuilder, config: &DhcpConfig) -> DhcpBuilder {
    let builder = builder
        .subnet_mask(config.subnet_mask())
        .router(&config.routers)
        .dns(&config.dns_servers)
        .broadcast_addr(config.broadcast());
    match &config.domain_name {
        Some(domain) => builder.domain_name(domain),
        None => builder,
    }
}

/// NAK is always broadcast; other replies are broadcast unless the client
/// already has an address and did not ask for broadcast
fn reply(msg: &DhcpMessage, packet: Vec<u8>, message_type: DhcpMessageType) -> DhcpReply {
    let broadcast = message_type == DhcpMessageType::Nak
        || msg.is_broadcast()
        || msg.ciaddr.is_unspecified();

    let (dst_ip, dst_mac) = if broadcast {
        (Ipv4Addr::BROADCAST, MacAddr::BROADCAST)
    } else {
        (msg.ciaddr, msg.client_mac())
    };

    DhcpReply {
        packet,
        message_type,
        dst_ip,
        dst_mac,
    }
}
