//! DNS stub resolver
//!
//! Answers A queries for a static hosts table and relays everything else to
//! one upstream resolver. It is an ordinary UDP listener: it registers on
//! port 53 for clients and on a random high port for upstream answers.

use super::clock::Clock;
use super::listener::{UdpDatagram, UdpListener, UdpSend};
use super::stack::StackHandle;
use crate::protocol::dns::{set_id, DnsBuilder, DnsClass, DnsHeader, DnsRcode, DnsType, DNS_PORT};
use rand::Rng;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsStubConfig {
    pub upstream: Option<Ipv4Addr>,
    pub upstream_port: u16,
    /// Lowercase names without the trailing dot
    pub hosts: HashMap<String, Ipv4Addr>,
    /// TTL of locally answered records
    pub local_ttl: u32,
    pub query_timeout: Duration,
}

impl Default for DnsStubConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            upstream_port: DNS_PORT,
            hosts: HashMap::new(),
            local_ttl: 300,
            query_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingQuery {
    client: SocketAddrV4,
    original_id: u16,
    expires_at: u64,
}

pub struct DnsStub {
    config: DnsStubConfig,
    /// Source port for upstream queries
    local_port: u16,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<u16, PendingQuery>>,
}

pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl DnsStub {
    pub fn new(config: DnsStubConfig, clock: Arc<dyn Clock>) -> Self {
        let local_port = rand::random::<u16>() | 0xC000;
        Self::with_port(config, clock, local_port)
    }

    pub fn with_port(config: DnsStubConfig, clock: Arc<dyn Clock>, local_port: u16) -> Self {
        debug!(
            "DNS stub: {} local names, upstream {:?}, query port {}",
            config.hosts.len(),
            config.upstream,
            local_port
        );
        Self {
            config,
            local_port,
            clock,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Register on port 53 and on the upstream query port
    pub fn attach(self: &Arc<Self>, stack: &StackHandle) {
        stack.attach_udp(DNS_PORT, self.clone());
        stack.attach_udp(self.local_port, self.clone());
    }

    /// Queries forwarded and not yet answered
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn handle_query(
        &self,
        datagram: &UdpDatagram<'_>,
        pending: &mut HashMap<u16, PendingQuery>,
        now: u64,
    ) -> Option<UdpSend> {
        let header = match DnsHeader::parse(datagram.payload) {
            Ok(h) => h,
            Err(e) => {
                trace!("Dropping DNS query from {}: {}", datagram.src, e);
                return None;
            }
        };
        if header.is_response() {
            trace!("Ignoring DNS response on port {}", DNS_PORT);
            return None;
        }

        let question = match header.questions() {
            Ok(questions) => questions.into_iter().next(),
            Err(e) => {
                debug!("Malformed question from {}: {}", datagram.src, e);
                None
            }
        };
        let Some(question) = question else {
            let reply = DnsBuilder::response_to(&header)
                .rcode(DnsRcode::FormatError)
                .build();
            return Some(UdpSend::reply_to(datagram, reply));
        };

        let name = normalize_name(&question.name);
        if let Some(&addr) = self.config.hosts.get(&name) {
            let class_ok =
                question.qclass == DnsClass::IN as u16 || question.qclass == DnsClass::ANY as u16;
            let mut reply = DnsBuilder::response_to(&header)
                .authoritative(true)
                .add_question(&question.name, question.qtype, question.qclass);
            if class_ok
                && matches!(
                    DnsType::from_u16(question.qtype),
                    Some(DnsType::A) | Some(DnsType::ANY)
                )
            {
                reply = reply.add_a_record(&question.name, addr, self.config.local_ttl);
            }
            debug!("Answered {} (type {}) locally", name, question.qtype);
            return Some(UdpSend::reply_to(datagram, reply.build()));
        }

        let Some(upstream) = self.config.upstream else {
            debug!("No upstream resolver for {}, SERVFAIL", name);
            let reply = DnsBuilder::response_to(&header)
                .rcode(DnsRcode::ServerFailure)
                .add_question(&question.name, question.qtype, question.qclass)
                .build();
            return Some(UdpSend::reply_to(datagram, reply));
        };

        let forwarded_id = Self::fresh_id(pending)?;
        pending.insert(
            forwarded_id,
            PendingQuery {
                client: datagram.src,
                original_id: header.id(),
                expires_at: now + self.config.query_timeout.as_secs().max(1),
            },
        );

        let mut packet = datagram.payload.to_vec();
        set_id(&mut packet, forwarded_id);
        debug!(
            "Forwarding {} to {} (id {} -> {})",
            name,
            upstream,
            header.id(),
            forwarded_id
        );
        Some(UdpSend {
            src_port: self.local_port,
            dst: SocketAddrV4::new(upstream, self.config.upstream_port),
            payload: packet,
        })
    }

    fn handle_upstream(
        &self,
        datagram: &UdpDatagram<'_>,
        pending: &mut HashMap<u16, PendingQuery>,
    ) -> Option<UdpSend> {
        let from_upstream = self
            .config
            .upstream
            .is_some_and(|ip| *datagram.src.ip() == ip && datagram.src.port() == self.config.upstream_port);
        if !from_upstream {
            trace!("Ignoring DNS datagram from {}", datagram.src);
            return None;
        }

        let header = match DnsHeader::parse(datagram.payload) {
            Ok(h) if h.is_response() => h,
            Ok(_) => return None,
            Err(e) => {
                trace!("Dropping upstream DNS response: {}", e);
                return None;
            }
        };

        let Some(query) = pending.remove(&header.id()) else {
            trace!("No pending query for upstream id {}", header.id());
            return None;
        };

        let mut packet = datagram.payload.to_vec();
        set_id(&mut packet, query.original_id);
        debug!("Relaying upstream answer to {}", query.client);
        Some(UdpSend {
            src_port: DNS_PORT,
            dst: query.client,
            payload: packet,
        })
    }

    fn fresh_id(pending: &HashMap<u16, PendingQuery>) -> Option<u16> {
        if pending.len() > u16::MAX as usize {
            warn!("DNS stub: every transaction id is in use");
            return None;
        }
        let mut rng = rand::rng();
        loop {
            let id: u16 = rng.random();
            if !pending.contains_key(&id) {
                return Some(id);
            }
        }
    }
}

impl UdpListener for DnsStub {
    fn on_datagram(&self, datagram: &UdpDatagram<'_>) -> Vec<UdpSend> {
        let now = self.clock.now();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let before = pending.len();
        pending.retain(|_, q| q.expires_at > now);
        if pending.len() < before {
            debug!("Expired {} unanswered DNS queries", before - pending.len());
        }

        let reply = if datagram.dst.port() == self.local_port {
            self.handle_upstream(datagram, &mut pending)
        } else {
            self.handle_query(datagram, &mut pending, now)
        };
        reply.into_iter().collect()
    }
}
