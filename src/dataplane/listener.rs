//! Port-keyed listener tables
//!
//! One [`ListenerRegistry`] per transport. Handlers are stored behind `Arc`
//! so a lookup hands out a clone and releases the lock before the handler
//! runs; an attach racing with dispatch is seen either entirely or not at
//! all.

use crate::protocol::tcp::TcpFlags;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Port to handler map; last attach for a port wins
pub struct ListenerRegistry<H: ?Sized> {
    entries: RwLock<HashMap<u16, Arc<H>>>,
}

impl<H: ?Sized> ListenerRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Install or replace the handler for `port`.
    ///
    /// Returns the handler it replaced, if any.
    pub fn attach(&self, port: u16, handler: Arc<H>) -> Option<Arc<H>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port, handler)
    }

    /// Current handler for `port`; `None` just means nobody listens there
    pub fn lookup(&self, port: u16) -> Option<Arc<H>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&port)
            .cloned()
    }

    /// Attached ports, ascending
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ports.sort_unstable();
        ports
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: ?Sized> Default for ListenerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> std::fmt::Debug for ListenerRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("ports", &self.ports())
            .finish()
    }
}

/// A received UDP datagram, borrowed from the frame
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: &'a [u8],
}

/// A datagram a listener wants sent from the interface address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpSend {
    pub src_port: u16,
    pub dst: SocketAddrV4,
    pub payload: Vec<u8>,
}

impl UdpSend {
    /// Reply to `datagram` from the port it arrived on
    pub fn reply_to(datagram: &UdpDatagram<'_>, payload: Vec<u8>) -> Self {
        Self {
            src_port: datagram.dst.port(),
            dst: datagram.src,
            payload,
        }
    }
}

pub trait UdpListener: Send + Sync {
    fn on_datagram(&self, datagram: &UdpDatagram<'_>) -> Vec<UdpSend>;
}

impl<F> UdpListener for F
where
    F: Fn(&UdpDatagram<'_>) -> Vec<UdpSend> + Send + Sync,
{
    fn on_datagram(&self, datagram: &UdpDatagram<'_>) -> Vec<UdpSend> {
        self(datagram)
    }
}

/// A received TCP segment, borrowed from the frame
#[derive(Debug, Clone, Copy)]
pub struct TcpSegment<'a> {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub payload: &'a [u8],
}

/// A segment a listener wants sent from the interface address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSend {
    pub src_port: u16,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub payload: Vec<u8>,
}

/// TCP keepalive parameters carried alongside a TCP listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Idle time before the first probe
    pub after: Duration,
    pub interval: Duration,
    pub probes: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            after: Duration::from_secs(7200),
            interval: Duration::from_secs(75),
            probes: 9,
        }
    }
}

pub trait TcpListener: Send + Sync {
    fn on_segment(&self, segment: &TcpSegment<'_>, keepalive: Option<&Keepalive>) -> Vec<TcpSend>;
}

impl<F> TcpListener for F
where
    F: Fn(&TcpSegment<'_>, Option<&Keepalive>) -> Vec<TcpSend> + Send + Sync,
{
    fn on_segment(&self, segment: &TcpSegment<'_>, keepalive: Option<&Keepalive>) -> Vec<TcpSend> {
        self(segment, keepalive)
    }
}

/// What the TCP registry stores per port
pub struct TcpBinding {
    pub listener: Arc<dyn TcpListener>,
    pub keepalive: Option<Keepalive>,
}

pub type UdpRegistry = ListenerRegistry<dyn UdpListener>;
pub type TcpRegistry = ListenerRegistry<TcpBinding>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    fn make_listener(tag: u8) -> Arc<dyn UdpListener> {
        Arc::new(move |d: &UdpDatagram<'_>| vec![UdpSend::reply_to(d, vec![tag])])
    }

    fn make_datagram() -> UdpDatagram<'static> {
        UdpDatagram {
            src: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 40000),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 53),
            payload: b"q",
        }
    }

    fn tag_of(registry: &UdpRegistry, port: u16) -> Option<u8> {
        registry
            .lookup(port)
            .map(|h| h.on_datagram(&make_datagram())[0].payload[0])
    }

    #[test]
    fn test_lookup_absent() {
        let registry = UdpRegistry::new();
        assert!(registry.lookup(53).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_attach_wins() {
        let registry = UdpRegistry::new();
        assert!(registry.attach(53, make_listener(1)).is_none());
        assert_eq!(tag_of(&registry, 53), Some(1));

        assert!(registry.attach(53, make_listener(2)).is_some());
        assert_eq!(tag_of(&registry, 53), Some(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ports_sorted() {
        let registry = UdpRegistry::new();
        registry.attach(5353, make_listener(0));
        registry.attach(53, make_listener(0));
        assert_eq!(registry.ports(), vec![53, 5353]);
    }

    #[test]
    fn test_reply_to_swaps_endpoints() {
        let datagram = make_datagram();
        let send = UdpSend::reply_to(&datagram, vec![]);
        assert_eq!(send.src_port, 53);
        assert_eq!(send.dst, datagram.src);
    }

    #[test]
    fn test_tcp_binding_keeps_keepalive() {
        let registry = TcpRegistry::new();
        let listener: Arc<dyn TcpListener> =
            Arc::new(|_: &TcpSegment<'_>, _: Option<&Keepalive>| Vec::new());
        registry.attach(
            22,
            Arc::new(TcpBinding {
                listener,
                keepalive: Some(Keepalive::default()),
            }),
        );

        let binding = registry.lookup(22).unwrap();
        assert_eq!(binding.keepalive.unwrap().probes, 9);
    }

    #[test]
    fn test_concurrent_attach_sees_whole_handler() {
        let registry = Arc::new(UdpRegistry::new());
        registry.attach(53, make_listener(1));

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..200u32 {
                    registry.attach(53, make_listener(if i % 2 == 0 { 2 } else { 1 }));
                }
            })
        };

        for _ in 0..200 {
            let tag = tag_of(&registry, 53);
            assert!(tag == Some(1) || tag == Some(2));
        }
        writer.join().unwrap();
    }
}
