//! Data plane components
//!
//! Frame classification, the DHCP lease path, the generic dispatcher and
//! the services that attach to it.

mod arp_processor;
mod arp_table;
mod clock;
mod dhcp_interceptor;
mod dhcp_server;
mod dispatcher;
mod dns_stub;
mod egress;
mod lease;
mod listener;
mod stack;

pub use arp_processor::{process_arp, ArpAction, ArpPendingQueue};
pub use arp_table::{ArpState, ArpTable, INCOMPLETE_TIMEOUT_SECS};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use dhcp_interceptor::{is_dhcp_frame, DhcpInterceptor};
pub use dhcp_server::PoolAllocator;
pub use dispatcher::Dispatcher;
pub use dns_stub::{normalize_name, DnsStub, DnsStubConfig};
pub use egress::{Egress, InterfaceInfo};
pub use lease::{
    default_range, prefix_mask, DhcpConfig, DhcpReply, Lease, LeaseDatabase, LeaseEngine,
    LeaseOutcome, LeaseState, DEFAULT_LEASE_TIME, DEFAULT_OFFER_TIMEOUT,
};
pub use listener::{
    Keepalive, ListenerRegistry, TcpBinding, TcpListener, TcpRegistry, TcpSegment, TcpSend,
    UdpDatagram, UdpListener, UdpRegistry, UdpSend,
};
pub use stack::{
    Dependencies, Ipv4Sender, NetworkStack, Outbound, StackHandle, TcpSender, UdpSender,
};
