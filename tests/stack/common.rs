//! Frame builders and stack fixtures shared by the stack tests

use lanstub::capture::{ChannelCapture, ChannelPeer};
use lanstub::dataplane::{
    Clock, DhcpConfig, Dependencies, InterfaceInfo, ManualClock, NetworkStack, PoolAllocator,
};
use lanstub::protocol::dhcp::{
    DhcpBuilder, DhcpMessageType, BROADCAST_FLAG, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use lanstub::protocol::ethernet::FrameBuilder;
use lanstub::protocol::icmp::build_echo_request;
use lanstub::protocol::ipv4::Ipv4Builder;
use lanstub::protocol::tcp::{TcpBuilder, TcpFlags};
use lanstub::protocol::udp::UdpBuilder;
use lanstub::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const STACK_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const STACK_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 1);
pub const PEER_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 2);
pub const MTU: usize = 1500;

pub fn client_mac(n: u8) -> MacAddr {
    MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, n])
}

pub fn make_iface() -> InterfaceInfo {
    InterfaceInfo {
        mac: STACK_MAC,
        ip: STACK_IP,
        prefix_len: 24,
        gateway: None,
        mtu: MTU,
    }
}

pub fn make_dhcp_config() -> DhcpConfig {
    DhcpConfig::for_interface(STACK_IP, STACK_MAC, 24)
}

pub struct Fixture {
    pub stack: NetworkStack<ChannelCapture>,
    pub peer: ChannelPeer,
    pub clock: Arc<ManualClock>,
}

pub fn make_stack() -> Fixture {
    let (capture, peer) = ChannelCapture::pair();
    let clock = Arc::new(ManualClock::new(1_000));
    let shared: Arc<dyn Clock> = clock.clone();
    let deps = Dependencies {
        clock: shared,
        lease_engine: Arc::new(PoolAllocator::new()),
    };
    let stack = NetworkStack::new(capture, make_iface(), make_dhcp_config(), deps);
    Fixture { stack, peer, clock }
}

fn ethernet(dst: MacAddr, src: MacAddr, ip_packet: &[u8]) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(src)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(ip_packet)
        .build()
}

/// Client-to-server DHCP frame, sent from 0.0.0.0 to the limited broadcast
pub fn dhcp_frame(payload: &[u8], src_mac: MacAddr, dst_mac: MacAddr) -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(DHCP_CLIENT_PORT)
        .dst_port(DHCP_SERVER_PORT)
        .payload(payload)
        .build(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
    let ip = Ipv4Builder::new()
        .protocol(17)
        .src_addr(Ipv4Addr::UNSPECIFIED)
        .dst_addr(Ipv4Addr::BROADCAST)
        .payload(&udp)
        .build();
    ethernet(dst_mac, src_mac, &ip)
}

pub fn discover_payload(xid: u32, mac: MacAddr) -> Vec<u8> {
    DhcpBuilder::request(xid, mac)
        .message_type(DhcpMessageType::Discover)
        .flags(BROADCAST_FLAG)
        .build()
}

pub fn request_payload(xid: u32, mac: MacAddr, requested: Ipv4Addr) -> Vec<u8> {
    DhcpBuilder::request(xid, mac)
        .message_type(DhcpMessageType::Request)
        .flags(BROADCAST_FLAG)
        .requested_ip(requested)
        .server_id(STACK_IP)
        .build()
}

pub fn release_payload(xid: u32, mac: MacAddr, addr: Ipv4Addr) -> Vec<u8> {
    DhcpBuilder::request(xid, mac)
        .message_type(DhcpMessageType::Release)
        .ciaddr(addr)
        .server_id(STACK_IP)
        .build()
}

pub fn decline_payload(xid: u32, mac: MacAddr, addr: Ipv4Addr) -> Vec<u8> {
    DhcpBuilder::request(xid, mac)
        .message_type(DhcpMessageType::Decline)
        .requested_ip(addr)
        .server_id(STACK_IP)
        .build()
}

pub fn discover_frame(xid: u32, mac: MacAddr) -> Vec<u8> {
    dhcp_frame(&discover_payload(xid, mac), mac, MacAddr::BROADCAST)
}

pub fn udp_frame(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(40000)
        .dst_port(dst_port)
        .payload(payload)
        .build(PEER_IP, STACK_IP);
    let ip = Ipv4Builder::new()
        .protocol(17)
        .src_addr(PEER_IP)
        .dst_addr(STACK_IP)
        .payload(&udp)
        .build();
    ethernet(STACK_MAC, PEER_MAC, &ip)
}

pub fn syn_frame(dst_port: u16) -> Vec<u8> {
    let tcp = TcpBuilder::new()
        .src_port(51000)
        .dst_port(dst_port)
        .seq_num(42)
        .flags(TcpFlags::SYN)
        .window(64240)
        .build(PEER_IP, STACK_IP);
    let ip = Ipv4Builder::new()
        .protocol(6)
        .src_addr(PEER_IP)
        .dst_addr(STACK_IP)
        .payload(&tcp)
        .build();
    ethernet(STACK_MAC, PEER_MAC, &ip)
}

pub fn echo_request_frame(id: u16, seq: u16) -> Vec<u8> {
    let icmp = build_echo_request(id, seq, b"lanstub");
    let ip = Ipv4Builder::new()
        .protocol(1)
        .src_addr(PEER_IP)
        .dst_addr(STACK_IP)
        .payload(&icmp)
        .build();
    ethernet(STACK_MAC, PEER_MAC, &ip)
}
