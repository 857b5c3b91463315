//! End-to-end frame scenarios through `NetworkStack::process_frame`

use crate::common::*;
use lanstub::capture::ChannelCapture;
use lanstub::dataplane::{
    is_dhcp_frame, Clock, Dependencies, DhcpConfig, DnsStub, DnsStubConfig, InterfaceInfo,
    Keepalive, LeaseDatabase, LeaseEngine, LeaseOutcome, LeaseState, ManualClock, NetworkStack,
    PoolAllocator, TcpSegment, TcpSend, UdpDatagram, UdpListener, UdpSend,
};
use lanstub::protocol::dhcp::{DhcpMessage, DhcpMessageType, DHCP_CLIENT_PORT};
use lanstub::protocol::dns::{DnsBuilder, DnsClass, DnsHeader, DnsType};
use lanstub::protocol::ethernet::{Frame, HEADER_SIZE};
use lanstub::protocol::icmp::IcmpPacket;
use lanstub::protocol::ipv4::Ipv4Header;
use lanstub::protocol::udp::UdpHeader;
use lanstub::protocol::MacAddr;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

#[test]
fn test_broadcast_discover_gets_offer() {
    let mut fx = make_stack();
    let mac = client_mac(1);
    let frame = discover_frame(0xdead_beef, mac);

    let expected = {
        let eth = Frame::parse(&frame).unwrap();
        let ip = Ipv4Header::parse(eth.payload()).unwrap();
        let msg = DhcpMessage::parse(UdpHeader::parse(ip.payload()).unwrap().payload()).unwrap();
        match PoolAllocator::new().input(
            &make_dhcp_config(),
            &LeaseDatabase::new(),
            &msg,
            fx.clock.now(),
        ) {
            LeaseOutcome::Reply(_, db) => db,
            other => panic!("expected a reply, got {:?}", other),
        }
    };

    let out = fx.stack.process_frame(&frame);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].len(), MTU + HEADER_SIZE);
    assert_eq!(fx.stack.leases(), &expected);
    assert_eq!(fx.stack.metrics().dhcp_frames.get(), 1);
    assert_eq!(fx.stack.metrics().dispatched_frames.get(), 0);

    let eth = Frame::parse(&out[0]).unwrap();
    assert_eq!(eth.dst_mac(), MacAddr::BROADCAST);
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.dst_addr(), Ipv4Addr::BROADCAST);
    assert_eq!(ip.total_length() as usize, MTU);
    assert!(ip.validate_checksum());
    let udp = UdpHeader::parse(ip.payload()).unwrap();
    assert_eq!(udp.dst_port(), DHCP_CLIENT_PORT);
    assert_eq!(udp.length() as usize, MTU - 20);
    assert!(udp.validate_checksum(ip.src_addr(), ip.dst_addr()));

    let offer = DhcpMessage::parse(udp.payload()).unwrap();
    assert_eq!(offer.message_type, DhcpMessageType::Offer);
    assert_eq!(offer.xid, 0xdead_beef);
    let lease = fx.stack.leases().get(&offer.yiaddr).unwrap();
    assert_eq!(lease.client, mac);
    assert_eq!(lease.state, LeaseState::Offered);
}

#[test]
fn test_syn_to_unattached_port_is_dropped() {
    let mut fx = make_stack();

    let out = fx.stack.process_frame(&syn_frame(8080));

    assert!(out.is_empty());
    let metrics = fx.stack.metrics();
    assert_eq!(metrics.dispatched_frames.get(), 1);
    assert_eq!(metrics.dhcp_frames.get(), 0);
    assert_eq!(metrics.dropped_frames.get(), 1);
    assert_eq!(metrics.parse_errors.get(), 0);
    assert_eq!(fx.stack.leases().version(), 0);
}

#[test]
fn test_echo_request_answered_without_listeners() {
    let mut fx = make_stack();

    let out = fx.stack.process_frame(&echo_request_frame(0x77, 3));

    assert_eq!(out.len(), 1);
    let eth = Frame::parse(&out[0]).unwrap();
    assert_eq!(eth.dst_mac(), PEER_MAC);
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.src_addr(), STACK_IP);
    assert_eq!(ip.dst_addr(), PEER_IP);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), 0);
    assert_eq!(icmp.identifier(), 0x77);
    assert_eq!(icmp.sequence(), 3);
    assert!(icmp.validate_checksum());
    assert_eq!(fx.stack.metrics().icmp_echo_replies.get(), 1);
}

#[test]
fn test_sniff_passes_but_parse_fails() {
    let mut fx = make_stack();
    let mut payload = discover_payload(1, client_mac(1));
    // message type option claims more bytes than the packet holds
    payload[241] = 250;
    let frame = dhcp_frame(&payload, client_mac(1), MacAddr::BROADCAST);
    assert!(is_dhcp_frame(&frame, STACK_MAC));

    assert!(fx.stack.process_frame(&frame).is_empty());
    assert_eq!(fx.stack.metrics().parse_errors.get(), 1);
    assert_eq!(fx.stack.metrics().dispatched_frames.get(), 0);
    assert_eq!(fx.stack.leases().version(), 0);

    // the next frame is handled normally
    assert_eq!(fx.stack.process_frame(&discover_frame(2, client_mac(2))).len(), 1);
    assert_eq!(fx.stack.leases().len(), 1);
}

#[test]
fn test_attached_udp_listener_receives_datagram() {
    let mut fx = make_stack();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let handler: Arc<dyn UdpListener> = Arc::new(move |d: &UdpDatagram<'_>| {
        log.lock().unwrap().push((d.src, d.dst, d.payload.to_vec()));
        Vec::new()
    });
    fx.stack.attach_udp(53, handler);

    let out = fx.stack.process_frame(&udp_frame(53, b"query bytes"));

    assert!(out.is_empty());
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[(
            SocketAddrV4::new(PEER_IP, 40000),
            SocketAddrV4::new(STACK_IP, 53),
            b"query bytes".to_vec()
        )]
    );
    assert_eq!(fx.stack.leases().version(), 0);
    assert_eq!(fx.stack.metrics().udp_delivered.get(), 1);
}

#[test]
fn test_reattach_replaces_listener() {
    let mut fx = make_stack();
    let tagged = |tag: u8| -> Arc<dyn UdpListener> {
        Arc::new(move |d: &UdpDatagram<'_>| vec![UdpSend::reply_to(d, vec![tag])])
    };

    fx.stack.attach_udp(9000, tagged(1));
    let first = fx.stack.process_frame(&udp_frame(9000, b"x"));
    fx.stack.attach_udp(9000, tagged(2));
    let second = fx.stack.process_frame(&udp_frame(9000, b"x"));

    let reply_byte = |frame: &[u8]| {
        let eth = Frame::parse(frame).unwrap();
        let ip = Ipv4Header::parse(eth.payload()).unwrap();
        UdpHeader::parse(ip.payload()).unwrap().payload().to_vec()
    };
    assert_eq!(reply_byte(&first[0]), vec![1]);
    assert_eq!(reply_byte(&second[0]), vec![2]);
}

#[test]
fn test_tcp_listener_gets_keepalive_setting() {
    let mut fx = make_stack();
    let keepalive = Keepalive::default();
    let seen = Arc::new(Mutex::new(None));
    let log = seen.clone();
    fx.stack.attach_tcp(
        2222,
        Arc::new(
            move |s: &TcpSegment<'_>, k: Option<&Keepalive>| -> Vec<TcpSend> {
                *log.lock().unwrap() = Some((s.seq, k.copied()));
                Vec::new()
            },
        ),
        Some(keepalive),
    );

    assert!(fx.stack.process_frame(&syn_frame(2222)).is_empty());
    assert_eq!(*seen.lock().unwrap(), Some((42, Some(keepalive))));
    assert_eq!(fx.stack.metrics().tcp_delivered.get(), 1);
}

#[test]
fn test_dns_stub_answers_local_name() {
    let mut fx = make_stack();
    let mut config = DnsStubConfig::default();
    config
        .hosts
        .insert("nas.lan".to_string(), Ipv4Addr::new(192, 168, 50, 20));
    let stub = Arc::new(DnsStub::new(config, fx.clock.clone()));
    stub.attach(&fx.stack.handle());
    assert!(fx.stack.handle().udp_ports().contains(&53));

    let query = DnsBuilder::new()
        .id(0x4242)
        .recursion_desired(true)
        .add_question("nas.lan", DnsType::A as u16, DnsClass::IN as u16)
        .build();
    let out = fx.stack.process_frame(&udp_frame(53, &query));

    assert_eq!(out.len(), 1);
    let eth = Frame::parse(&out[0]).unwrap();
    assert_eq!(eth.dst_mac(), PEER_MAC);
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    let udp = UdpHeader::parse(ip.payload()).unwrap();
    assert_eq!(udp.src_port(), 53);
    assert_eq!(udp.dst_port(), 40000);
    let answer = DnsHeader::parse(udp.payload()).unwrap();
    assert_eq!(answer.id(), 0x4242);
    assert_eq!(
        answer.a_answers().unwrap()[0].1,
        Ipv4Addr::new(192, 168, 50, 20)
    );
}

#[test]
fn test_classification_is_exclusive() {
    let mut fx = make_stack();
    let frames = [
        discover_frame(1, client_mac(1)),
        syn_frame(80),
        echo_request_frame(1, 1),
        udp_frame(67, b"not bootp"),
        dhcp_frame(
            &discover_payload(2, client_mac(2)),
            client_mac(2),
            MacAddr([0x02, 0x99, 0, 0, 0, 0x01]),
        ),
    ];
    for frame in &frames {
        fx.stack.process_frame(frame);
    }

    let metrics = fx.stack.metrics();
    assert_eq!(metrics.dhcp_frames.get(), 1);
    assert_eq!(metrics.dispatched_frames.get(), 4);
    assert_eq!(
        metrics.dhcp_frames.get() + metrics.dispatched_frames.get(),
        metrics.rx_frames.get()
    );
}

#[test]
fn test_small_mtu_reply_sizing() {
    let make = |config: DhcpConfig| {
        let (capture, _peer) = ChannelCapture::pair();
        let deps = Dependencies {
            clock: Arc::new(ManualClock::new(1_000)),
            lease_engine: Arc::new(PoolAllocator::new()),
        };
        let iface = InterfaceInfo {
            mtu: 576,
            ..make_iface()
        };
        NetworkStack::new(capture, iface, config, deps)
    };
    let discover = discover_frame(0x0576, client_mac(9));

    let mut stack = make(make_dhcp_config());
    let out = stack.process_frame(&discover);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].len(), 576 + HEADER_SIZE);

    let mut crowded = make_dhcp_config();
    crowded.dns_servers = (1..=20).map(|n| Ipv4Addr::new(10, 0, 0, n)).collect();
    crowded.domain_name = Some("d".repeat(200));
    let mut stack = make(crowded);
    assert!(stack.process_frame(&discover).is_empty());
    assert!(stack.leases().is_empty());
    assert_eq!(stack.metrics().tx_errors.get(), 1);
}
