//! Lease state after a frame sequence equals the engine folded over the
//! parsed messages

use crate::common::*;
use lanstub::dataplane::{Clock, LeaseDatabase, LeaseEngine, LeaseOutcome, LeaseState, PoolAllocator};
use lanstub::protocol::dhcp::{DhcpMessage, DhcpMessageType};
use lanstub::protocol::ethernet::{Frame, HEADER_SIZE};
use lanstub::protocol::ipv4::Ipv4Header;
use lanstub::protocol::udp::UdpHeader;
use lanstub::protocol::MacAddr;
use std::net::Ipv4Addr;

fn dhcp_payload(frame: &[u8]) -> Vec<u8> {
    let eth = Frame::parse(frame).unwrap();
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    UdpHeader::parse(ip.payload()).unwrap().payload().to_vec()
}

/// Drives the stack and a reference fold side by side
struct Harness {
    fx: Fixture,
    reference: LeaseDatabase,
    engine: PoolAllocator,
}

impl Harness {
    fn new() -> Self {
        Self {
            fx: make_stack(),
            reference: LeaseDatabase::new(),
            engine: PoolAllocator::new(),
        }
    }

    /// Feed one client frame; returns the reply message if one was sent
    fn step(&mut self, frame: Vec<u8>) -> Option<DhcpMessage> {
        let msg = DhcpMessage::parse(&dhcp_payload(&frame)).unwrap();
        let now = self.fx.clock.now();
        let outcome = self
            .engine
            .input(&make_dhcp_config(), &self.reference, &msg, now);
        let expect_reply = matches!(outcome, LeaseOutcome::Reply(..));
        if let Some(db) = outcome.next_database() {
            self.reference = db.clone();
        }

        let out = self.fx.stack.process_frame(&frame);

        assert_eq!(self.fx.stack.leases(), &self.reference);
        if expect_reply {
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].len(), MTU + HEADER_SIZE);
            Some(DhcpMessage::parse(&dhcp_payload(&out[0])).unwrap())
        } else {
            assert!(out.is_empty());
            None
        }
    }

    fn discover(&mut self, xid: u32, mac: MacAddr) -> Option<DhcpMessage> {
        self.step(discover_frame(xid, mac))
    }

    fn request(&mut self, xid: u32, mac: MacAddr, addr: Ipv4Addr) -> Option<DhcpMessage> {
        self.step(dhcp_frame(
            &request_payload(xid, mac, addr),
            mac,
            MacAddr::BROADCAST,
        ))
    }

    fn advance(&mut self, secs: u64) {
        self.fx.clock.advance(secs);
    }
}

#[test]
fn test_fold_over_mixed_sequence() {
    let mut h = Harness::new();
    let mut bound = Vec::new();

    for n in 1..=4u8 {
        let mac = client_mac(n);
        let xid = 0x1000 + n as u32;
        let offer = h.discover(xid, mac).expect("offer");
        h.advance(1);
        let ack = h.request(xid, mac, offer.yiaddr).expect("ack");
        assert_eq!(ack.yiaddr, offer.yiaddr);
        bound.push((mac, ack.yiaddr));
    }
    assert_eq!(h.fx.stack.leases().len(), 4);

    // rediscover keeps the bound address
    let again = h.discover(0x2001, bound[0].0).expect("offer");
    assert_eq!(again.yiaddr, bound[0].1);

    let (mac, addr) = bound[1];
    h.step(dhcp_frame(&release_payload(0x3001, mac, addr), mac, STACK_MAC));
    assert!(h.fx.stack.leases().get(&addr).is_none());

    let (mac, addr) = bound[2];
    h.step(dhcp_frame(
        &decline_payload(0x4001, mac, addr),
        mac,
        MacAddr::BROADCAST,
    ));
    assert_eq!(
        h.fx.stack.leases().get(&addr).map(|l| l.state),
        Some(LeaseState::Declined)
    );

    // request for an address we never offered
    h.request(0x5001, client_mac(9), Ipv4Addr::new(192, 168, 50, 240));

    h.advance(120);
    for n in 10..=12u8 {
        h.discover(0x6000 + n as u32, client_mac(n));
    }

    let metrics = h.fx.stack.metrics();
    assert_eq!(metrics.parse_errors.get(), 0);
    assert_eq!(metrics.dispatched_frames.get(), 0);
}

#[test]
fn test_fold_after_offer_timeout() {
    let mut h = Harness::new();
    let first = h.discover(1, client_mac(1)).expect("offer");

    // the unclaimed offer lapses and its address can be handed out again
    h.advance(make_dhcp_config().offer_timeout as u64 + 1);
    let second = h.discover(2, client_mac(2)).expect("offer");
    assert_eq!(first.yiaddr, second.yiaddr);

    let nak = h.request(1, client_mac(1), first.yiaddr).expect("nak");
    assert_eq!(nak.message_type, DhcpMessageType::Nak);
    assert_eq!(
        h.fx.stack.leases().get(&first.yiaddr).map(|l| l.client),
        Some(client_mac(2))
    );
}
