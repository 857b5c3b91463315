//! The async receive loop against in-memory and failing captures

use crate::common::*;
use lanstub::capture::{Capture, ChannelCapture, RxInfo};
use lanstub::dataplane::{Dependencies, ManualClock, NetworkStack, PoolAllocator};
use lanstub::protocol::ethernet::{Frame, HEADER_SIZE};
use lanstub::protocol::ipv4::Ipv4Header;
use lanstub::protocol::udp::UdpHeader;
use lanstub::protocol::MacAddr;
use lanstub::{Error, Result};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn make_deps() -> Dependencies {
    Dependencies {
        clock: Arc::new(ManualClock::new(1_000)),
        lease_engine: Arc::new(PoolAllocator::new()),
    }
}

#[tokio::test]
async fn test_run_serves_until_interface_closes() {
    let Fixture {
        mut stack,
        mut peer,
        ..
    } = make_stack();
    let handle = stack.handle();
    let task = tokio::spawn(async move {
        let result = stack.run().await;
        (result, stack)
    });

    peer.inject(discover_frame(7, client_mac(1))).unwrap();
    let offer = timeout(WAIT, peer.next_frame()).await.unwrap().unwrap();
    assert_eq!(offer.len(), MTU + HEADER_SIZE);

    handle
        .udp()
        .send_to(
            5000,
            SocketAddrV4::new(Ipv4Addr::BROADCAST, 6000),
            b"hello".to_vec(),
        )
        .unwrap();
    let sent = timeout(WAIT, peer.next_frame()).await.unwrap().unwrap();
    let eth = Frame::parse(&sent).unwrap();
    assert_eq!(eth.dst_mac(), MacAddr::BROADCAST);
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    let udp = UdpHeader::parse(ip.payload()).unwrap();
    assert_eq!(udp.src_port(), 5000);
    assert_eq!(udp.dst_port(), 6000);
    assert_eq!(udp.payload(), b"hello");

    drop(peer);
    let (result, stack) = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(stack.leases().len(), 1);
    assert_eq!(stack.metrics().tx_frames.get(), 2);
}

/// Capture whose receive side always fails
struct BrokenRx;

impl Capture for BrokenRx {
    async fn recv(&mut self, _buf: &mut [u8]) -> Result<RxInfo> {
        Err(Error::Io(io::Error::other("device vanished")))
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(buf.len())
    }
}

/// Capture that receives from a channel but cannot transmit
struct BrokenTx {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Capture for BrokenTx {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        let frame = self.rx.recv().await.ok_or(Error::InterfaceClosed)?;
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(RxInfo { len: frame.len() })
    }

    async fn send(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Io(io::Error::other("link down")))
    }
}

#[tokio::test]
async fn test_receive_error_ends_run() {
    let mut stack = NetworkStack::new(BrokenRx, make_iface(), make_dhcp_config(), make_deps());
    let result = timeout(WAIT, stack.run()).await.unwrap();
    assert!(matches!(result, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_send_error_is_counted_and_loop_continues() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stack = NetworkStack::new(
        BrokenTx { rx },
        make_iface(),
        make_dhcp_config(),
        make_deps(),
    );

    tx.send(discover_frame(1, client_mac(1))).unwrap();
    tx.send(discover_frame(2, client_mac(2))).unwrap();
    drop(tx);

    let result = timeout(WAIT, stack.run()).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(stack.metrics().tx_errors.get(), 2);
    assert_eq!(stack.metrics().rx_frames.get(), 2);
    assert_eq!(stack.leases().len(), 2);
}

#[tokio::test]
async fn test_sender_fails_after_stack_dropped() {
    let (capture, _peer) = ChannelCapture::pair();
    let stack = NetworkStack::new(capture, make_iface(), make_dhcp_config(), make_deps());
    let udp = stack.udp();
    drop(stack);

    let err = udp
        .send_to(1, SocketAddrV4::new(PEER_IP, 2), Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::StackClosed));
}
