//! Link-layer I/O backends
//!
//! - AF_PACKET: raw socket on a Linux interface
//! - Channel: in-memory pair for tests and embedding

mod af_packet;
mod channel;

pub use af_packet::AfPacketSocket;
pub use channel::{ChannelCapture, ChannelPeer};

use crate::Result;
use std::future::Future;

/// Information about a received frame
#[derive(Debug, Clone)]
pub struct RxInfo {
    /// Number of bytes written into the receive buffer
    pub len: usize,
}

/// Frame I/O backend used by the network stack.
///
/// `recv` returning [`crate::Error::InterfaceClosed`] ends the receive loop
/// cleanly; any other error ends it with that error.
pub trait Capture: Send + Sync {
    /// Receive one Ethernet frame into the provided buffer
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;

    /// Send one Ethernet frame
    fn send(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
