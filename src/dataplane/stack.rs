//! Network stack façade
//!
//! Owns the interface and runs the receive loop. Every received frame is
//! classified once: DHCP frames go to the [`DhcpInterceptor`], everything
//! else to the [`Dispatcher`]. Both run on the loop task, so lease updates
//! and dispatch happen strictly in arrival order.
//!
//! Other components talk to a running stack through a [`StackHandle`]:
//! listener registration goes straight into the shared registries, and
//! outbound traffic is queued to the loop, which is the only transmitter.

use super::clock::{Clock, MonotonicClock};
use super::dhcp_interceptor::{is_dhcp_frame, DhcpInterceptor};
use super::dhcp_server::PoolAllocator;
use super::dispatcher::Dispatcher;
use super::egress::{Egress, InterfaceInfo};
use super::lease::{DhcpConfig, LeaseDatabase, LeaseEngine};
use super::listener::{
    Keepalive, TcpBinding, TcpListener, TcpRegistry, TcpSend, UdpListener, UdpRegistry, UdpSend,
};
use crate::capture::Capture;
use crate::protocol::ethernet::MAX_FRAME_SIZE;
use crate::telemetry::StackMetrics;
use crate::{Error, Result};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const AGING_INTERVAL: Duration = Duration::from_secs(1);

/// Collaborators supplied at construction
#[derive(Clone)]
pub struct Dependencies {
    pub clock: Arc<dyn Clock>,
    pub lease_engine: Arc<dyn LeaseEngine>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            lease_engine: Arc::new(PoolAllocator::new()),
        }
    }
}

/// Traffic queued for the loop by the accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Ipv4 {
        dst: Ipv4Addr,
        protocol: u8,
        payload: Vec<u8>,
    },
    Udp(UdpSend),
    Tcp(TcpSend),
}

fn queue(tx: &mpsc::UnboundedSender<Outbound>, outbound: Outbound) -> Result<()> {
    tx.send(outbound).map_err(|_| Error::StackClosed)
}

/// Originates raw IPv4 payloads from the interface address
#[derive(Debug, Clone)]
pub struct Ipv4Sender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Ipv4Sender {
    pub fn send(&self, dst: Ipv4Addr, protocol: u8, payload: Vec<u8>) -> Result<()> {
        queue(
            &self.tx,
            Outbound::Ipv4 {
                dst,
                protocol,
                payload,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct UdpSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl UdpSender {
    pub fn send(&self, send: UdpSend) -> Result<()> {
        queue(&self.tx, Outbound::Udp(send))
    }

    pub fn send_to(&self, src_port: u16, dst: SocketAddrV4, payload: Vec<u8>) -> Result<()> {
        self.send(UdpSend {
            src_port,
            dst,
            payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TcpSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TcpSender {
    pub fn send(&self, send: TcpSend) -> Result<()> {
        queue(&self.tx, Outbound::Tcp(send))
    }
}

/// Cloneable access to a stack, usable from other tasks while it runs
#[derive(Clone)]
pub struct StackHandle {
    udp: Arc<UdpRegistry>,
    tcp: Arc<TcpRegistry>,
    tx: mpsc::UnboundedSender<Outbound>,
    iface: InterfaceInfo,
    metrics: Arc<StackMetrics>,
}

impl StackHandle {
    /// Install or replace the UDP listener for `port`
    pub fn attach_udp(&self, port: u16, listener: Arc<dyn UdpListener>) {
        if self.udp.attach(port, listener).is_some() {
            debug!("Replaced UDP listener on port {}", port);
        } else {
            debug!("UDP listener attached on port {}", port);
        }
    }

    /// Install or replace the TCP listener for `port`
    pub fn attach_tcp(
        &self,
        port: u16,
        listener: Arc<dyn TcpListener>,
        keepalive: Option<Keepalive>,
    ) {
        let binding = Arc::new(TcpBinding {
            listener,
            keepalive,
        });
        if self.tcp.attach(port, binding).is_some() {
            debug!("Replaced TCP listener on port {}", port);
        } else {
            debug!("TCP listener attached on port {}", port);
        }
    }

    pub fn ipv4(&self) -> Ipv4Sender {
        Ipv4Sender {
            tx: self.tx.clone(),
        }
    }

    pub fn udp(&self) -> UdpSender {
        UdpSender {
            tx: self.tx.clone(),
        }
    }

    pub fn tcp(&self) -> TcpSender {
        TcpSender {
            tx: self.tx.clone(),
        }
    }

    pub fn interface(&self) -> &InterfaceInfo {
        &self.iface
    }

    pub fn metrics(&self) -> &Arc<StackMetrics> {
        &self.metrics
    }

    pub fn udp_ports(&self) -> Vec<u16> {
        self.udp.ports()
    }

    pub fn tcp_ports(&self) -> Vec<u16> {
        self.tcp.ports()
    }
}

pub struct NetworkStack<C: Capture> {
    capture: C,
    interceptor: DhcpInterceptor,
    dispatcher: Dispatcher,
    handle: StackHandle,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    clock: Arc<dyn Clock>,
    metrics: Arc<StackMetrics>,
}

impl<C: Capture> NetworkStack<C> {
    pub fn new(
        capture: C,
        iface: InterfaceInfo,
        dhcp_config: DhcpConfig,
        deps: Dependencies,
    ) -> Self {
        let metrics = Arc::new(StackMetrics::new());
        let udp = Arc::new(UdpRegistry::new());
        let tcp = Arc::new(TcpRegistry::new());
        let (tx, outbound_rx) = mpsc::unbounded_channel();

        let interceptor =
            DhcpInterceptor::new(dhcp_config, deps.lease_engine, iface.mtu, metrics.clone());
        let dispatcher = Dispatcher::new(
            udp.clone(),
            tcp.clone(),
            Egress::new(iface.clone(), metrics.clone()),
            metrics.clone(),
        );

        Self {
            capture,
            interceptor,
            dispatcher,
            handle: StackHandle {
                udp,
                tcp,
                tx,
                iface,
                metrics: metrics.clone(),
            },
            outbound_rx,
            clock: deps.clock,
            metrics,
        }
    }

    pub fn handle(&self) -> StackHandle {
        self.handle.clone()
    }

    pub fn attach_udp(&self, port: u16, listener: Arc<dyn UdpListener>) {
        self.handle.attach_udp(port, listener);
    }

    pub fn attach_tcp(
        &self,
        port: u16,
        listener: Arc<dyn TcpListener>,
        keepalive: Option<Keepalive>,
    ) {
        self.handle.attach_tcp(port, listener, keepalive);
    }

    pub fn ipv4(&self) -> Ipv4Sender {
        self.handle.ipv4()
    }

    pub fn udp(&self) -> UdpSender {
        self.handle.udp()
    }

    pub fn tcp(&self) -> TcpSender {
        self.handle.tcp()
    }

    pub fn leases(&self) -> &LeaseDatabase {
        self.interceptor.leases()
    }

    pub fn dhcp_config(&self) -> &DhcpConfig {
        self.interceptor.config()
    }

    pub fn interface(&self) -> &InterfaceInfo {
        self.handle.interface()
    }

    pub fn metrics(&self) -> &Arc<StackMetrics> {
        &self.metrics
    }

    /// Classify and handle one received frame; returns the frames to send
    pub fn process_frame(&mut self, frame: &[u8]) -> Vec<Vec<u8>> {
        self.metrics.record_rx(frame.len());
        let now = self.clock.now();

        if is_dhcp_frame(frame, self.handle.iface.mac) {
            self.metrics.dhcp_frames.inc();
            self.interceptor.handle(frame, now).into_iter().collect()
        } else {
            self.metrics.dispatched_frames.inc();
            self.dispatcher.dispatch(frame, now)
        }
    }

    /// Frame traffic queued through the accessors
    pub fn process_outbound(&mut self, outbound: Outbound) -> Vec<Vec<u8>> {
        let now = self.clock.now();
        self.dispatcher.originate(outbound, now)
    }

    /// Send frames; a failed send is logged and skipped
    async fn transmit(&mut self, frames: Vec<Vec<u8>>) {
        for frame in frames {
            match self.capture.send(&frame).await {
                Ok(_) => self.metrics.record_tx(frame.len()),
                Err(e) => {
                    warn!("Failed to send {} byte frame: {}", frame.len(), e);
                    self.metrics.tx_errors.inc();
                }
            }
        }
    }

    /// Drive the stack until the interface closes or fails.
    ///
    /// Returns `Ok(())` when the interface closes, the receive error otherwise.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Network stack running on {}/{} ({})",
            self.handle.iface.ip, self.handle.iface.prefix_len, self.handle.iface.mac
        );

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let mut aging_timer = tokio::time::interval(AGING_INTERVAL);

        let result = loop {
            tokio::select! {
                _ = aging_timer.tick() => {
                    let now = self.clock.now();
                    self.dispatcher.age(now);
                }
                Some(outbound) = self.outbound_rx.recv() => {
                    let frames = self.process_outbound(outbound);
                    self.transmit(frames).await;
                }
                result = self.capture.recv(&mut buf) => {
                    match result {
                        Ok(rx_info) => {
                            let frames = self.process_frame(&buf[..rx_info.len]);
                            self.transmit(frames).await;
                        }
                        Err(Error::InterfaceClosed) => {
                            info!("Interface closed, stopping network stack");
                            break Ok(());
                        }
                        Err(e) => {
                            error!("Receive error, stopping network stack: {}", e);
                            break Err(e);
                        }
                    }
                }
            }
        };

        self.log_summary();
        result
    }

    /// Leaves the interface open; only records the request
    pub fn disconnect(&self) {
        info!("Disconnect requested for {}", self.handle.iface.ip);
    }

    fn log_summary(&self) {
        let summary = self
            .metrics
            .export()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        info!("Stack counters: {}", summary);
    }
}
