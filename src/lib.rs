//! lanstub - DHCP server and DNS stub on one Ethernet interface
//!
//! Frames are read from a [`capture::Capture`] backend and handed to the
//! [`dataplane::NetworkStack`], which diverts DHCP to the lease engine and
//! routes everything else through ARP, ICMP and the UDP/TCP listener tables.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
