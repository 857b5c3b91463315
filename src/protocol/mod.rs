//! Wire formats
//!
//! Parsers borrow the receive buffer; builders produce owned `Vec<u8>`.

pub mod arp;
pub mod dhcp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod types;
pub mod udp;

pub use types::*;
