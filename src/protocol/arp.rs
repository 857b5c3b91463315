//! ARP (Address Resolution Protocol) - RFC 826

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ARP packet size (for Ethernet/IPv4)
pub const ARP_PACKET_SIZE: usize = 28;

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP packet (Ethernet/IPv4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::Parse("ARP packet too short".into()));
        }

        let htype = u16::from_be_bytes([buffer[0], buffer[1]]);
        let ptype = u16::from_be_bytes([buffer[2], buffer[3]]);
        if htype != 1 || ptype != 0x0800 || buffer[4] != 6 || buffer[5] != 4 {
            return Err(Error::Parse(format!(
                "unsupported ARP hardware/protocol: htype={} ptype=0x{:04x}",
                htype, ptype
            )));
        }

        let operation = ArpOp::from_u16(u16::from_be_bytes([buffer[6], buffer[7]]))
            .ok_or_else(|| Error::Parse("invalid ARP operation".into()))?;

        let mac = |offset: usize| {
            MacAddr::from_slice(&buffer[offset..offset + 6])
                .ok_or_else(|| Error::Parse("ARP hardware address truncated".into()))
        };
        let ip = |offset: usize| {
            Ipv4Addr::new(
                buffer[offset],
                buffer[offset + 1],
                buffer[offset + 2],
                buffer[offset + 3],
            )
        };

        Ok(Self {
            operation,
            sender_mac: mac(8)?,
            sender_ip: ip(14),
            target_mac: mac(18)?,
            target_ip: ip(24),
        })
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        // Ethernet / IPv4, address lengths 6 and 4
        buf[0..2].copy_from_slice(&1u16.to_be_bytes());
        buf[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Gratuitous ARP: target IP equals sender IP
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x31]);

    #[test]
    fn test_arp_op_from_u16() {
        assert_eq!(ArpOp::from_u16(1), Some(ArpOp::Request));
        assert_eq!(ArpOp::from_u16(2), Some(ArpOp::Reply));
        assert_eq!(ArpOp::from_u16(3), None);
    }

    #[test]
    fn test_parse_request_bytes() {
        let request = ArpPacket::request(
            HOST_MAC,
            Ipv4Addr::new(172, 16, 0, 31),
            Ipv4Addr::new(172, 16, 0, 1),
        );
        let bytes = request.to_bytes();
        assert_eq!(&bytes[6..8], &[0, 1]);
        assert_eq!(&bytes[18..24], &[0; 6]);

        let parsed = ArpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, request);
        assert!(!parsed.is_gratuitous());
    }

    #[test]
    fn test_parse_ignores_trailing_padding() {
        let reply = ArpPacket::reply(
            HOST_MAC,
            Ipv4Addr::new(172, 16, 0, 31),
            MacAddr::BROADCAST,
            Ipv4Addr::new(172, 16, 0, 1),
        );
        let mut bytes = reply.to_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 18]);
        assert_eq!(ArpPacket::parse(&bytes).unwrap().operation, ArpOp::Reply);
    }

    #[test]
    fn test_parse_rejects_non_ethernet() {
        let mut bytes = ArpPacket::request(
            HOST_MAC,
            Ipv4Addr::new(172, 16, 0, 31),
            Ipv4Addr::new(172, 16, 0, 1),
        )
        .to_bytes();
        bytes[1] = 6;
        assert!(ArpPacket::parse(&bytes).is_err());
        assert!(ArpPacket::parse(&bytes[..20]).is_err());
    }

    #[test]
    fn test_gratuitous() {
        let ip = Ipv4Addr::new(172, 16, 0, 31);
        assert!(ArpPacket::request(HOST_MAC, ip, ip).is_gratuitous());
    }
}
