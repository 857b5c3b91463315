//! ICMP protocol - RFC 792

use super::ipv4::checksum;
use crate::{Error, Result};

/// ICMP header size (type, code, checksum, rest of header)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            _ => None,
        }
    }
}

/// Parsed ICMP message (zero-copy reference)
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP message too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(self.buffer) == 0
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8 && self.code() == 0
    }
}

/// Build an Echo Reply carrying the request's identifier, sequence and data
pub fn build_echo_reply(request: &IcmpPacket<'_>) -> Vec<u8> {
    let mut reply = request.as_bytes().to_vec();
    reply[0] = IcmpType::EchoReply as u8;
    reply[2] = 0;
    reply[3] = 0;

    let sum = checksum(&reply);
    reply[2..4].copy_from_slice(&sum.to_be_bytes());
    reply
}

/// Build an Echo Request (used by tests and diagnostics)
pub fn build_echo_request(identifier: u16, sequence: u16, data: &[u8]) -> Vec<u8> {
    let mut request = vec![0u8; ICMP_HEADER_SIZE];
    request[0] = IcmpType::EchoRequest as u8;
    request[4..6].copy_from_slice(&identifier.to_be_bytes());
    request[6..8].copy_from_slice(&sequence.to_be_bytes());
    request.extend_from_slice(data);

    let sum = checksum(&request);
    request[2..4].copy_from_slice(&sum.to_be_bytes());
    request
}
