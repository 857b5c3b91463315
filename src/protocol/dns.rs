//! DNS protocol - RFC 1035
//!
//! Just enough of the wire format for a stub: header flags, the question
//! section, and responses carrying A records.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// DNS server/client port
pub const DNS_PORT: u16 = 53;

/// DNS header size (fixed at 12 bytes)
pub const DNS_HEADER_SIZE: usize = 12;

/// Maximum UDP DNS message size (RFC 1035)
pub const MAX_UDP_SIZE: usize = 512;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// DNS response codes (RCODE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DnsRcode {
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl DnsRcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DnsRcode::NoError),
            1 => Some(DnsRcode::FormatError),
            2 => Some(DnsRcode::ServerFailure),
            3 => Some(DnsRcode::NameError),
            4 => Some(DnsRcode::NotImplemented),
            5 => Some(DnsRcode::Refused),
            _ => None,
        }
    }
}

/// DNS record types the stub distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DnsType {
    A = 1,
    CNAME = 5,
    PTR = 12,
    AAAA = 28,
    ANY = 255,
}

impl DnsType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(DnsType::A),
            5 => Some(DnsType::CNAME),
            12 => Some(DnsType::PTR),
            28 => Some(DnsType::AAAA),
            255 => Some(DnsType::ANY),
            _ => None,
        }
    }
}

/// DNS record class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DnsClass {
    IN = 1,
    ANY = 255,
}

/// Parsed DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Zero-copy DNS message view
#[derive(Debug)]
pub struct DnsHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> DnsHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < DNS_HEADER_SIZE {
            return Err(Error::Parse("DNS header too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    fn flags(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn is_response(&self) -> bool {
        self.flags() & FLAG_QR != 0
    }

    /// Opcode (bits 11-14)
    pub fn opcode(&self) -> u8 {
        ((self.flags() >> 11) & 0x0F) as u8
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags() & FLAG_RD != 0
    }

    pub fn recursion_available(&self) -> bool {
        self.flags() & FLAG_RA != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags() & 0x000F) as u8
    }

    pub fn question_count(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn answer_count(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    /// Decode the question section
    pub fn questions(&self) -> Result<Vec<DnsQuestion>> {
        let mut questions = Vec::new();
        let mut offset = DNS_HEADER_SIZE;

        for _ in 0..self.question_count() {
            let (name, next) = parse_domain_name(self.buffer, offset)?;
            offset = next;

            if offset + 4 > self.buffer.len() {
                return Err(Error::Parse("DNS question truncated".into()));
            }
            let qtype = u16::from_be_bytes([self.buffer[offset], self.buffer[offset + 1]]);
            let qclass = u16::from_be_bytes([self.buffer[offset + 2], self.buffer[offset + 3]]);
            offset += 4;

            questions.push(DnsQuestion {
                name,
                qtype,
                qclass,
            });
        }

        Ok(questions)
    }

    /// A records from the answer section, skipping other types
    pub fn a_answers(&self) -> Result<Vec<(String, Ipv4Addr, u32)>> {
        let mut offset = DNS_HEADER_SIZE;
        for _ in 0..self.question_count() {
            let (_, next) = parse_domain_name(self.buffer, offset)?;
            offset = next + 4;
        }

        let mut answers = Vec::new();
        for _ in 0..self.answer_count() {
            let (name, next) = parse_domain_name(self.buffer, offset)?;
            offset = next;
            let fixed = self
                .buffer
                .get(offset..offset + 10)
                .ok_or_else(|| Error::Parse("DNS answer truncated".into()))?;
            let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
            let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
            let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
            offset += 10;

            let rdata = self
                .buffer
                .get(offset..offset + rdlength)
                .ok_or_else(|| Error::Parse("DNS RDATA truncated".into()))?;
            offset += rdlength;

            if rtype == DnsType::A as u16 && rdata.len() == 4 {
                answers.push((
                    name,
                    Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]),
                    ttl,
                ));
            }
        }

        Ok(answers)
    }
}

/// Overwrite the transaction id of an encoded message in place
pub fn set_id(message: &mut [u8], id: u16) {
    if message.len() >= 2 {
        message[0..2].copy_from_slice(&id.to_be_bytes());
    }
}

/// Parse a domain name from DNS wire format, following compression
/// pointers (RFC 1035 section 4.1.4). Returns the name and the offset just
/// past it in the original position.
pub fn parse_domain_name(buffer: &[u8], start: usize) -> Result<(String, usize)> {
    const MAX_JUMPS: usize = 128;

    let mut labels: Vec<String> = Vec::new();
    let mut offset = start;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *buffer
            .get(offset)
            .ok_or_else(|| Error::Parse("DNS name truncated".into()))? as usize;

        if len == 0 {
            end.get_or_insert(offset + 1);
            break;
        }

        if len & 0xC0 == 0xC0 {
            let low = *buffer
                .get(offset + 1)
                .ok_or_else(|| Error::Parse("DNS compression pointer truncated".into()))?;
            end.get_or_insert(offset + 2);

            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(Error::Parse("DNS name compression loop detected".into()));
            }
            offset = ((len & 0x3F) << 8) | low as usize;
            continue;
        }

        let label = buffer
            .get(offset + 1..offset + 1 + len)
            .ok_or_else(|| Error::Parse("DNS label truncated".into()))?;
        let label = std::str::from_utf8(label)
            .map_err(|_| Error::Parse("DNS label not valid UTF-8".into()))?;
        labels.push(label.to_string());
        offset += 1 + len;
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };

    Ok((name, end.unwrap_or(offset + 1)))
}

/// Encode a domain name to DNS wire format
pub fn encode_domain_name(name: &str) -> Vec<u8> {
    let mut result = Vec::new();
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        let label = &label.as_bytes()[..label.len().min(63)];
        result.push(label.len() as u8);
        result.extend_from_slice(label);
    }
    result.push(0);
    result
}

#[derive(Debug, Clone)]
struct ARecord {
    name: String,
    addr: Ipv4Addr,
    ttl: u32,
}

/// DNS message builder
#[derive(Debug, Clone, Default)]
pub struct DnsBuilder {
    id: u16,
    flags: u16,
    questions: Vec<DnsQuestion>,
    answers: Vec<ARecord>,
}

impl DnsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a response echoing the query's id, opcode and RD bit
    pub fn response_to(query: &DnsHeader<'_>) -> Self {
        let echoed = query.flags() & (0x7800 | FLAG_RD);
        Self {
            id: query.id(),
            flags: FLAG_QR | FLAG_RA | echoed,
            questions: Vec::new(),
            answers: Vec::new(),
        }
    }

    pub fn id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn recursion_desired(mut self, rd: bool) -> Self {
        self.set_flag(FLAG_RD, rd);
        self
    }

    pub fn authoritative(mut self, aa: bool) -> Self {
        self.set_flag(FLAG_AA, aa);
        self
    }

    pub fn rcode(mut self, rcode: DnsRcode) -> Self {
        self.flags = (self.flags & !0x000F) | (rcode as u16);
        self
    }

    pub fn add_question(mut self, name: &str, qtype: u16, qclass: u16) -> Self {
        self.questions.push(DnsQuestion {
            name: name.to_string(),
            qtype,
            qclass,
        });
        self
    }

    pub fn add_a_record(mut self, name: &str, addr: Ipv4Addr, ttl: u32) -> Self {
        self.answers.push(ARecord {
            name: name.to_string(),
            addr,
            ttl,
        });
        self
    }

    fn set_flag(&mut self, bit: u16, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Build the message. Answer owners that repeat a question name are
    /// written as compression pointers to that question.
    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MAX_UDP_SIZE);
        buffer.extend_from_slice(&self.id.to_be_bytes());
        buffer.extend_from_slice(&self.flags.to_be_bytes());
        buffer.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        buffer.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        // NSCOUNT, ARCOUNT
        buffer.extend_from_slice(&[0, 0, 0, 0]);

        let mut name_offsets = Vec::with_capacity(self.questions.len());
        for q in &self.questions {
            name_offsets.push((q.name.to_ascii_lowercase(), buffer.len()));
            buffer.extend(encode_domain_name(&q.name));
            buffer.extend_from_slice(&q.qtype.to_be_bytes());
            buffer.extend_from_slice(&q.qclass.to_be_bytes());
        }

        for answer in &self.answers {
            let key = answer.name.to_ascii_lowercase();
            match name_offsets.iter().find(|(name, _)| *name == key) {
                Some((_, offset)) if *offset < 0x4000 => {
                    buffer.extend_from_slice(&(0xC000 | *offset as u16).to_be_bytes());
                }
                _ => buffer.extend(encode_domain_name(&answer.name)),
            }
            buffer.extend_from_slice(&(DnsType::A as u16).to_be_bytes());
            buffer.extend_from_slice(&(DnsClass::IN as u16).to_be_bytes());
            buffer.extend_from_slice(&answer.ttl.to_be_bytes());
            buffer.extend_from_slice(&4u16.to_be_bytes());
            buffer.extend_from_slice(&answer.addr.octets());
        }

        buffer
    }
}
