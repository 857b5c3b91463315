//! DHCP protocol - RFC 2131, 2132
//!
//! Two entry points on the receive side: [`looks_like_dhcp`], a fixed-offset
//! sniff that runs on every frame, and [`DhcpMessage::parse`], the full
//! validation that produces an owned message for the lease engine.

use super::{ethernet, ipv4, udp, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// DHCP server port (bootps)
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port (bootpc)
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Fixed header size (before options)
pub const DHCP_HEADER_SIZE: usize = 236;

/// Magic cookie marking start of options
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Minimum packet size (header + magic cookie + end option)
pub const MIN_PACKET_SIZE: usize = DHCP_HEADER_SIZE + 4 + 1;

/// Broadcast bit of the flags field
pub const BROADCAST_FLAG: u16 = 0x8000;

/// Shortest frame the sniff will look at: Ethernet + IPv4 + UDP + BOOTP header and cookie
const SNIFF_MIN_FRAME: usize =
    ethernet::HEADER_SIZE + ipv4::MIN_HEADER_SIZE + udp::HEADER_SIZE + DHCP_HEADER_SIZE + 4;

/// BOOTP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOp {
    Request = 1,
    Reply = 2,
}

impl BootpOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(BootpOp::Request),
            2 => Some(BootpOp::Reply),
            _ => None,
        }
    }
}

/// DHCP message types (Option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }
}

/// DHCP option codes
pub mod options {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDR: u8 = 28;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const CLIENT_ID: u8 = 61;
    pub const END: u8 = 255;
}

/// Structural check on a raw Ethernet frame.
///
/// Reads a fixed set of header fields and the magic cookie; it never walks
/// options, so cost does not depend on frame size. A `true` result only
/// means the frame should be handed to [`DhcpMessage::parse`].
pub fn looks_like_dhcp(frame: &[u8]) -> bool {
    if frame.len() < SNIFF_MIN_FRAME {
        return false;
    }
    if u16::from_be_bytes([frame[12], frame[13]]) != 0x0800 {
        return false;
    }

    let ip = ethernet::HEADER_SIZE;
    if frame[ip] >> 4 != 4 || frame[ip + 9] != udp::PROTOCOL_NUMBER {
        return false;
    }
    let ihl = ((frame[ip] & 0x0F) as usize) * 4;
    if ihl < ipv4::MIN_HEADER_SIZE {
        return false;
    }

    let udp_start = ip + ihl;
    let cookie_start = udp_start + udp::HEADER_SIZE + DHCP_HEADER_SIZE;
    if frame.len() < cookie_start + 4 {
        return false;
    }

    let dst_port = u16::from_be_bytes([frame[udp_start + 2], frame[udp_start + 3]]);
    (dst_port == DHCP_SERVER_PORT || dst_port == DHCP_CLIENT_PORT)
        && frame[cookie_start..cookie_start + 4] == MAGIC_COOKIE
}

/// Fully validated DHCP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: BootpOp,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub message_type: DhcpMessageType,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub hostname: Option<String>,
    pub client_id: Option<Vec<u8>>,
    pub parameter_request_list: Vec<u8>,
}

impl DhcpMessage {
    /// Parse a BOOTP/DHCP payload (the UDP payload, not the frame)
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < MIN_PACKET_SIZE {
            return Err(Error::Parse(format!(
                "DHCP message too short: {} bytes",
                buffer.len()
            )));
        }
        if buffer[236..240] != MAGIC_COOKIE {
            return Err(Error::Parse("invalid DHCP magic cookie".into()));
        }

        let op = BootpOp::from_u8(buffer[0])
            .ok_or_else(|| Error::Parse(format!("unknown BOOTP op {}", buffer[0])))?;
        let hlen = buffer[2];
        if hlen as usize > 16 {
            return Err(Error::Parse(format!("hardware address length {}", hlen)));
        }

        let addr = |o: usize| Ipv4Addr::new(buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]);
        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&buffer[28..44]);

        let mut message = Self {
            op,
            htype: buffer[1],
            hlen,
            hops: buffer[3],
            xid: u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]),
            secs: u16::from_be_bytes([buffer[8], buffer[9]]),
            flags: u16::from_be_bytes([buffer[10], buffer[11]]),
            ciaddr: addr(12),
            yiaddr: addr(16),
            siaddr: addr(20),
            giaddr: addr(24),
            chaddr,
            message_type: DhcpMessageType::Discover,
            requested_ip: None,
            server_id: None,
            lease_time: None,
            hostname: None,
            client_id: None,
            parameter_request_list: Vec::new(),
        };

        let mut message_type = None;
        for (code, data) in walk_options(&buffer[240..])? {
            match code {
                options::MESSAGE_TYPE => {
                    let value = *data
                        .first()
                        .ok_or_else(|| Error::Parse("empty message type option".into()))?;
                    message_type = Some(DhcpMessageType::from_u8(value).ok_or_else(|| {
                        Error::Parse(format!("unknown DHCP message type {}", value))
                    })?);
                }
                options::REQUESTED_IP => message.requested_ip = option_addr(data),
                options::SERVER_ID => message.server_id = option_addr(data),
                options::LEASE_TIME => {
                    message.lease_time = data
                        .get(..4)
                        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                }
                options::HOSTNAME => {
                    message.hostname = std::str::from_utf8(data).ok().map(str::to_string)
                }
                options::CLIENT_ID => message.client_id = Some(data.to_vec()),
                options::PARAMETER_REQUEST => message.parameter_request_list = data.to_vec(),
                _ => {}
            }
        }

        message.message_type =
            message_type.ok_or_else(|| Error::Parse("missing DHCP message type".into()))?;
        Ok(message)
    }

    /// Client MAC address (first 6 bytes of chaddr)
    pub fn client_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        MacAddr(mac)
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }
}

fn option_addr(data: &[u8]) -> Option<Ipv4Addr> {
    data.get(..4).map(|b| Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

/// Split the options area into (code, data) pairs, checking every TLV
/// fits and that the list is terminated by END.
fn walk_options(opts: &[u8]) -> Result<Vec<(u8, &[u8])>> {
    let mut found = Vec::new();
    let mut i = 0;

    while i < opts.len() {
        let code = opts[i];
        if code == options::PAD {
            i += 1;
            continue;
        }
        if code == options::END {
            return Ok(found);
        }

        if i + 1 >= opts.len() {
            return Err(Error::Parse(format!("option {} has no length", code)));
        }
        let data_start = i + 2;
        let data_end = data_start + opts[i + 1] as usize;
        if data_end > opts.len() {
            return Err(Error::Parse(format!("option {} truncated", code)));
        }

        found.push((code, &opts[data_start..data_end]));
        i = data_end;
    }

    Err(Error::Parse("DHCP options not terminated".into()))
}

/// DHCP message builder
///
/// Server replies start from [`DhcpBuilder::reply`]; [`DhcpBuilder::request`]
/// builds client messages for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct DhcpBuilder {
    op: u8,
    htype: u8,
    hlen: u8,
    xid: u32,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: [u8; 16],
    options: Vec<u8>,
}

impl DhcpBuilder {
    /// Start a reply that echoes the request's xid, flags and chaddr
    pub fn reply(request: &DhcpMessage) -> Self {
        Self {
            op: BootpOp::Reply as u8,
            htype: request.htype,
            hlen: request.hlen,
            xid: request.xid,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: Vec::new(),
        }
    }

    /// Start a client message for an Ethernet hardware address
    pub fn request(xid: u32, client_mac: MacAddr) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&client_mac.0);
        Self {
            op: BootpOp::Request as u8,
            htype: 1,
            hlen: 6,
            xid,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: Vec::new(),
        }
    }

    pub fn message_type(mut self, msg_type: DhcpMessageType) -> Self {
        self.add_option(options::MESSAGE_TYPE, &[msg_type as u8]);
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn ciaddr(mut self, ip: Ipv4Addr) -> Self {
        self.ciaddr = ip;
        self
    }

    /// Set assigned IP address (yiaddr)
    pub fn yiaddr(mut self, ip: Ipv4Addr) -> Self {
        self.yiaddr = ip;
        self
    }

    /// Set server IP address (siaddr)
    pub fn siaddr(mut self, ip: Ipv4Addr) -> Self {
        self.siaddr = ip;
        self
    }

    /// Option 54
    pub fn server_id(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::SERVER_ID, &ip.octets());
        self
    }

    /// Option 50
    pub fn requested_ip(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::REQUESTED_IP, &ip.octets());
        self
    }

    /// Option 12
    pub fn hostname(mut self, name: &str) -> Self {
        self.add_option(options::HOSTNAME, name.as_bytes());
        self
    }

    pub fn subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.add_option(options::SUBNET_MASK, &mask.octets());
        self
    }

    pub fn router(mut self, routers: &[Ipv4Addr]) -> Self {
        self.add_addr_list(options::ROUTER, routers);
        self
    }

    pub fn dns(mut self, servers: &[Ipv4Addr]) -> Self {
        self.add_addr_list(options::DNS_SERVER, servers);
        self
    }

    pub fn broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.add_option(options::BROADCAST_ADDR, &addr.octets());
        self
    }

    /// Lease time in seconds (Option 51)
    pub fn lease_time(mut self, seconds: u32) -> Self {
        self.add_option(options::LEASE_TIME, &seconds.to_be_bytes());
        self
    }

    /// T1 (Option 58)
    pub fn renewal_time(mut self, seconds: u32) -> Self {
        self.add_option(options::RENEWAL_TIME, &seconds.to_be_bytes());
        self
    }

    /// T2 (Option 59)
    pub fn rebinding_time(mut self, seconds: u32) -> Self {
        self.add_option(options::REBINDING_TIME, &seconds.to_be_bytes());
        self
    }

    pub fn domain_name(mut self, domain: &str) -> Self {
        self.add_option(options::DOMAIN_NAME, domain.as_bytes());
        self
    }

    /// Add a raw option; data longer than 255 bytes is truncated
    pub fn option(mut self, code: u8, data: &[u8]) -> Self {
        self.add_option(code, data);
        self
    }

    fn add_addr_list(&mut self, code: u8, addrs: &[Ipv4Addr]) {
        if addrs.is_empty() {
            return;
        }
        let data: Vec<u8> = addrs.iter().flat_map(|a| a.octets()).collect();
        self.add_option(code, &data);
    }

    fn add_option(&mut self, code: u8, data: &[u8]) {
        let data = &data[..data.len().min(255)];
        self.options.push(code);
        self.options.push(data.len() as u8);
        self.options.extend_from_slice(data);
    }

    /// Build the packet, padded to at least 300 bytes for old BOOTP relays
    pub fn build(mut self) -> Vec<u8> {
        self.options.push(options::END);

        let options_len = self.options.len();
        let total_len = (DHCP_HEADER_SIZE + 4 + options_len).max(300);
        let mut buffer = vec![0u8; total_len];

        buffer[0] = self.op;
        buffer[1] = self.htype;
        buffer[2] = self.hlen;
        buffer[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buffer[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.ciaddr.octets());
        buffer[16..20].copy_from_slice(&self.yiaddr.octets());
        buffer[20..24].copy_from_slice(&self.siaddr.octets());
        buffer[24..28].copy_from_slice(&self.giaddr.octets());
        buffer[28..44].copy_from_slice(&self.chaddr);
        // sname and file stay zero
        buffer[236..240].copy_from_slice(&MAGIC_COOKIE);
        buffer[240..240 + options_len].copy_from_slice(&self.options);

        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::ipv4::Ipv4Builder;
    use crate::protocol::udp::UdpBuilder;
    use crate::protocol::EtherType;

    const CLIENT_MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn make_discover_packet() -> Vec<u8> {
        DhcpBuilder::request(0x12345678, CLIENT_MAC)
            .flags(BROADCAST_FLAG)
            .message_type(DhcpMessageType::Discover)
            .option(options::PARAMETER_REQUEST, &[1, 3, 6, 15])
            .hostname("laptop")
            .build()
    }

    fn make_frame(dhcp: &[u8], dst_port: u16) -> Vec<u8> {
        let udp = UdpBuilder::new()
            .src_port(DHCP_CLIENT_PORT)
            .dst_port(dst_port)
            .payload(dhcp)
            .build(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
        let ip = Ipv4Builder::new()
            .protocol(udp::PROTOCOL_NUMBER)
            .src_addr(Ipv4Addr::UNSPECIFIED)
            .dst_addr(Ipv4Addr::BROADCAST)
            .payload(&udp)
            .build();
        FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(CLIENT_MAC)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build()
    }

    #[test]
    fn test_parse_discover() {
        let msg = DhcpMessage::parse(&make_discover_packet()).unwrap();

        assert_eq!(msg.op, BootpOp::Request);
        assert_eq!(msg.htype, 1);
        assert_eq!(msg.hlen, 6);
        assert_eq!(msg.xid, 0x12345678);
        assert!(msg.is_broadcast());
        assert_eq!(msg.client_mac(), CLIENT_MAC);
        assert_eq!(msg.message_type, DhcpMessageType::Discover);
        assert_eq!(msg.parameter_request_list, vec![1, 3, 6, 15]);
        assert_eq!(msg.hostname.as_deref(), Some("laptop"));
    }

    #[test]
    fn test_parse_request_options() {
        let requested = Ipv4Addr::new(192, 168, 1, 100);
        let server = Ipv4Addr::new(192, 168, 1, 1);
        let packet = DhcpBuilder::request(0xABCDEF00, CLIENT_MAC)
            .message_type(DhcpMessageType::Request)
            .requested_ip(requested)
            .server_id(server)
            .option(options::CLIENT_ID, &[1, 0, 0x11, 0x22, 0x33, 0x44, 0x55])
            .build();
        let msg = DhcpMessage::parse(&packet).unwrap();

        assert_eq!(msg.message_type, DhcpMessageType::Request);
        assert_eq!(msg.requested_ip, Some(requested));
        assert_eq!(msg.server_id, Some(server));
        assert_eq!(msg.client_id.as_deref().map(|c| c.len()), Some(7));
    }

    #[test]
    fn test_parse_too_short() {
        assert!(DhcpMessage::parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_parse_invalid_magic() {
        let mut packet = make_discover_packet();
        packet[236] = 0;
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_parse_unknown_op() {
        let mut packet = make_discover_packet();
        packet[0] = 7;
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_parse_missing_message_type() {
        let packet = DhcpBuilder::request(1, CLIENT_MAC).hostname("x").build();
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_parse_unknown_message_type() {
        let packet = DhcpBuilder::request(1, CLIENT_MAC)
            .option(options::MESSAGE_TYPE, &[42])
            .build();
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_parse_truncated_option() {
        let mut packet = make_discover_packet();
        packet.truncate(243);
        // message type option, then a hostname claiming 200 bytes
        packet.extend_from_slice(&[options::HOSTNAME, 200, b'a']);
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_parse_missing_end() {
        let mut packet = make_discover_packet();
        packet.truncate(243);
        assert!(DhcpMessage::parse(&packet).is_err());
    }

    #[test]
    fn test_build_offer() {
        let request = DhcpMessage::parse(&make_discover_packet()).unwrap();
        let server_ip = Ipv4Addr::new(192, 168, 1, 1);
        let offer_ip = Ipv4Addr::new(192, 168, 1, 100);

        let offer = DhcpBuilder::reply(&request)
            .message_type(DhcpMessageType::Offer)
            .yiaddr(offer_ip)
            .siaddr(server_ip)
            .server_id(server_ip)
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .router(&[server_ip])
            .dns(&[Ipv4Addr::new(8, 8, 8, 8)])
            .lease_time(86400)
            .build();
        assert!(offer.len() >= 300);

        let msg = DhcpMessage::parse(&offer).unwrap();
        assert_eq!(msg.op, BootpOp::Reply);
        assert_eq!(msg.xid, 0x12345678);
        assert_eq!(msg.yiaddr, offer_ip);
        assert_eq!(msg.message_type, DhcpMessageType::Offer);
        assert_eq!(msg.server_id, Some(server_ip));
        assert_eq!(msg.lease_time, Some(86400));
        assert_eq!(msg.chaddr, request.chaddr);
        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_empty_router_list_omitted() {
        let request = DhcpMessage::parse(&make_discover_packet()).unwrap();
        let nak = DhcpBuilder::reply(&request)
            .message_type(DhcpMessageType::Nak)
            .router(&[])
            .build();
        // message type (3 bytes) then END
        assert_eq!(nak[243], options::END);
    }

    #[test]
    fn test_sniff_accepts_dhcp_frame() {
        let dhcp = make_discover_packet();
        assert!(looks_like_dhcp(&make_frame(&dhcp, DHCP_SERVER_PORT)));
        assert!(looks_like_dhcp(&make_frame(&dhcp, DHCP_CLIENT_PORT)));
    }

    #[test]
    fn test_sniff_rejects_other_port() {
        let dhcp = make_discover_packet();
        assert!(!looks_like_dhcp(&make_frame(&dhcp, 53)));
    }

    #[test]
    fn test_sniff_rejects_missing_cookie() {
        let mut dhcp = make_discover_packet();
        dhcp[239] = 0;
        assert!(!looks_like_dhcp(&make_frame(&dhcp, DHCP_SERVER_PORT)));
    }

    #[test]
    fn test_sniff_rejects_short_frame() {
        let frame = make_frame(&[0u8; 16], DHCP_SERVER_PORT);
        assert!(!looks_like_dhcp(&frame));
    }

    #[test]
    fn test_sniff_with_ip_options() {
        let plain = make_frame(&make_discover_packet(), DHCP_SERVER_PORT);
        let ip = ethernet::HEADER_SIZE;

        // Same datagram behind a 24-byte IPv4 header (three NOPs and EOL)
        let mut frame = plain[..ip + ipv4::MIN_HEADER_SIZE].to_vec();
        frame.extend_from_slice(&[1, 1, 1, 0]);
        frame.extend_from_slice(&plain[ip + ipv4::MIN_HEADER_SIZE..]);
        frame[ip] = 0x46;
        let total = u16::from_be_bytes([frame[ip + 2], frame[ip + 3]]) + 4;
        frame[ip + 2..ip + 4].copy_from_slice(&total.to_be_bytes());
        assert!(looks_like_dhcp(&frame));

        // IHL says 24 bytes but the UDP header and cookie sit at the 20-byte offset
        let mut shifted = plain;
        shifted[ip] = 0x46;
        assert!(!looks_like_dhcp(&shifted));
    }

    #[test]
    fn test_sniff_ignores_option_contents() {
        // A cookie-bearing frame with garbage options still passes the sniff
        let mut dhcp = make_discover_packet();
        dhcp.truncate(240);
        dhcp.extend_from_slice(&[0xEE; 10]);
        let frame = make_frame(&dhcp, DHCP_SERVER_PORT);
        assert!(looks_like_dhcp(&frame));
        assert!(DhcpMessage::parse(&dhcp).is_err());
    }
}
