//! Configuration types

use crate::dataplane::{
    default_range, normalize_name, DhcpConfig, DnsStubConfig, InterfaceInfo, DEFAULT_LEASE_TIME,
    DEFAULT_OFFER_TIMEOUT,
};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_MTU: u16 = 1500;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

/// Contents of lanstub.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub dhcp: DhcpServerConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    /// "a.b.c.d/len"
    pub address: String,
    pub gateway: Option<String>,
    /// Read from the interface when absent
    pub mac: Option<String>,
    pub mtu: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DhcpServerConfig {
    pub range_start: Option<Ipv4Addr>,
    pub range_end: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub offer_timeout: Option<u32>,
    /// Defaults to the interface address
    pub dns_servers: Option<Vec<Ipv4Addr>>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsConfig {
    pub upstream: Option<Ipv4Addr>,
    /// Seconds
    pub query_timeout: Option<u64>,
    #[serde(default)]
    pub hosts: HashMap<String, String>,
}

/// Parse "a.b.c.d/len"
pub fn parse_cidr(s: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, len) = s
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("'{}' is missing a prefix length", s)))?;
    let addr: Ipv4Addr = addr
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("'{}' is not an IPv4 address", addr)))?;
    let len: u8 = len
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("'{}' is not a prefix length", len)))?;
    if len > 32 {
        return Err(Error::Config(format!("prefix length {} exceeds 32", len)));
    }
    Ok((addr, len))
}

impl InterfaceConfig {
    pub fn cidr(&self) -> Result<(Ipv4Addr, u8)> {
        parse_cidr(&self.address)
    }

    pub fn gateway_addr(&self) -> Result<Option<Ipv4Addr>> {
        self.gateway
            .as_deref()
            .map(|gw| {
                gw.trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("gateway '{}' is not an IPv4 address", gw)))
            })
            .transpose()
    }

    pub fn mac_addr(&self) -> Result<Option<MacAddr>> {
        self.mac
            .as_deref()
            .map(|mac| mac.parse().map_err(|e| Error::Config(format!("{}", e))))
            .transpose()
    }

    pub fn mtu(&self) -> usize {
        self.mtu.unwrap_or(DEFAULT_MTU) as usize
    }
}

impl DhcpServerConfig {
    /// Configured pool, or the .100 - .254 default around `ip`
    pub fn range(&self, ip: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
        let (start, end) = default_range(ip);
        (self.range_start.unwrap_or(start), self.range_end.unwrap_or(end))
    }
}

impl DnsConfig {
    pub fn parsed_hosts(&self) -> Result<HashMap<String, Ipv4Addr>> {
        self.hosts
            .iter()
            .map(|(name, addr)| {
                let ip = addr.trim().parse().map_err(|_| {
                    Error::Config(format!("dns.hosts.{}: '{}' is not an IPv4 address", name, addr))
                })?;
                Ok((normalize_name(name), ip))
            })
            .collect()
    }
}

impl Config {
    pub fn interface_info(&self, mac: MacAddr) -> Result<InterfaceInfo> {
        let (ip, prefix_len) = self.interface.cidr()?;
        Ok(InterfaceInfo {
            mac,
            ip,
            prefix_len,
            gateway: self.interface.gateway_addr()?,
            mtu: self.interface.mtu(),
        })
    }

    pub fn dhcp_config(&self, mac: MacAddr) -> Result<DhcpConfig> {
        let (ip, prefix_len) = self.interface.cidr()?;
        let (range_start, range_end) = self.dhcp.range(ip);
        Ok(DhcpConfig {
            interface_ip: ip,
            interface_mac: mac,
            prefix_len,
            range_start,
            range_end,
            routers: self.interface.gateway_addr()?.into_iter().collect(),
            dns_servers: self.dhcp.dns_servers.clone().unwrap_or_else(|| vec![ip]),
            domain_name: self.dhcp.domain.clone(),
            lease_time: self.dhcp.lease_time.unwrap_or(DEFAULT_LEASE_TIME),
            offer_timeout: self.dhcp.offer_timeout.unwrap_or(DEFAULT_OFFER_TIMEOUT),
        })
    }

    pub fn dns_stub_config(&self) -> Result<DnsStubConfig> {
        Ok(DnsStubConfig {
            upstream: self.dns.upstream,
            hosts: self.dns.parsed_hosts()?,
            query_timeout: Duration::from_secs(
                self.dns.query_timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
            ),
            ..DnsStubConfig::default()
        })
    }
}
