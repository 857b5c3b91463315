//! Configuration validation

use super::types::{DEFAULT_MTU, DEFAULT_QUERY_TIMEOUT_SECS};
use super::Config;
use crate::dataplane::{prefix_mask, DEFAULT_LEASE_TIME};
use crate::protocol::dhcp::{DHCP_HEADER_SIZE, MAGIC_COOKIE};
use crate::protocol::{ipv4, udp, MacAddr};
use crate::telemetry::is_known_level;
use std::net::Ipv4Addr;

const MIN_MTU: u16 = 576;
const MAX_MTU: u16 = 9000;
const MAX_DOMAIN_LEN: usize = 253;
const REPLY_OVERHEAD: usize = ipv4::MIN_HEADER_SIZE + udp::HEADER_SIZE;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let subnet = validate_interface(config, &mut result);
    if let Some((ip, prefix_len)) = subnet {
        validate_dhcp(config, ip, prefix_len, &mut result);
    }
    validate_dns(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, prefix_len: u8) -> bool {
    let mask = u32::from(prefix_mask(prefix_len));
    u32::from(a) & mask == u32::from(b) & mask
}

/// Returns the interface address and prefix when they parse
fn validate_interface(config: &Config, result: &mut ValidationResult) -> Option<(Ipv4Addr, u8)> {
    let iface = &config.interface;

    if iface.name.trim().is_empty() {
        result.error("interface.name: must not be empty");
    }

    match iface.mtu {
        None => result.warn(format!(
            "interface.mtu: not specified, using default {}",
            DEFAULT_MTU
        )),
        Some(mtu) if !(MIN_MTU..=MAX_MTU).contains(&mtu) => result.error(format!(
            "interface.mtu: {} outside {}..={}",
            mtu, MIN_MTU, MAX_MTU
        )),
        Some(_) => {}
    }

    if let Err(e) = iface.mac_addr() {
        result.error(format!("interface.mac: {}", e));
    }

    let (ip, prefix_len) = match iface.cidr() {
        Ok(cidr) => cidr,
        Err(e) => {
            result.error(format!("interface.address: {}", e));
            return None;
        }
    };
    if !(1..=30).contains(&prefix_len) {
        result.error(format!(
            "interface.address: prefix length {} outside 1..=30",
            prefix_len
        ));
        return None;
    }

    match iface.gateway_addr() {
        Ok(Some(gateway)) if gateway == ip => {
            result.error("interface.gateway: equals the interface address")
        }
        Ok(Some(gateway)) if !same_subnet(gateway, ip, prefix_len) => result.error(format!(
            "interface.gateway: {} is not in {}/{}",
            gateway, ip, prefix_len
        )),
        Ok(_) => {}
        Err(e) => result.error(format!("interface.gateway: {}", e)),
    }

    Some((ip, prefix_len))
}

fn validate_dhcp(config: &Config, ip: Ipv4Addr, prefix_len: u8, result: &mut ValidationResult) {
    let dhcp = &config.dhcp;

    if dhcp.range_start.is_none() || dhcp.range_end.is_none() {
        let (start, end) = dhcp.range(ip);
        result.warn(format!(
            "dhcp: range not fully specified, using {} - {}",
            start, end
        ));
    }
    if dhcp.lease_time.is_none() {
        result.warn(format!(
            "dhcp.lease_time: not specified, using default {}",
            DEFAULT_LEASE_TIME
        ));
    }

    let (start, end) = dhcp.range(ip);
    if start > end {
        result.error(format!(
            "dhcp: invalid range - start ({}) > end ({})",
            start, end
        ));
    }
    for (field, addr) in [("range_start", start), ("range_end", end)] {
        if !same_subnet(addr, ip, prefix_len) {
            result.error(format!(
                "dhcp.{}: {} is not in {}/{}",
                field, addr, ip, prefix_len
            ));
        }
    }
    if start <= ip && ip <= end {
        result.warn(format!(
            "dhcp: interface address {} lies inside the pool and will be skipped",
            ip
        ));
    }

    if dhcp.lease_time == Some(0) {
        result.error("dhcp.lease_time: must be greater than 0");
    }

    if let Some(domain) = &dhcp.domain {
        if domain.len() > MAX_DOMAIN_LEN {
            result.error(format!(
                "dhcp.domain: {} bytes, longer than {}",
                domain.len(),
                MAX_DOMAIN_LEN
            ));
        }
    }

    // Zero MAC: only option sizes matter here
    if let Ok(runtime) = config.dhcp_config(MacAddr::ZERO) {
        let budget = config
            .interface
            .mtu()
            .saturating_sub(REPLY_OVERHEAD + DHCP_HEADER_SIZE + MAGIC_COOKIE.len());
        let needed = runtime.reply_options_len();
        if needed > budget {
            result.error(format!(
                "dhcp: reply options need {} bytes, MTU {} leaves {}",
                needed,
                config.interface.mtu(),
                budget
            ));
        }
    }
}

fn validate_dns(config: &Config, result: &mut ValidationResult) {
    let dns = &config.dns;

    if let Some(upstream) = dns.upstream {
        if upstream.is_unspecified() {
            result.error("dns.upstream: must not be 0.0.0.0");
        }
    }
    if dns.query_timeout.is_none() && dns.upstream.is_some() {
        result.warn(format!(
            "dns.query_timeout: not specified, using default {}s",
            DEFAULT_QUERY_TIMEOUT_SECS
        ));
    }

    for (name, addr) in &dns.hosts {
        if addr.trim().parse::<Ipv4Addr>().is_err() {
            result.error(format!(
                "dns.hosts.{}: '{}' is not an IPv4 address",
                name, addr
            ));
        }
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
}
