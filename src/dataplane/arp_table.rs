//! ARP table (IP to MAC mapping)
//!
//! Times are clock seconds from [`super::Clock`], passed in by the caller.

use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Seconds an unanswered request is remembered before a new one may be sent
pub const INCOMPLETE_TIMEOUT_SECS: u64 = 3;

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    /// Request sent, no reply yet
    Incomplete,
    Reachable,
    /// Still usable, but older than the reachable time
    Stale,
}

#[derive(Debug, Clone)]
struct ArpEntry {
    mac: MacAddr,
    state: ArpState,
    updated_at: u64,
}

#[derive(Debug, Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    reachable_secs: u64,
    stale_secs: u64,
}

impl ArpTable {
    pub fn new(reachable_secs: u64, stale_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            reachable_secs,
            stale_secs,
        }
    }

    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, now: u64) {
        self.entries.insert(
            ip,
            ArpEntry {
                mac,
                state: ArpState::Reachable,
                updated_at: now,
            },
        );
    }

    /// Usable MAC for `ip`; incomplete entries resolve to nothing
    pub fn lookup(&self, ip: &Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .get(ip)
            .filter(|e| e.state != ArpState::Incomplete)
            .map(|e| e.mac)
    }

    pub fn state(&self, ip: &Ipv4Addr) -> Option<ArpState> {
        self.entries.get(ip).map(|e| e.state)
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.entries.contains_key(ip)
    }

    /// Record that a request is outstanding for `ip`.
    ///
    /// Returns false if one was already outstanding, so the caller sends at
    /// most one request per resolution.
    pub fn mark_incomplete(&mut self, ip: Ipv4Addr, now: u64) -> bool {
        match self.entries.get(&ip) {
            Some(e) if e.state == ArpState::Incomplete => false,
            _ => {
                self.entries.insert(
                    ip,
                    ArpEntry {
                        mac: MacAddr::ZERO,
                        state: ArpState::Incomplete,
                        updated_at: now,
                    },
                );
                true
            }
        }
    }

    /// Age entries: reachable becomes stale, anything older than the
    /// stale time is dropped, and unanswered requests expire
    pub fn refresh_states(&mut self, now: u64) {
        let (reachable, stale) = (self.reachable_secs, self.stale_secs);
        for entry in self.entries.values_mut() {
            if entry.state == ArpState::Reachable && now.saturating_sub(entry.updated_at) > reachable
            {
                entry.state = ArpState::Stale;
            }
        }
        self.entries.retain(|_, e| {
            let age = now.saturating_sub(e.updated_at);
            match e.state {
                ArpState::Incomplete => age < INCOMPLETE_TIMEOUT_SECS,
                _ => age < stale,
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
