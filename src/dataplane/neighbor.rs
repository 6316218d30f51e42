//! Underlay neighbor cache (IPv4 to MAC)
//!
//! Entries added by the control channel are static and never age. Entries
//! learned from received ARP traffic become stale after the reachable time
//! and are evicted after the stale time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::protocol::MacAddr;
use crate::{Error, Result};

pub const REACHABLE_TIME: Duration = Duration::from_secs(30);
pub const STALE_TIME: Duration = Duration::from_secs(120);

/// Neighbor entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborState {
    /// Resolution pending, no usable MAC
    Incomplete,
    Reachable,
    /// Usable but due for refresh
    Stale,
    /// Configured; never ages
    Permanent,
}

#[derive(Debug, Clone)]
struct Entry {
    mac: MacAddr,
    state: NeighborState,
    last_updated: Instant,
}

/// Neighbor entry as reported by ShowArpEntries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub state: NeighborState,
}

/// Per-namespace underlay neighbor cache
#[derive(Debug)]
pub struct NeighborCache {
    entries: RwLock<HashMap<Ipv4Addr, Entry>>,
    reachable_time: Duration,
    stale_time: Duration,
}

impl Default for NeighborCache {
    fn default() -> Self {
        Self::new(REACHABLE_TIME, STALE_TIME)
    }
}

impl NeighborCache {
    pub fn new(reachable_time: Duration, stale_time: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reachable_time,
            stale_time,
        }
    }

    /// Add a permanent entry.
    pub fn add_static(&self, ip: Ipv4Addr, mac: MacAddr) -> Result<()> {
        if !mac.is_unicast() || mac.is_zero() {
            return Err(Error::InvalidArgument(format!("{} is not a unicast MAC", mac)));
        }
        let mut entries = self.entries.write().unwrap();
        if let Some(e) = entries.get(&ip) {
            if e.state == NeighborState::Permanent {
                return Err(Error::AlreadyExists(format!("ARP entry for {}", ip)));
            }
        }
        entries.insert(
            ip,
            Entry {
                mac,
                state: NeighborState::Permanent,
                last_updated: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn delete(&self, ip: Ipv4Addr) -> Result<()> {
        self.entries
            .write()
            .unwrap()
            .remove(&ip)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("ARP entry for {}", ip)))
    }

    /// Learn or refresh a dynamic entry; permanent entries are left alone.
    pub fn learn(&self, ip: Ipv4Addr, mac: MacAddr) {
        if ip.is_unspecified() || !mac.is_unicast() {
            return;
        }
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(&ip) {
            Some(e) if e.state == NeighborState::Permanent => {}
            Some(e) => {
                e.mac = mac;
                e.state = NeighborState::Reachable;
                e.last_updated = Instant::now();
            }
            None => {
                entries.insert(
                    ip,
                    Entry {
                        mac,
                        state: NeighborState::Reachable,
                        last_updated: Instant::now(),
                    },
                );
            }
        }
    }

    /// Mark an address as pending resolution.
    pub fn mark_incomplete(&self, ip: Ipv4Addr) {
        self.entries.write().unwrap().entry(ip).or_insert(Entry {
            mac: MacAddr::ZERO,
            state: NeighborState::Incomplete,
            last_updated: Instant::now(),
        });
    }

    /// Usable MAC for `ip` (reachable, stale or permanent).
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .read()
            .unwrap()
            .get(&ip)
            .filter(|e| e.state != NeighborState::Incomplete)
            .map(|e| e.mac)
    }

    pub fn state(&self, ip: Ipv4Addr) -> Option<NeighborState> {
        self.entries.read().unwrap().get(&ip).map(|e| e.state)
    }

    /// Age dynamic entries relative to `now`.
    pub fn refresh_states_at(&self, now: Instant) {
        let mut entries = self.entries.write().unwrap();
        for entry in entries.values_mut() {
            let age = now.saturating_duration_since(entry.last_updated);
            if entry.state == NeighborState::Reachable && age > self.reachable_time {
                entry.state = NeighborState::Stale;
            }
        }
        entries.retain(|_, e| {
            e.state == NeighborState::Permanent
                || now.saturating_duration_since(e.last_updated) < self.stale_time
        });
    }

    pub fn refresh_states(&self) {
        self.refresh_states_at(Instant::now());
    }

    /// Entries sorted by address.
    pub fn list(&self) -> Vec<NeighborInfo> {
        let mut out: Vec<NeighborInfo> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(ip, e)| NeighborInfo {
                ip: *ip,
                mac: e.mac,
                state: e.state,
            })
            .collect();
        out.sort_by_key(|n| n.ip);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    #[test]
    fn test_static_entry() {
        let cache = NeighborCache::default();
        cache.add_static(IP, MAC).unwrap();
        assert_eq!(cache.lookup(IP), Some(MAC));
        assert_eq!(cache.state(IP), Some(NeighborState::Permanent));
        assert!(matches!(cache.add_static(IP, MAC), Err(Error::AlreadyExists(_))));
        assert!(matches!(
            cache.add_static(Ipv4Addr::new(192, 168, 1, 2), MacAddr::BROADCAST),
            Err(Error::InvalidArgument(_))
        ));

        // Learning never overrides configuration
        cache.learn(IP, MacAddr([0x02, 0, 0, 0, 0, 9]));
        assert_eq!(cache.lookup(IP), Some(MAC));

        cache.delete(IP).unwrap();
        assert!(matches!(cache.delete(IP), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_learn_and_age() {
        let cache = NeighborCache::new(Duration::from_secs(30), Duration::from_secs(120));
        cache.learn(IP, MAC);
        cache.add_static(Ipv4Addr::new(10, 0, 0, 1), MAC).unwrap();
        assert_eq!(cache.state(IP), Some(NeighborState::Reachable));

        let later = Instant::now() + Duration::from_secs(60);
        cache.refresh_states_at(later);
        assert_eq!(cache.state(IP), Some(NeighborState::Stale));
        assert_eq!(cache.lookup(IP), Some(MAC));

        let much_later = Instant::now() + Duration::from_secs(600);
        cache.refresh_states_at(much_later);
        assert_eq!(cache.lookup(IP), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_incomplete_not_usable() {
        let cache = NeighborCache::default();
        cache.mark_incomplete(IP);
        assert_eq!(cache.lookup(IP), None);
        assert_eq!(cache.state(IP), Some(NeighborState::Incomplete));
        cache.learn(IP, MAC);
        assert_eq!(cache.lookup(IP), Some(MAC));
        assert_eq!(cache.list()[0].state, NeighborState::Reachable);
    }
}
