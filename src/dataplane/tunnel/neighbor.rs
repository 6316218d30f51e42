//! Overlay neighbor cache (inner IPv4 to inner MAC) of one tunnel device

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::table::{BucketTable, DEFAULT_BUCKETS};
use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Tunnel neighbor as reported by ShowNeighbors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelNeighborInfo {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

#[derive(Debug)]
pub struct TunnelNeighbors {
    table: BucketTable<Ipv4Addr, MacAddr>,
}

impl Default for TunnelNeighbors {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelNeighbors {
    pub fn new() -> Self {
        Self {
            table: BucketTable::new(DEFAULT_BUCKETS),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn add(&self, ip: Ipv4Addr, mac: MacAddr) -> Result<()> {
        if ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
            return Err(Error::InvalidArgument(format!("{} is not a unicast address", ip)));
        }
        if !mac.is_unicast() || mac.is_zero() {
            return Err(Error::InvalidArgument(format!("{} is not a unicast MAC", mac)));
        }
        let mut bucket = self.table.lock(&ip);
        if let Some(existing) = bucket.get(&ip) {
            return Err(Error::AlreadyExists(format!("neighbor {} is {}", ip, existing)));
        }
        bucket.insert(ip, mac);
        Ok(())
    }

    /// Remove `ip`; when `mac` is given it must match the stored entry.
    pub fn delete(&self, ip: Ipv4Addr, mac: Option<MacAddr>) -> Result<()> {
        let mut bucket = self.table.lock(&ip);
        let stored = bucket.get(&ip).copied();
        match (stored, mac) {
            (None, _) => Err(Error::NotFound(format!("neighbor {}", ip))),
            (Some(stored), Some(mac)) if stored != mac => {
                Err(Error::NotFound(format!("neighbor {} with {}", ip, mac)))
            }
            _ => {
                bucket.remove(&ip);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.table.get(&ip)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.table.contains(&ip)
    }

    pub fn list(&self) -> Vec<TunnelNeighborInfo> {
        let mut out: Vec<TunnelNeighborInfo> = self
            .table
            .entries()
            .into_iter()
            .map(|(ip, mac)| TunnelNeighborInfo { ip, mac })
            .collect();
        out.sort_by_key(|n| n.ip);
        out
    }
}
