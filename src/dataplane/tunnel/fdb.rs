//! Overlay forwarding database (inner MAC to remote tunnel endpoints)
//!
//! A unicast MAC maps to one remote endpoint. Broadcast and multicast MACs
//! map to a list of endpoints that each receive a copy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use super::table::{BucketTable, DEFAULT_BUCKETS};
use crate::protocol::vxlan::DEFAULT_PORT;
use crate::protocol::MacAddr;
use crate::{Error, Result};

pub const DEFAULT_MAX_ENTRIES: usize = 10000;

/// Remote tunnel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub ip: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Tunnel id carried toward this endpoint
    pub vni: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} vni {}", self.ip, self.port, self.vni)
    }
}

/// FDB entry as reported by ShowForwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdbEntryInfo {
    pub mac: MacAddr,
    pub remotes: Vec<RemoteEndpoint>,
}

#[derive(Debug)]
pub struct ForwardingDb {
    table: BucketTable<MacAddr, Vec<RemoteEndpoint>>,
    max_entries: usize,
}

impl Default for ForwardingDb {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ForwardingDb {
    pub fn new(max_entries: usize) -> Self {
        Self {
            table: BucketTable::new(DEFAULT_BUCKETS),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Add `remote` for `mac`.
    ///
    /// Broadcast/multicast MACs accumulate remotes; a unicast MAC has its
    /// remote replaced. Re-adding an identical remote is `AlreadyExists`.
    pub fn add(&self, mac: MacAddr, remote: RemoteEndpoint) -> Result<()> {
        if mac.is_zero() {
            return Err(Error::InvalidArgument("all-zero MAC".into()));
        }
        if remote.ip.is_unspecified() || remote.ip.is_multicast() || remote.port == 0 {
            return Err(Error::InvalidArgument(format!("bad remote endpoint {}", remote)));
        }

        let mut bucket = self.table.lock(&mac);
        match bucket.get(&mac).cloned() {
            Some(remotes) if remotes.contains(&remote) => Err(Error::AlreadyExists(format!(
                "FDB entry {} -> {}",
                mac, remote
            ))),
            Some(mut remotes) => {
                let updated = if mac.is_multicast() {
                    remotes.push(remote);
                    remotes
                } else {
                    vec![remote]
                };
                bucket.insert(mac, updated);
                Ok(())
            }
            None => {
                if self.table.len() >= self.max_entries {
                    return Err(Error::ResourceExhausted(format!(
                        "FDB full ({} entries)",
                        self.max_entries
                    )));
                }
                bucket.insert(mac, vec![remote]);
                Ok(())
            }
        }
    }

    /// Remove one remote of `mac`, or the whole entry when `remote` is `None`.
    pub fn delete(&self, mac: MacAddr, remote: Option<RemoteEndpoint>) -> Result<()> {
        let mut bucket = self.table.lock(&mac);
        let remotes = bucket
            .get(&mac)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("FDB entry {}", mac)))?;
        let Some(remote) = remote else {
            bucket.remove(&mac);
            return Ok(());
        };
        if !remotes.contains(&remote) {
            return Err(Error::NotFound(format!("FDB entry {} -> {}", mac, remote)));
        }
        let rest: Vec<RemoteEndpoint> = remotes.into_iter().filter(|r| *r != remote).collect();
        if rest.is_empty() {
            bucket.remove(&mac);
        } else {
            bucket.insert(mac, rest);
        }
        Ok(())
    }

    /// Remote endpoints for `mac`, first one first.
    pub fn lookup(&self, mac: MacAddr) -> Option<Vec<RemoteEndpoint>> {
        self.table.get(&mac)
    }

    pub fn list(&self) -> Vec<FdbEntryInfo> {
        let mut out: Vec<FdbEntryInfo> = self
            .table
            .entries()
            .into_iter()
            .map(|(mac, remotes)| FdbEntryInfo { mac, remotes })
            .collect();
        out.sort_by_key(|e| e.mac.0);
        out
    }
}
