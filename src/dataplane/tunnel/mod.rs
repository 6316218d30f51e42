//! Overlay tunnel subsystem
//!
//! One [`TunnelDevice`] exists per VNI while at least one interface is a
//! member. Each device owns a forwarding database (inner MAC to remote
//! endpoints) and a neighbor cache (inner IP to inner MAC), both bucketed
//! with per-bucket reader/writer locks.

pub mod device;
pub mod encap;
pub mod fdb;
pub mod neighbor;
pub mod table;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

use crate::{Error, Result};
pub use device::{TunnelDevice, TunnelInfo};
pub use encap::{source_port, Vtep};
pub use fdb::{FdbEntryInfo, ForwardingDb, RemoteEndpoint};
pub use neighbor::{TunnelNeighborInfo, TunnelNeighbors};

pub const DEFAULT_MAX_TUNNELS: usize = 20480;

/// Tunnel devices by VNI
#[derive(Debug)]
pub struct TunnelRegistry {
    devices: RwLock<HashMap<u32, Arc<TunnelDevice>>>,
    max_tunnels: usize,
    max_members: usize,
    max_fdb_entries: usize,
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_TUNNELS,
            device::DEFAULT_MAX_MEMBERS,
            fdb::DEFAULT_MAX_ENTRIES,
        )
    }
}

impl TunnelRegistry {
    pub fn new(max_tunnels: usize, max_members: usize, max_fdb_entries: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            max_tunnels,
            max_members,
            max_fdb_entries,
        }
    }

    pub fn get(&self, vni: u32) -> Option<Arc<TunnelDevice>> {
        self.devices.read().unwrap().get(&vni).cloned()
    }

    /// Device for `vni`, or `NotFound`.
    pub fn require(&self, vni: u32) -> Result<Arc<TunnelDevice>> {
        self.get(vni)
            .ok_or_else(|| Error::NotFound(format!("tunnel device VNI {}", vni)))
    }

    /// Add `interface` to the device for `vni`, creating it on first join.
    pub fn join(&self, vni: u32, interface: &str) -> Result<Arc<TunnelDevice>> {
        let mut devices = self.devices.write().unwrap();
        let device = match devices.get(&vni) {
            Some(dev) => Arc::clone(dev),
            None => {
                if devices.len() >= self.max_tunnels {
                    return Err(Error::ResourceExhausted(format!(
                        "{} tunnel devices exist",
                        self.max_tunnels
                    )));
                }
                let dev = Arc::new(TunnelDevice::new(vni, self.max_members, self.max_fdb_entries));
                devices.insert(vni, Arc::clone(&dev));
                info!(vni, "tunnel device created");
                dev
            }
        };
        if let Err(e) = device.join(interface) {
            if device.member_count() == 0 {
                devices.remove(&vni);
            }
            return Err(e);
        }
        Ok(device)
    }

    /// Remove `interface` from its device; the last member destroys it.
    ///
    /// Returns true if the device was destroyed.
    pub fn leave(&self, vni: u32, interface: &str, drain_timeout: Duration) -> Result<bool> {
        let device = self.require(vni)?;
        if device.leave(interface)? > 0 {
            return Ok(false);
        }
        self.devices.write().unwrap().remove(&vni);
        device.drain(drain_timeout);
        info!(vni, "tunnel device destroyed");
        Ok(true)
    }

    pub fn list(&self) -> Vec<TunnelInfo> {
        let mut out: Vec<TunnelInfo> = self
            .devices
            .read()
            .unwrap()
            .values()
            .map(|d| d.info())
            .collect();
        out.sort_by_key(|t| t.vni);
        out
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
