//! Router-wide datapath state and packet entry point

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::trace;

use super::interface::{ExternalAddresses, Interface};
use super::namespace::Namespace;
use super::pipeline::{Transmit, Verdict};
use super::tunnel::{TunnelDevice, TunnelRegistry, Vtep};
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::ethernet::Frame;
use crate::protocol::ipv4::Ipv4Header;
use crate::protocol::{vxlan, EtherType};
use crate::telemetry::Counter;
use crate::{Error, Result};

/// Capacity and timing limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_routes: usize,
    pub max_rules_per_hook: usize,
    pub max_fdb_entries: usize,
    pub max_members_per_tunnel: usize,
    pub max_tunnels: usize,
    pub drain_timeout_ms: u64,
    /// Largest IP packet the FTP gateway may produce
    pub mtu: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_routes: 65536,
            max_rules_per_hook: 10000,
            max_fdb_entries: 10000,
            max_members_per_tunnel: 10240,
            max_tunnels: 20480,
            drain_timeout_ms: 5000,
            mtu: 1500,
        }
    }
}

impl Limits {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Shared state consulted by every packet worker
#[derive(Debug)]
pub struct Datapath {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    /// Interfaces by router-wide unique name
    interfaces: RwLock<HashMap<String, Arc<Interface>>>,
    pub tunnels: TunnelRegistry,
    pub external: ExternalAddresses,
    pub(super) vtep: Vtep,
    uplink: String,
    pub(super) limits: Limits,
    /// Uplink frames that matched no tunnel or external address
    pub unclaimed: Counter,
}

impl Datapath {
    pub fn new(vtep: Vtep, uplink: &str, limits: Limits) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            interfaces: RwLock::new(HashMap::new()),
            tunnels: TunnelRegistry::new(
                limits.max_tunnels,
                limits.max_members_per_tunnel,
                limits.max_fdb_entries,
            ),
            external: ExternalAddresses::new(),
            vtep,
            uplink: uplink.to_string(),
            limits,
            unclaimed: Counter::new(),
        }
    }

    pub fn vtep(&self) -> &Vtep {
        &self.vtep
    }

    pub fn uplink(&self) -> &str {
        &self.uplink
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().unwrap().get(name).cloned()
    }

    pub fn require_namespace(&self, name: &str) -> Result<Arc<Namespace>> {
        self.namespace(name)
            .ok_or_else(|| Error::NotFound(format!("namespace {}", name)))
    }

    pub(crate) fn insert_namespace(&self, ns: Arc<Namespace>) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap();
        if namespaces.contains_key(&ns.name) {
            return Err(Error::AlreadyExists(format!("namespace {}", ns.name)));
        }
        namespaces.insert(ns.name.clone(), ns);
        Ok(())
    }

    pub(crate) fn remove_namespace(&self, name: &str) -> Result<Arc<Namespace>> {
        self.namespaces
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("namespace {}", name)))
    }

    /// Namespace names in sorted order.
    pub fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.read().unwrap().get(name).cloned()
    }

    pub(crate) fn register_interface(&self, iface: Arc<Interface>) -> Result<()> {
        let mut interfaces = self.interfaces.write().unwrap();
        if iface.name == self.uplink || interfaces.contains_key(&iface.name) {
            return Err(Error::AlreadyExists(format!("interface {}", iface.name)));
        }
        interfaces.insert(iface.name.clone(), iface);
        Ok(())
    }

    pub(crate) fn unregister_interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.write().unwrap().remove(name)
    }

    /// Run one frame through the datapath.
    ///
    /// `ingress` is either the VTEP uplink, whose frames are demultiplexed
    /// to a namespace interface first, or the name of an attached
    /// interface. On `Accept` the buffer holds the frame to send on the
    /// returned egress; tunnel egress frames are already encapsulated.
    /// Extra fan-out copies go through `tx`.
    pub fn process(&self, buf: &mut Vec<u8>, ingress: &str, tx: &mut dyn Transmit) -> Verdict {
        let iface = if ingress == self.uplink {
            match self.demux(buf) {
                Some(iface) => iface,
                None => {
                    self.unclaimed.inc();
                    return Verdict::Drop;
                }
            }
        } else {
            match self.interface(ingress) {
                Some(iface) => iface,
                None => {
                    trace!(ingress, "frame on unknown interface");
                    return Verdict::Drop;
                }
            }
        };

        let Some(ns) = self.namespace(&iface.namespace) else {
            return Verdict::Drop;
        };
        let Some(_guard) = iface.acquire() else {
            trace!(interface = %iface.name, "interface draining");
            return Verdict::Drop;
        };
        self.run_pipeline(&ns, &iface, buf, tx)
    }

    /// Pick the interface an uplink frame belongs to, decapsulating
    /// overlay traffic in place.
    fn demux(&self, buf: &mut Vec<u8>) -> Option<Arc<Interface>> {
        match vxlan::classify(buf, self.vtep.udp_port) {
            Ok(Some(enc)) if enc.outer_dst_ip == self.vtep.ip => {
                let Some(device) = self.tunnels.get(enc.vni) else {
                    trace!(vni = enc.vni, "no tunnel device for VNI");
                    return None;
                };
                vxlan::decapsulate(buf, &enc);
                self.tunnel_member(&device, buf)
            }
            Ok(_) => {
                let dst = external_destination(buf)?;
                let owner = self.external.owner(dst);
                if owner.is_none() {
                    trace!(%dst, "no owner for external address");
                }
                self.interface(&owner?)
            }
            Err(e) => {
                trace!(error = %e, "malformed overlay frame");
                None
            }
        }
    }

    /// Member of `device` that an inner frame is addressed to.
    fn tunnel_member(&self, device: &TunnelDevice, inner: &[u8]) -> Option<Arc<Interface>> {
        let eth = Frame::parse(inner).ok()?;
        let dst_mac = eth.dst_mac();
        let arp_target = if dst_mac.is_broadcast() && eth.is_arp() {
            ArpPacket::parse(eth.payload())
                .ok()
                .filter(|arp| arp.operation == ArpOp::Request)
                .map(|arp| arp.target_ip)
        } else {
            None
        };

        device
            .members()
            .iter()
            .filter_map(|name| self.interface(name))
            .find(|iface| match arp_target {
                Some(target) => iface.ip() == target,
                None => iface.mac == dst_mac,
            })
    }
}

/// IPv4 destination, or ARP target, of a frame.
fn external_destination(frame: &[u8]) -> Option<Ipv4Addr> {
    let eth = Frame::parse(frame).ok()?;
    match EtherType::from_u16(eth.ethertype()) {
        Some(EtherType::Ipv4) => Ipv4Header::parse(eth.payload()).ok().map(|ip| ip.dst_addr()),
        Some(EtherType::Arp) => ArpPacket::parse(eth.payload()).ok().map(|arp| arp.target_ip),
        _ => None,
    }
}
