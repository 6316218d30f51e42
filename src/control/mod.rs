//! Control plane
//!
//! `Controller` is the single entry point for configuration changes. The
//! TCP server and the config loader both drive it; mutations are
//! serialized by one control lock while packet workers keep reading the
//! datapath concurrently.

pub mod codec;
pub mod message;
pub mod server;

pub use message::{Request, Response};
pub use server::{ControlClient, ControlServer};

use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::dataplane::interface::{Interface, InterfaceInfo, InterfaceKind, InterfaceSpec};
use crate::dataplane::rules::{FilterRuleSpec, NatRuleSpec};
use crate::dataplane::tunnel::{FdbEntryInfo, RemoteEndpoint, TunnelNeighborInfo};
use crate::dataplane::{
    Datapath, Namespace, NamespaceInfo, NeighborInfo, Route, RouteSpec, RuleList, RuleTableKind,
};
use crate::protocol::{Ipv4Cidr, MacAddr};
use crate::{Error, Result};

const MAX_NAMESPACE_NAME: usize = 64;

/// Applies control operations to a shared datapath.
#[derive(Debug)]
pub struct Controller {
    datapath: Arc<Datapath>,
    lock: Mutex<()>,
}

impl Controller {
    pub fn new(datapath: Arc<Datapath>) -> Self {
        Self {
            datapath,
            lock: Mutex::new(()),
        }
    }

    pub fn datapath(&self) -> &Arc<Datapath> {
        &self.datapath
    }

    /// Run one request and build its response.
    pub fn handle(&self, request: Request) -> Response {
        let op = request.op();
        let result = self.dispatch(request);
        match result {
            Ok(None) => Response::success(),
            Ok(Some(payload)) => Response::with_payload(payload),
            Err(e) => {
                debug!(op, error = %e, "control request failed");
                Response::from(&e)
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Option<serde_json::Value>> {
        match request {
            Request::CreateNamespace { name } => self.create_namespace(&name).map(|_| None),
            Request::DeleteNamespace { name } => self.delete_namespace(&name).map(|_| None),
            Request::ListNamespaces => payload(self.list_namespaces()),
            Request::ShowNamespace { name } => payload(self.show_namespace(&name)?),
            Request::AddInterface { namespace, interface } => {
                self.add_interface(&namespace, interface).map(|_| None)
            }
            Request::DeleteInterface { namespace, name } => {
                self.delete_interface(&namespace, &name).map(|_| None)
            }
            Request::ShowInterfaces { namespace } => payload(self.show_interfaces(&namespace)?),
            Request::AddRoute { namespace, route } => payload(self.add_route(&namespace, &route)?),
            Request::DeleteRoute { namespace, destination } => {
                payload(self.delete_route(&namespace, destination)?)
            }
            Request::ShowRoutes { namespace } => payload(self.show_routes(&namespace)?),
            Request::AddFilterRule { namespace, rule } => {
                payload(RuleId::new(self.add_filter_rule(&namespace, rule)?))
            }
            Request::AddNatRule { namespace, rule } => {
                payload(RuleId::new(self.add_nat_rule(&namespace, rule)?))
            }
            Request::DeleteFilterRule { namespace, rule_id } => {
                self.delete_filter_rule(&namespace, rule_id).map(|_| None)
            }
            Request::DeleteNatRule { namespace, rule_id } => {
                self.delete_nat_rule(&namespace, rule_id).map(|_| None)
            }
            Request::ShowRules { namespace, table } => payload(self.show_rules(&namespace, table)?),
            Request::FlushRules { namespace, table } => {
                payload(self.flush_rules(&namespace, table)?)
            }
            Request::AddForwardingEntry { vni, mac, remote } => {
                self.add_forwarding_entry(vni, mac, remote).map(|_| None)
            }
            Request::DeleteForwardingEntry { vni, mac, remote } => {
                self.delete_forwarding_entry(vni, mac, remote).map(|_| None)
            }
            Request::ShowForwarding { vni } => payload(self.show_forwarding(vni)?),
            Request::AddNeighborEntry { vni, ip, mac } => {
                self.add_neighbor_entry(vni, ip, mac).map(|_| None)
            }
            Request::DeleteNeighborEntry { vni, ip, mac } => {
                self.delete_neighbor_entry(vni, ip, mac).map(|_| None)
            }
            Request::ShowNeighbors { vni } => payload(self.show_neighbors(vni)?),
            Request::AddArpEntry { namespace, ip, mac } => {
                self.add_arp_entry(&namespace, ip, mac).map(|_| None)
            }
            Request::DeleteArpEntry { namespace, ip } => {
                self.delete_arp_entry(&namespace, ip).map(|_| None)
            }
            Request::ShowArpEntries { namespace } => payload(self.show_arp_entries(&namespace)?),
            Request::AddFloatingIp { namespace, interface, ip } => {
                self.add_floating_ip(&namespace, &interface, ip).map(|_| None)
            }
            Request::DeleteFloatingIp { ip } => self.delete_floating_ip(ip).map(|_| None),
        }
    }

    // ========================================================================
    // Namespaces
    // ========================================================================

    pub fn create_namespace(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAMESPACE_NAME {
            return Err(Error::InvalidArgument(format!(
                "namespace name {:?} must be 1-{} characters",
                name, MAX_NAMESPACE_NAME
            )));
        }
        let _lock = self.lock.lock().unwrap();
        let ns = Namespace::new(name, self.datapath.limits());
        self.datapath.insert_namespace(Arc::new(ns))?;
        info!(namespace = %name, "namespace created");
        Ok(())
    }

    /// Detach every interface, then drop the namespace.
    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.remove_namespace(name)?;
        for iface in ns.interfaces() {
            if let Err(e) = self.detach(&ns, &iface.name) {
                warn!(namespace = %name, interface = %iface.name, error = %e, "detach failed");
            }
        }
        info!(namespace = %name, "namespace deleted");
        Ok(())
    }

    pub fn list_namespaces(&self) -> Vec<String> {
        self.datapath.namespace_names()
    }

    pub fn show_namespace(&self, name: &str) -> Result<NamespaceInfo> {
        Ok(self.datapath.require_namespace(name)?.info())
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    /// Attach a new interface.
    ///
    /// Registration order is router-wide name, tunnel membership or
    /// external address, then namespace routes; a failure unwinds the
    /// steps already taken.
    pub fn add_interface(&self, namespace: &str, spec: InterfaceSpec) -> Result<()> {
        spec.validate()?;
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        let iface = Arc::new(Interface::new(namespace, spec));

        self.datapath.register_interface(Arc::clone(&iface))?;
        if let Err(e) = self.link_interface(&iface) {
            self.datapath.unregister_interface(&iface.name);
            return Err(e);
        }
        if let Err(e) = ns.attach(Arc::clone(&iface)) {
            self.unlink_interface(&iface);
            self.datapath.unregister_interface(&iface.name);
            return Err(e);
        }

        info!(
            namespace = %namespace,
            interface = %iface.name,
            kind = %iface.kind,
            address = %iface.address,
            "interface added"
        );
        Ok(())
    }

    pub fn delete_interface(&self, namespace: &str, name: &str) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        self.detach(&ns, name)
    }

    pub fn show_interfaces(&self, namespace: &str) -> Result<Vec<InterfaceInfo>> {
        let ns = self.datapath.require_namespace(namespace)?;
        Ok(ns.interfaces().iter().map(|iface| iface.info()).collect())
    }

    /// Join the tunnel device or claim the external address.
    fn link_interface(&self, iface: &Interface) -> Result<()> {
        match iface.kind {
            InterfaceKind::Tunnel { vni } => self.datapath.tunnels.join(vni, &iface.name).map(|_| ()),
            InterfaceKind::Physical => self.datapath.external.add(iface.ip(), &iface.name),
        }
    }

    fn unlink_interface(&self, iface: &Interface) {
        match iface.kind {
            InterfaceKind::Tunnel { vni } => {
                let timeout = self.datapath.limits().drain_timeout();
                if let Err(e) = self.datapath.tunnels.leave(vni, &iface.name, timeout) {
                    warn!(interface = %iface.name, vni, error = %e, "tunnel leave failed");
                }
            }
            InterfaceKind::Physical => self.datapath.external.remove_interface(&iface.name),
        }
    }

    /// Unlink, drain and remove one interface. Caller holds the lock.
    fn detach(&self, ns: &Namespace, name: &str) -> Result<()> {
        let iface = ns.take_interface(name)?;
        self.datapath.unregister_interface(name);
        if iface.is_physical() {
            self.datapath.external.remove_interface(name);
        }
        iface.drain(self.datapath.limits().drain_timeout());

        let routes = ns.remove_interface_routes(&iface);
        if let InterfaceKind::Tunnel { .. } = iface.kind {
            self.unlink_interface(&iface);
        }
        let removed = routes?;
        info!(
            namespace = %ns.name,
            interface = %name,
            routes_removed = removed.len(),
            "interface deleted"
        );
        Ok(())
    }

    // ========================================================================
    // Routes
    // ========================================================================

    pub fn add_route(&self, namespace: &str, spec: &RouteSpec) -> Result<Route> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        ns.add_route(spec, &self.datapath.tunnels)
    }

    /// Delete a static route; returns it and every route removed with it.
    pub fn delete_route(&self, namespace: &str, destination: Ipv4Cidr) -> Result<Vec<Route>> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        ns.delete_route(destination)
    }

    pub fn show_routes(&self, namespace: &str) -> Result<Vec<Route>> {
        let ns = self.datapath.require_namespace(namespace)?;
        let routes = ns.routes().routes();
        Ok(routes)
    }

    // ========================================================================
    // Rules
    // ========================================================================

    pub fn add_filter_rule(&self, namespace: &str, rule: FilterRuleSpec) -> Result<u64> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.require_namespace(namespace)?.add_filter_rule(rule)
    }

    pub fn add_nat_rule(&self, namespace: &str, rule: NatRuleSpec) -> Result<u64> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.require_namespace(namespace)?.add_nat_rule(rule)
    }

    pub fn delete_filter_rule(&self, namespace: &str, rule_id: u64) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.require_namespace(namespace)?.delete_filter_rule(rule_id)
    }

    pub fn delete_nat_rule(&self, namespace: &str, rule_id: u64) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.require_namespace(namespace)?.delete_nat_rule(rule_id)
    }

    pub fn show_rules(&self, namespace: &str, table: RuleTableKind) -> Result<RuleList> {
        Ok(self.datapath.require_namespace(namespace)?.show_rules(table))
    }

    /// Remove every rule of `table`, returning how many were removed.
    pub fn flush_rules(&self, namespace: &str, table: RuleTableKind) -> Result<usize> {
        let _lock = self.lock.lock().unwrap();
        Ok(self.datapath.require_namespace(namespace)?.flush_rules(table))
    }

    // ========================================================================
    // Tunnel forwarding database and neighbors
    // ========================================================================

    pub fn add_forwarding_entry(&self, vni: u32, mac: MacAddr, remote: RemoteEndpoint) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.tunnels.require(vni)?.fdb.add(mac, remote)?;
        info!(vni, %mac, %remote, "forwarding entry added");
        Ok(())
    }

    pub fn delete_forwarding_entry(
        &self,
        vni: u32,
        mac: MacAddr,
        remote: Option<RemoteEndpoint>,
    ) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.tunnels.require(vni)?.fdb.delete(mac, remote)?;
        info!(vni, %mac, "forwarding entry deleted");
        Ok(())
    }

    pub fn show_forwarding(&self, vni: u32) -> Result<Vec<FdbEntryInfo>> {
        Ok(self.datapath.tunnels.require(vni)?.fdb.list())
    }

    pub fn add_neighbor_entry(&self, vni: u32, ip: Ipv4Addr, mac: MacAddr) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.tunnels.require(vni)?.neighbors.add(ip, mac)?;
        info!(vni, %ip, %mac, "tunnel neighbor added");
        Ok(())
    }

    pub fn delete_neighbor_entry(&self, vni: u32, ip: Ipv4Addr, mac: Option<MacAddr>) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        self.datapath.tunnels.require(vni)?.neighbors.delete(ip, mac)?;
        info!(vni, %ip, "tunnel neighbor deleted");
        Ok(())
    }

    pub fn show_neighbors(&self, vni: u32) -> Result<Vec<TunnelNeighborInfo>> {
        Ok(self.datapath.tunnels.require(vni)?.neighbors.list())
    }

    // ========================================================================
    // Underlay ARP
    // ========================================================================

    pub fn add_arp_entry(&self, namespace: &str, ip: Ipv4Addr, mac: MacAddr) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        ns.neighbors.add_static(ip, mac)?;
        info!(namespace = %namespace, %ip, %mac, "arp entry added");
        Ok(())
    }

    pub fn delete_arp_entry(&self, namespace: &str, ip: Ipv4Addr) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        ns.neighbors.delete(ip)?;
        info!(namespace = %namespace, %ip, "arp entry deleted");
        Ok(())
    }

    pub fn show_arp_entries(&self, namespace: &str) -> Result<Vec<NeighborInfo>> {
        let ns = self.datapath.require_namespace(namespace)?;
        ns.neighbors.refresh_states();
        Ok(ns.neighbors.list())
    }

    // ========================================================================
    // Floating IPs
    // ========================================================================

    pub fn add_floating_ip(&self, namespace: &str, interface: &str, ip: Ipv4Addr) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let ns = self.datapath.require_namespace(namespace)?;
        let iface = ns.interface(interface).ok_or_else(|| {
            Error::NotFound(format!("interface {} in namespace {}", interface, namespace))
        })?;
        if !iface.is_physical() {
            return Err(Error::InvalidArgument(format!(
                "floating IPs need a physical interface; {} is {}",
                interface, iface.kind
            )));
        }
        self.datapath.external.add(ip, interface)?;
        iface.add_floating_ip(ip);
        info!(namespace = %namespace, interface = %interface, %ip, "floating ip added");
        Ok(())
    }

    pub fn delete_floating_ip(&self, ip: Ipv4Addr) -> Result<()> {
        let _lock = self.lock.lock().unwrap();
        let owner = self
            .datapath
            .external
            .owner(ip)
            .ok_or_else(|| Error::NotFound(format!("floating ip {}", ip)))?;
        let iface = self.datapath.interface(&owner);
        if iface.as_ref().is_some_and(|iface| iface.ip() == ip) {
            return Err(Error::InvalidArgument(format!(
                "{} is the address of {}, not a floating ip",
                ip, owner
            )));
        }
        self.datapath.external.remove(ip)?;
        if let Some(iface) = iface {
            iface.remove_floating_ip(ip);
        }
        info!(interface = %owner, %ip, "floating ip deleted");
        Ok(())
    }
}

/// Payload of AddFilterRule and AddNatRule
#[derive(Debug, Serialize)]
struct RuleId {
    rule_id: u64,
}

impl RuleId {
    fn new(rule_id: u64) -> Self {
        Self { rule_id }
    }
}

fn payload<T: Serialize>(value: T) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| Error::Internal(e.to_string()))
}
