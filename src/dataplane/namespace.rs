//! Tenant namespace: one route table, one set of rule tables, an underlay
//! neighbor cache and the interfaces attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::interface::{Interface, InterfaceKind};
use super::neighbor::NeighborCache;
use super::route::{Route, RouteClass, RouteKey, RouteTable};
use super::rules::{
    FilterRuleInfo, FilterRuleSpec, FilterTable, NatRuleInfo, NatRuleSpec, NatTable, RuleTableKind,
};
use super::tunnel::TunnelRegistry;
use super::Limits;
use crate::protocol::Ipv4Cidr;
use crate::telemetry::NamespaceStats;
use crate::{Error, Result};

/// Static route request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub destination: Ipv4Cidr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// Rules of one table as returned by ShowRules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "rules", rename_all = "snake_case")]
pub enum RuleList {
    Filter(Vec<FilterRuleInfo>),
    Nat(Vec<NatRuleInfo>),
}

/// Namespace summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub interfaces: usize,
    pub routes: usize,
    pub filter_rules: usize,
    pub nat_rules: usize,
    pub counters: Vec<(String, u64)>,
}

#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    pub created: DateTime<Utc>,
    routes: RwLock<RouteTable>,
    filters: RwLock<FilterTable>,
    nat: RwLock<NatTable>,
    /// Underlay ARP cache
    pub neighbors: NeighborCache,
    interfaces: RwLock<BTreeMap<String, Arc<Interface>>>,
    pub stats: NamespaceStats,
    next_rule_id: AtomicU64,
}

impl Namespace {
    pub fn new(name: &str, limits: &Limits) -> Self {
        Self {
            name: name.to_string(),
            created: Utc::now(),
            routes: RwLock::new(RouteTable::new(limits.max_routes)),
            filters: RwLock::new(FilterTable::new(limits.max_rules_per_hook)),
            nat: RwLock::new(NatTable::new(limits.max_rules_per_hook)),
            neighbors: NeighborCache::default(),
            interfaces: RwLock::new(BTreeMap::new()),
            stats: NamespaceStats::new(),
            next_rule_id: AtomicU64::new(1),
        }
    }

    pub fn routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read().unwrap()
    }

    pub(crate) fn filters(&self) -> RwLockReadGuard<'_, FilterTable> {
        self.filters.read().unwrap()
    }

    pub(crate) fn nat(&self) -> RwLockReadGuard<'_, NatTable> {
        self.nat.read().unwrap()
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.read().unwrap().get(name).cloned()
    }

    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.read().unwrap().values().cloned().collect()
    }

    /// The physical interface, if one is attached.
    pub fn physical(&self) -> Option<Arc<Interface>> {
        self.interfaces
            .read()
            .unwrap()
            .values()
            .find(|i| i.is_physical())
            .cloned()
    }

    fn connected_route(iface: &Interface) -> Route {
        match iface.kind {
            InterfaceKind::Physical => Route::connected(
                Ipv4Cidr::new(Ipv4Addr::UNSPECIFIED, 0),
                &iface.name,
                iface.ip(),
            ),
            InterfaceKind::Tunnel { .. } => Route::connected(iface.address, &iface.name, iface.ip()),
        }
    }

    /// Attach `iface`, installing its Connected and Local routes.
    pub fn attach(&self, iface: Arc<Interface>) -> Result<()> {
        let connected = Self::connected_route(&iface);
        let local = Route::local(iface.ip(), &iface.name);
        {
            let mut routes = self.routes.write().unwrap();
            for route in [&connected, &local] {
                if routes.contains_prefix(route.destination, route.prefix_len) {
                    return Err(Error::AlreadyExists(format!(
                        "route {}/{} already present in {}",
                        route.destination, route.prefix_len, self.name
                    )));
                }
            }
            routes.insert(connected)?;
            if let Err(e) = routes.insert(local) {
                let key = Self::connected_route(&iface).key();
                routes.delete(key.destination, key.prefix_len, key.class)?;
                return Err(e);
            }
        }
        debug!(namespace = %self.name, interface = %iface.name, "interface attached");
        self.interfaces
            .write()
            .unwrap()
            .insert(iface.name.clone(), iface);
        Ok(())
    }

    /// Unlink `name` so no new packet can reach it.
    pub fn take_interface(&self, name: &str) -> Result<Arc<Interface>> {
        self.interfaces
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| {
                Error::NotFound(format!("interface {} in namespace {}", name, self.name))
            })
    }

    /// Remove the Local and Connected routes of a detached interface,
    /// returning every route removed.
    ///
    /// Both deletions are attempted; the first failure is returned after.
    pub fn remove_interface_routes(&self, iface: &Interface) -> Result<Vec<Route>> {
        let mut routes = self.routes.write().unwrap();
        let key = Self::connected_route(iface).key();
        let local = routes.delete(iface.ip(), 32, RouteClass::Local);
        let connected = routes.delete(key.destination, key.prefix_len, key.class);

        let mut removed = Vec::new();
        for result in [local, connected] {
            removed.extend(result?);
        }
        Ok(removed)
    }

    /// Install a static route.
    pub fn add_route(&self, spec: &RouteSpec, tunnels: &TunnelRegistry) -> Result<Route> {
        let dest = spec.destination;
        let mut routes = self.routes.write().unwrap();
        if routes.contains_prefix(dest.addr, dest.prefix_len) {
            return Err(Error::AlreadyExists(format!("route {} in {}", dest, self.name)));
        }

        let (anchor, interface, source_ip) = match (spec.gateway, &spec.interface) {
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "route needs a gateway or an interface".into(),
                ))
            }
            (Some(gw), None) => {
                let conn = routes.resolve(gw)?;
                (conn.key(), conn.interface.clone(), conn.source_ip)
            }
            (gateway, Some(name)) => {
                let iface = self.interface(name).ok_or_else(|| {
                    Error::NotFound(format!("interface {} in namespace {}", name, self.name))
                })?;
                match iface.kind {
                    InterfaceKind::Physical if gateway.is_some() => {
                        return Err(Error::InvalidArgument(format!(
                            "{} is physical; a gateway is not allowed",
                            name
                        )))
                    }
                    InterfaceKind::Physical => {}
                    InterfaceKind::Tunnel { vni } => {
                        if let Some(gw) = gateway {
                            if !iface.address.contains(gw) {
                                return Err(Error::Unreachable(format!(
                                    "gateway {} is outside {}",
                                    gw, iface.address
                                )));
                            }
                            let known = tunnels
                                .get(vni)
                                .map(|dev| dev.neighbors.contains(gw))
                                .unwrap_or(false);
                            if !known {
                                return Err(Error::Unreachable(format!(
                                    "gateway {} has no neighbor entry on VNI {}",
                                    gw, vni
                                )));
                            }
                        }
                    }
                }
                let anchor: RouteKey = Self::connected_route(&iface).key();
                if routes
                    .get(anchor.destination, anchor.prefix_len, anchor.class)
                    .is_none()
                {
                    return Err(Error::Internal(format!(
                        "interface {} has no connected route",
                        name
                    )));
                }
                (anchor, iface.name.clone(), iface.ip())
            }
        };

        let route = Route {
            destination: dest.addr,
            prefix_len: dest.prefix_len,
            class: RouteClass::Static,
            next_hop: spec.gateway,
            interface,
            source_ip,
            anchor: Some(anchor),
        };
        routes.insert(route.clone())?;
        info!(namespace = %self.name, route = %route, "static route added");
        Ok(route)
    }

    /// Delete a static route and report what was removed.
    pub fn delete_route(&self, destination: Ipv4Cidr) -> Result<Vec<Route>> {
        let mut routes = self.routes.write().unwrap();
        if routes
            .get(destination.addr, destination.prefix_len, RouteClass::Static)
            .is_none()
        {
            if routes.contains_prefix(destination.addr, destination.prefix_len) {
                return Err(Error::InvalidArgument(format!(
                    "{} is an interface route; detach the interface instead",
                    destination
                )));
            }
            return Err(Error::NotFound(format!("route {} in {}", destination, self.name)));
        }
        let removed = routes.delete(destination.addr, destination.prefix_len, RouteClass::Static)?;
        info!(namespace = %self.name, route = %destination, "static route deleted");
        Ok(removed)
    }

    fn allocate_rule_id(&self) -> u64 {
        self.next_rule_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_filter_rule(&self, spec: FilterRuleSpec) -> Result<u64> {
        spec.validate()?;
        let hook = spec.hook;
        let mut filters = self.filters.write().unwrap();
        let id = self.allocate_rule_id();
        filters.add(id, spec)?;
        info!(namespace = %self.name, %hook, rule_id = id, "filter rule added");
        Ok(id)
    }

    pub fn delete_filter_rule(&self, id: u64) -> Result<()> {
        let rule = self.filters.write().unwrap().delete(id)?;
        info!(namespace = %self.name, hook = %rule.hook, rule_id = id, "filter rule deleted");
        Ok(())
    }

    pub fn add_nat_rule(&self, spec: NatRuleSpec) -> Result<u64> {
        spec.validate()?;
        let hook = spec.hook;
        let mut nat = self.nat.write().unwrap();
        let id = self.allocate_rule_id();
        nat.add(id, spec)?;
        info!(namespace = %self.name, %hook, rule_id = id, "nat rule added");
        Ok(id)
    }

    pub fn delete_nat_rule(&self, id: u64) -> Result<()> {
        let rule = self.nat.write().unwrap().delete(id)?;
        info!(namespace = %self.name, hook = %rule.hook, rule_id = id, "nat rule deleted");
        Ok(())
    }

    pub fn show_rules(&self, table: RuleTableKind) -> RuleList {
        match table {
            RuleTableKind::Filter => RuleList::Filter(self.filters().list()),
            RuleTableKind::Nat => RuleList::Nat(self.nat().list()),
        }
    }

    /// Remove every rule of `table`, returning how many were removed.
    pub fn flush_rules(&self, table: RuleTableKind) -> usize {
        let n = match table {
            RuleTableKind::Filter => self.filters.write().unwrap().flush(),
            RuleTableKind::Nat => self.nat.write().unwrap().flush(),
        };
        info!(namespace = %self.name, ?table, removed = n, "rules flushed");
        n
    }

    pub fn info(&self) -> NamespaceInfo {
        NamespaceInfo {
            name: self.name.clone(),
            created: self.created,
            interfaces: self.interfaces.read().unwrap().len(),
            routes: self.routes().len(),
            filter_rules: self.filters().len(),
            nat_rules: self.nat().len(),
            counters: self.stats.export(),
        }
    }
}
