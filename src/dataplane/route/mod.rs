//! Per-namespace routing table
//!
//! Routes are stored in an [`LcTrie`] keyed by destination prefix. Three
//! classes coexist: `Local` host routes for addresses owned by the router,
//! `Connected` subnets of attached interfaces, and `Static` routes added by
//! the control channel. Every static route is anchored to the connected
//! route that made it resolvable and is removed together with it.

pub mod trie;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::protocol::{prefix_mask, Ipv4Cidr};
use crate::{Error, Result};
use trie::LcTrie;

/// Route class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Address owned by this router (/32)
    Local,
    /// Subnet of an attached interface
    Connected,
    /// Configured through the control channel
    Static,
}

impl RouteClass {
    fn bit(self) -> u8 {
        match self {
            RouteClass::Local => 0x1,
            RouteClass::Connected => 0x2,
            RouteClass::Static => 0x4,
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteClass::Local => "local",
            RouteClass::Connected => "connected",
            RouteClass::Static => "static",
        };
        f.write_str(s)
    }
}

/// Set of route classes a lookup may return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteClasses(u8);

impl RouteClasses {
    pub const ALL: RouteClasses = RouteClasses(0x7);
    pub const CONNECTED: RouteClasses = RouteClasses(0x2);

    pub fn of(classes: &[RouteClass]) -> Self {
        RouteClasses(classes.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn contains(&self, class: RouteClass) -> bool {
        self.0 & class.bit() != 0
    }
}

/// Identity of a route inside one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub class: RouteClass,
}

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination network (host bits clear)
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub class: RouteClass,
    /// Gateway for static routes
    pub next_hop: Option<Ipv4Addr>,
    /// Egress interface name
    pub interface: String,
    /// Source address used for locally generated traffic
    pub source_ip: Ipv4Addr,
    /// Connected route this static route depends on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<RouteKey>,
}

impl Route {
    /// Subnet route for an attached interface.
    pub fn connected(network: Ipv4Cidr, interface: &str, source_ip: Ipv4Addr) -> Self {
        Self {
            destination: network.network(),
            prefix_len: network.prefix_len,
            class: RouteClass::Connected,
            next_hop: None,
            interface: interface.to_string(),
            source_ip,
            anchor: None,
        }
    }

    /// Host route for an address owned by `interface`.
    pub fn local(addr: Ipv4Addr, interface: &str) -> Self {
        Self {
            destination: addr,
            prefix_len: 32,
            class: RouteClass::Local,
            next_hop: None,
            interface: interface.to_string(),
            source_ip: addr,
            anchor: None,
        }
    }

    pub fn key(&self) -> RouteKey {
        RouteKey {
            destination: self.destination,
            prefix_len: self.prefix_len,
            class: self.class,
        }
    }

    pub fn prefix(&self) -> Ipv4Cidr {
        Ipv4Cidr::new(self.destination, self.prefix_len)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.destination, self.prefix_len, self.class)?;
        if let Some(nh) = self.next_hop {
            write!(f, " via {}", nh)?;
        }
        write!(f, " dev {} src {}", self.interface, self.source_ip)
    }
}

/// Routing table using longest prefix match
#[derive(Debug)]
pub struct RouteTable {
    trie: LcTrie<Route>,
    max_routes: usize,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl RouteTable {
    pub fn new(max_routes: usize) -> Self {
        Self {
            trie: LcTrie::new(),
            max_routes,
        }
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    fn validate_prefix(destination: Ipv4Addr, prefix_len: u8) -> Result<()> {
        if prefix_len > 32 {
            return Err(Error::InvalidArgument(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        if u32::from(destination) & !prefix_mask(prefix_len) != 0 {
            return Err(Error::InvalidArgument(format!(
                "{}/{} has host bits set",
                destination, prefix_len
            )));
        }
        Ok(())
    }

    /// Add a route
    ///
    /// Fails with `AlreadyExists` when a route with the same prefix, length
    /// and class is present.
    pub fn insert(&mut self, route: Route) -> Result<()> {
        Self::validate_prefix(route.destination, route.prefix_len)?;
        let class = route.class;
        if self.get(route.destination, route.prefix_len, class).is_some() {
            return Err(Error::AlreadyExists(format!(
                "{} route {}/{}",
                class, route.destination, route.prefix_len
            )));
        }
        if self.trie.len() >= self.max_routes {
            return Err(Error::ResourceExhausted(format!(
                "route table full ({} routes)",
                self.max_routes
            )));
        }
        if class == RouteClass::Static && route.anchor.is_none() {
            return Err(Error::Internal(format!(
                "static route {}/{} has no anchor",
                route.destination, route.prefix_len
            )));
        }
        debug!(route = %route, "route inserted");
        self.trie
            .insert(u32::from(route.destination), route.prefix_len, route)
    }

    /// Exact-match lookup
    pub fn get(&self, destination: Ipv4Addr, prefix_len: u8, class: RouteClass) -> Option<&Route> {
        self.trie
            .get(u32::from(destination), prefix_len, |r| r.class == class)
    }

    /// True if any class holds `destination/prefix_len`.
    pub fn contains_prefix(&self, destination: Ipv4Addr, prefix_len: u8) -> bool {
        self.trie
            .get(u32::from(destination), prefix_len, |_| true)
            .is_some()
    }

    /// Longest-prefix match restricted to `classes`.
    pub fn lookup(&self, addr: Ipv4Addr, classes: RouteClasses) -> Result<&Route> {
        self.trie
            .lookup(u32::from(addr), |r| classes.contains(r.class))
            .map(|e| &e.value)
            .ok_or_else(|| Error::NotFound(format!("no route to {}", addr)))
    }

    /// Connected route whose subnet holds `next_hop`.
    pub fn resolve(&self, next_hop: Ipv4Addr) -> Result<&Route> {
        self.lookup(next_hop, RouteClasses::CONNECTED)
            .map_err(|_| Error::Unreachable(format!("next hop {} is not on a connected subnet", next_hop)))
    }

    /// Delete a route, returning it and every route removed with it.
    ///
    /// Removing a connected route first removes the static routes anchored to it.
    pub fn delete(
        &mut self,
        destination: Ipv4Addr,
        prefix_len: u8,
        class: RouteClass,
    ) -> Result<Vec<Route>> {
        Self::validate_prefix(destination, prefix_len)?;
        if self.get(destination, prefix_len, class).is_none() {
            return Err(Error::NotFound(format!(
                "{} route {}/{}",
                class, destination, prefix_len
            )));
        }

        let mut removed = Vec::new();
        if class == RouteClass::Connected {
            let key = RouteKey {
                destination,
                prefix_len,
                class,
            };
            let anchored: Vec<RouteKey> = self
                .trie
                .entries()
                .into_iter()
                .filter(|(_, e)| e.value.anchor == Some(key))
                .map(|(_, e)| e.value.key())
                .collect();
            for dep in anchored {
                if let Some(route) = self.remove_entry(dep) {
                    debug!(route = %route, "anchored route removed");
                    removed.push(route);
                }
            }
        }

        let route = self
            .remove_entry(RouteKey {
                destination,
                prefix_len,
                class,
            })
            .ok_or_else(|| Error::Internal(format!("route {}/{} vanished", destination, prefix_len)))?;
        debug!(route = %route, "route deleted");
        removed.insert(0, route);
        Ok(removed)
    }

    fn remove_entry(&mut self, key: RouteKey) -> Option<Route> {
        self.trie
            .remove(u32::from(key.destination), key.prefix_len, |r| r.class == key.class)
    }

    /// All routes in prefix order, longest first within a prefix.
    pub fn routes(&self) -> Vec<Route> {
        self.trie
            .entries()
            .into_iter()
            .map(|(_, e)| e.value.clone())
            .collect()
    }
}
