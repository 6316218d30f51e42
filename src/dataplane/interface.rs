//! Namespace interfaces and in-flight usage tracking
//!
//! An interface is either the physical (external gateway) side of a
//! namespace or a tunnel endpoint on an overlay segment. Packet workers
//! hold a usage guard for the duration of one packet; detaching waits for
//! the guards to drop before the interface is released.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::Duration;
use tracing::warn;

use crate::protocol::vxlan::MAX_VNI;
use crate::protocol::{Ipv4Cidr, MacAddr};
use crate::telemetry::InterfaceStats;
use crate::{Error, Result};

/// Interface kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterfaceKind {
    /// External gateway side; owns the namespace default route
    Physical,
    /// Member of the overlay segment `vni`
    Tunnel { vni: u32 },
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Physical => f.write_str("physical"),
            InterfaceKind::Tunnel { vni } => write!(f, "tunnel vni {}", vni),
        }
    }
}

/// Interface attach request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub kind: InterfaceKind,
    pub mac: MacAddr,
    /// Interface address with subnet length
    pub address: Ipv4Cidr,
}

impl InterfaceSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 15 {
            return Err(Error::InvalidArgument(format!(
                "interface name {:?} must be 1-15 characters",
                self.name
            )));
        }
        if !self.mac.is_unicast() || self.mac.is_zero() {
            return Err(Error::InvalidArgument(format!("{} is not a unicast MAC", self.mac)));
        }
        if self.address.addr.is_unspecified() || self.address.addr.is_multicast() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a usable interface address",
                self.address
            )));
        }
        if let InterfaceKind::Tunnel { vni } = self.kind {
            if vni == 0 || vni > MAX_VNI {
                return Err(Error::OutOfRange(format!("VNI {} outside 1..={}", vni, MAX_VNI)));
            }
        }
        Ok(())
    }
}

/// Counts packets currently using an object.
#[derive(Debug, Default)]
pub struct UsageTracker {
    count: AtomicUsize,
    closing: AtomicBool,
    lock: Mutex<()>,
    idle: Condvar,
}

/// Held by a packet worker while it uses the tracked object
#[derive(Debug)]
pub struct UsageGuard<'a> {
    tracker: &'a UsageTracker,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user; fails once draining has started.
    pub fn acquire(&self) -> Option<UsageGuard<'_>> {
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        let guard = UsageGuard { tracker: self };
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        Some(guard)
    }

    pub fn in_use(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Refuse new users and wait up to `timeout` for current ones to leave.
    ///
    /// Returns false if users remained when the timeout expired.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.closing.store(true, Ordering::Release);
        let guard = self.lock.lock().unwrap();
        let (_guard, result) = self
            .idle
            .wait_timeout_while(guard, timeout, |_| self.count.load(Ordering::Acquire) > 0)
            .unwrap();
        !result.timed_out()
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.lock.lock().unwrap();
            self.idle.notify_all();
        }
    }
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

/// Attached interface
#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub namespace: String,
    pub kind: InterfaceKind,
    pub mac: MacAddr,
    pub address: Ipv4Cidr,
    pub stats: InterfaceStats,
    floating_ips: Mutex<BTreeSet<Ipv4Addr>>,
    usage: UsageTracker,
}

/// Interface as reported by ShowInterfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub kind: InterfaceKind,
    pub mac: MacAddr,
    pub address: Ipv4Cidr,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floating_ips: Vec<Ipv4Addr>,
    pub counters: Vec<(String, u64)>,
}

impl Interface {
    pub fn new(namespace: &str, spec: InterfaceSpec) -> Self {
        Self {
            name: spec.name,
            namespace: namespace.to_string(),
            kind: spec.kind,
            mac: spec.mac,
            address: spec.address,
            stats: InterfaceStats::new(),
            floating_ips: Mutex::new(BTreeSet::new()),
            usage: UsageTracker::new(),
        }
    }

    pub fn is_physical(&self) -> bool {
        self.kind == InterfaceKind::Physical
    }

    pub fn vni(&self) -> Option<u32> {
        match self.kind {
            InterfaceKind::Tunnel { vni } => Some(vni),
            InterfaceKind::Physical => None,
        }
    }

    /// The interface's own address.
    pub fn ip(&self) -> Ipv4Addr {
        self.address.addr
    }

    /// True if `ip` is the interface address or one of its floating IPs.
    pub fn owns(&self, ip: Ipv4Addr) -> bool {
        ip == self.address.addr || self.floating_ips.lock().unwrap().contains(&ip)
    }

    pub fn acquire(&self) -> Option<UsageGuard<'_>> {
        self.usage.acquire()
    }

    /// Wait for in-flight packets; logs if the drain timed out.
    pub fn drain(&self, timeout: Duration) {
        if !self.usage.drain(timeout) {
            warn!(
                interface = %self.name,
                in_use = self.usage.in_use(),
                "interface drain timed out"
            );
        }
    }

    pub fn add_floating_ip(&self, ip: Ipv4Addr) -> bool {
        self.floating_ips.lock().unwrap().insert(ip)
    }

    pub fn remove_floating_ip(&self, ip: Ipv4Addr) -> bool {
        self.floating_ips.lock().unwrap().remove(&ip)
    }

    pub fn floating_ips(&self) -> Vec<Ipv4Addr> {
        self.floating_ips.lock().unwrap().iter().copied().collect()
    }

    pub fn info(&self) -> InterfaceInfo {
        InterfaceInfo {
            name: self.name.clone(),
            kind: self.kind,
            mac: self.mac,
            address: self.address,
            floating_ips: self.floating_ips(),
            counters: self.stats.export(),
        }
    }
}

/// Router-wide map from external addresses to their physical interface
#[derive(Debug, Default)]
pub struct ExternalAddresses {
    owners: RwLock<HashMap<Ipv4Addr, String>>,
}

impl ExternalAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, ip: Ipv4Addr, interface: &str) -> Result<()> {
        let mut owners = self.owners.write().unwrap();
        if let Some(owner) = owners.get(&ip) {
            return Err(Error::AlreadyExists(format!(
                "external address {} is owned by {}",
                ip, owner
            )));
        }
        owners.insert(ip, interface.to_string());
        Ok(())
    }

    /// Remove `ip`, returning the interface that owned it.
    pub fn remove(&self, ip: Ipv4Addr) -> Result<String> {
        self.owners
            .write()
            .unwrap()
            .remove(&ip)
            .ok_or_else(|| Error::NotFound(format!("external address {}", ip)))
    }

    pub fn remove_interface(&self, interface: &str) {
        self.owners.write().unwrap().retain(|_, owner| owner != interface);
    }

    pub fn owner(&self, ip: Ipv4Addr) -> Option<String> {
        self.owners.read().unwrap().get(&ip).cloned()
    }
}
