//! Tunnel device: one per VNI, shared by every member interface

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{trace, warn};

use super::encap::{encapsulate_to, source_port, Vtep};
use super::fdb::ForwardingDb;
use super::neighbor::TunnelNeighbors;
use crate::dataplane::interface::{UsageGuard, UsageTracker};
use crate::dataplane::Transmit;
use crate::protocol::ethernet::{self, Frame};
use crate::{Error, Result};

pub const DEFAULT_MAX_MEMBERS: usize = 10240;

/// Device summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub vni: u32,
    pub members: Vec<String>,
    pub fdb_entries: usize,
    pub neighbors: usize,
}

#[derive(Debug)]
pub struct TunnelDevice {
    pub vni: u32,
    pub fdb: ForwardingDb,
    pub neighbors: TunnelNeighbors,
    members: RwLock<BTreeSet<String>>,
    usage: UsageTracker,
    max_members: usize,
}

impl TunnelDevice {
    pub fn new(vni: u32, max_members: usize, max_fdb_entries: usize) -> Self {
        Self {
            vni,
            fdb: ForwardingDb::new(max_fdb_entries),
            neighbors: TunnelNeighbors::new(),
            members: RwLock::new(BTreeSet::new()),
            usage: UsageTracker::new(),
            max_members,
        }
    }

    pub fn join(&self, interface: &str) -> Result<()> {
        let mut members = self.members.write().unwrap();
        if members.contains(interface) {
            return Err(Error::AlreadyExists(format!(
                "{} already joined VNI {}",
                interface, self.vni
            )));
        }
        if members.len() >= self.max_members {
            return Err(Error::ResourceExhausted(format!(
                "VNI {} has {} members",
                self.vni, self.max_members
            )));
        }
        members.insert(interface.to_string());
        Ok(())
    }

    /// Remove a member, returning how many remain.
    pub fn leave(&self, interface: &str) -> Result<usize> {
        let mut members = self.members.write().unwrap();
        if !members.remove(interface) {
            return Err(Error::NotFound(format!(
                "{} is not a member of VNI {}",
                interface, self.vni
            )));
        }
        Ok(members.len())
    }

    pub fn members(&self) -> Vec<String> {
        self.members.read().unwrap().iter().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.read().unwrap().len()
    }

    pub fn acquire(&self) -> Option<UsageGuard<'_>> {
        self.usage.acquire()
    }

    pub(super) fn drain(&self, timeout: Duration) {
        if !self.usage.drain(timeout) {
            warn!(vni = self.vni, in_use = self.usage.in_use(), "tunnel drain timed out");
        }
    }

    pub fn info(&self) -> TunnelInfo {
        TunnelInfo {
            vni: self.vni,
            members: self.members(),
            fdb_entries: self.fdb.len(),
            neighbors: self.neighbors.len(),
        }
    }

    /// Encapsulate `frame` toward the endpoints registered for its
    /// destination MAC.
    ///
    /// The destination MAC is first resolved from `neighbor` through the
    /// neighbor cache; a miss keeps the MAC already in the frame. With
    /// several endpoints, a copy is encapsulated and handed to `tx` for
    /// each extra endpoint and `frame` itself goes to the first one.
    ///
    /// Returns the number of encapsulated frames.
    pub fn send(
        &self,
        frame: &mut Vec<u8>,
        neighbor: Option<Ipv4Addr>,
        vtep: &Vtep,
        egress: &str,
        tx: &mut dyn Transmit,
    ) -> Result<usize> {
        if let Some(ip) = neighbor {
            match self.neighbors.lookup(ip) {
                Some(mac) => ethernet::set_dst_mac(frame, mac),
                None => trace!(vni = self.vni, %ip, "tunnel neighbor miss"),
            }
        }

        let dst_mac = Frame::parse(frame)?.dst_mac();
        let remotes = self
            .fdb
            .lookup(dst_mac)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                Error::Unreachable(format!("no endpoint for {} on VNI {}", dst_mac, self.vni))
            })?;

        let src_port = source_port(frame);
        for remote in &remotes[1..] {
            let mut copy = frame.clone();
            encapsulate_to(&mut copy, vtep, remote, src_port);
            tx.transmit(egress, &copy);
        }
        encapsulate_to(frame, vtep, &remotes[0], src_port);
        Ok(remotes.len())
    }
}
