//! Static one-to-one NAT
//!
//! SNAT rewrites the source address at post-routing and DNAT the destination
//! address at pre-routing. Rules are keyed by the exact original address.
//! Checksums are patched incrementally (RFC 1624).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use super::Hook;
use crate::protocol::ipv4::{Ipv4PacketMut, Protocol};
use crate::protocol::{tcp, udp};
use crate::telemetry::{PacketCounters, PacketTotals};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatKind {
    Snat,
    Dnat,
}

impl NatKind {
    /// The only hook each kind may attach to.
    pub fn hook(self) -> Hook {
        match self {
            NatKind::Snat => Hook::PostRouting,
            NatKind::Dnat => Hook::PreRouting,
        }
    }
}

impl fmt::Display for NatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatKind::Snat => f.write_str("snat"),
            NatKind::Dnat => f.write_str("dnat"),
        }
    }
}

/// NAT rule as requested by the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRuleSpec {
    pub hook: Hook,
    pub kind: NatKind,
    pub original: Ipv4Addr,
    pub translated: Ipv4Addr,
}

impl NatRuleSpec {
    pub fn snat(original: Ipv4Addr, translated: Ipv4Addr) -> Self {
        Self {
            hook: Hook::PostRouting,
            kind: NatKind::Snat,
            original,
            translated,
        }
    }

    pub fn dnat(original: Ipv4Addr, translated: Ipv4Addr) -> Self {
        Self {
            hook: Hook::PreRouting,
            kind: NatKind::Dnat,
            original,
            translated,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hook != self.kind.hook() {
            return Err(Error::InvalidArgument(format!(
                "{} rules belong to {}, not {}",
                self.kind,
                self.kind.hook(),
                self.hook
            )));
        }
        if self.original.is_unspecified() || self.translated.is_unspecified() {
            return Err(Error::InvalidArgument("NAT address must be specified".into()));
        }
        Ok(())
    }
}

/// Installed NAT rule
#[derive(Debug)]
pub struct NatRule {
    pub id: u64,
    pub hook: Hook,
    pub kind: NatKind,
    pub original: Ipv4Addr,
    pub translated: Ipv4Addr,
    pub counters: PacketCounters,
}

impl NatRule {
    /// Rewrite the matched address of the IPv4 packet in `packet`.
    pub fn apply(&self, packet: &mut [u8]) -> Result<()> {
        rewrite_address(packet, self.kind, self.translated)?;
        self.counters.record(packet.len());
        Ok(())
    }

    fn info(&self) -> NatRuleInfo {
        NatRuleInfo {
            id: self.id,
            hook: self.hook,
            kind: self.kind,
            original: self.original,
            translated: self.translated,
            counters: self.counters.totals(),
        }
    }
}

/// Snapshot of a NAT rule with summed counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRuleInfo {
    pub id: u64,
    pub hook: Hook,
    pub kind: NatKind,
    pub original: Ipv4Addr,
    pub translated: Ipv4Addr,
    pub counters: PacketTotals,
}

/// Replace the source (SNAT) or destination (DNAT) address of an IPv4
/// packet and patch the IP and TCP/UDP checksums.
pub fn rewrite_address(packet: &mut [u8], kind: NatKind, new: Ipv4Addr) -> Result<()> {
    let mut ip = Ipv4PacketMut::new(packet)?;
    let old = match kind {
        NatKind::Snat => ip.src_addr(),
        NatKind::Dnat => ip.dst_addr(),
    };
    if old == new {
        return Ok(());
    }
    match kind {
        NatKind::Snat => ip.set_src_addr(new),
        NatKind::Dnat => ip.set_dst_addr(new),
    }
    let proto = ip.protocol();
    let header_len = ip.header_len();
    let end = (ip.total_length() as usize).min(packet.len());
    let l4 = &mut packet[header_len..end];

    match Protocol::from_u8(proto) {
        Some(Protocol::Tcp) if l4.len() >= tcp::MIN_HEADER_SIZE => {
            tcp::adjust_checksum_for_addr(l4, old, new)
        }
        Some(Protocol::Udp) if l4.len() >= udp::HEADER_SIZE => {
            udp::adjust_checksum_for_addr(l4, old, new)
        }
        _ => {}
    }
    Ok(())
}

/// NAT rules of one namespace
#[derive(Debug)]
pub struct NatTable {
    by_key: HashMap<(Hook, Ipv4Addr), Arc<NatRule>>,
    max_rules_per_hook: usize,
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new(super::filter::MAX_PRIORITY as usize)
    }
}

impl NatTable {
    pub fn new(max_rules_per_hook: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            max_rules_per_hook,
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn add(&mut self, id: u64, spec: NatRuleSpec) -> Result<()> {
        spec.validate()?;
        let key = (spec.hook, spec.original);
        if self.by_key.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "{} rule for {}",
                spec.kind, spec.original
            )));
        }
        let in_hook = self.by_key.keys().filter(|(h, _)| *h == spec.hook).count();
        if in_hook >= self.max_rules_per_hook {
            return Err(Error::ResourceExhausted(format!(
                "{} NAT table full ({} rules)",
                spec.hook, self.max_rules_per_hook
            )));
        }
        self.by_key.insert(
            key,
            Arc::new(NatRule {
                id,
                hook: spec.hook,
                kind: spec.kind,
                original: spec.original,
                translated: spec.translated,
                counters: PacketCounters::new(),
            }),
        );
        Ok(())
    }

    pub fn delete(&mut self, id: u64) -> Result<Arc<NatRule>> {
        let key = self
            .by_key
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|(k, _)| *k)
            .ok_or_else(|| Error::NotFound(format!("NAT rule {}", id)))?;
        self.by_key
            .remove(&key)
            .ok_or_else(|| Error::Internal(format!("NAT rule {} vanished", id)))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.by_key.values().any(|r| r.id == id)
    }

    /// Rule whose original address equals `addr` at `hook`.
    pub fn lookup(&self, hook: Hook, addr: Ipv4Addr) -> Option<&Arc<NatRule>> {
        self.by_key.get(&(hook, addr))
    }

    pub fn flush(&mut self) -> usize {
        let n = self.by_key.len();
        self.by_key.clear();
        n
    }

    /// Rules sorted by id.
    pub fn list(&self) -> Vec<NatRuleInfo> {
        let mut rules: Vec<NatRuleInfo> = self.by_key.values().map(|r| r.info()).collect();
        rules.sort_by_key(|r| r.id);
        rules
    }
}
