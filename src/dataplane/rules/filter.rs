//! Packet filter tables
//!
//! One priority-ordered rule list per hook. The first rule (lowest priority
//! value, then lowest id) whose fields all match decides the packet; a packet
//! no rule matches continues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{Hook, PacketMeta};
use crate::protocol::Ipv4Cidr;
use crate::telemetry::{PacketCounters, PacketTotals};
use crate::{Error, Result};

pub const MIN_PRIORITY: u32 = 1;
/// Lowest precedence, used when a rule gives none
pub const MAX_PRIORITY: u32 = 10000;

/// Which side of the tenant a packet entered from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Entered through a physical (external) interface
    In,
    /// Entered through a tunnel endpoint (tenant side)
    Out,
    #[default]
    Any,
}

impl Direction {
    fn admits(self, packet: Direction) -> bool {
        self == Direction::Any || self == packet
    }
}

/// Filter action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Accept,
    Drop,
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "port range {}-{} is inverted",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Parse "80" or "1024-65535"
impl FromStr for PortRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| Error::InvalidArgument(format!("invalid port: {}", p)))
        };
        match s.split_once('-') {
            Some((start, end)) => PortRange::new(port(start)?, port(end)?),
            None => Ok(PortRange::single(port(s)?)),
        }
    }
}

impl Serialize for PortRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Optional match fields; `None` matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<Ipv4Cidr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<Ipv4Cidr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<PortRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<PortRange>,
    /// IP protocol number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u8>,
}

impl FilterMatch {
    pub fn matches(&self, pkt: &PacketMeta) -> bool {
        if let Some(proto) = self.protocol {
            if proto != pkt.protocol {
                return false;
            }
        }
        if let Some(cidr) = self.src {
            if !cidr.contains(pkt.src_ip) {
                return false;
            }
        }
        if let Some(cidr) = self.dst {
            if !cidr.contains(pkt.dst_ip) {
                return false;
            }
        }
        // Port matches need a transport header
        if let Some(range) = self.src_port {
            match pkt.src_port {
                Some(port) if range.contains(port) => {}
                _ => return false,
            }
        }
        if let Some(range) = self.dst_port {
            match pkt.dst_port {
                Some(port) if range.contains(port) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Filter rule as requested by the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleSpec {
    pub hook: Hook,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, rename = "match")]
    pub matches: FilterMatch,
    pub target: Target,
}

impl FilterRuleSpec {
    pub fn new(hook: Hook, target: Target) -> Self {
        Self {
            hook,
            priority: None,
            direction: Direction::Any,
            matches: FilterMatch::default(),
            target,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(p) = self.priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
                return Err(Error::OutOfRange(format!(
                    "priority {} outside {}..={}",
                    p, MIN_PRIORITY, MAX_PRIORITY
                )));
            }
        }
        for range in [self.matches.src_port, self.matches.dst_port].iter().flatten() {
            if range.start > range.end {
                return Err(Error::InvalidArgument(format!(
                    "port range {}-{} is inverted",
                    range.start, range.end
                )));
            }
        }
        for cidr in [self.matches.src, self.matches.dst].iter().flatten() {
            if cidr.prefix_len > 32 {
                return Err(Error::InvalidArgument(format!("mask length {} exceeds 32", cidr.prefix_len)));
            }
        }
        Ok(())
    }
}

/// Installed filter rule
#[derive(Debug)]
pub struct FilterRule {
    pub id: u64,
    pub hook: Hook,
    pub priority: u32,
    pub direction: Direction,
    pub matches: FilterMatch,
    pub target: Target,
    pub counters: PacketCounters,
}

impl FilterRule {
    fn info(&self) -> FilterRuleInfo {
        FilterRuleInfo {
            id: self.id,
            hook: self.hook,
            priority: self.priority,
            direction: self.direction,
            matches: self.matches.clone(),
            target: self.target,
            counters: self.counters.totals(),
        }
    }
}

/// Snapshot of a filter rule with summed counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleInfo {
    pub id: u64,
    pub hook: Hook,
    pub priority: u32,
    pub direction: Direction,
    #[serde(rename = "match")]
    pub matches: FilterMatch,
    pub target: Target,
    pub counters: PacketTotals,
}

/// Filter rules of one namespace, one ordered list per hook
#[derive(Debug)]
pub struct FilterTable {
    hooks: [Vec<Arc<FilterRule>>; 3],
    max_rules_per_hook: usize,
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new(MAX_PRIORITY as usize)
    }
}

impl FilterTable {
    pub fn new(max_rules_per_hook: usize) -> Self {
        Self {
            hooks: Default::default(),
            max_rules_per_hook,
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install a rule under `id`.
    pub fn add(&mut self, id: u64, spec: FilterRuleSpec) -> Result<()> {
        spec.validate()?;
        let rules = &mut self.hooks[spec.hook.index()];
        if rules.len() >= self.max_rules_per_hook {
            return Err(Error::ResourceExhausted(format!(
                "{} filter table full ({} rules)",
                spec.hook, self.max_rules_per_hook
            )));
        }
        let rule = Arc::new(FilterRule {
            id,
            hook: spec.hook,
            priority: spec.priority.unwrap_or(MAX_PRIORITY),
            direction: spec.direction,
            matches: spec.matches,
            target: spec.target,
            counters: PacketCounters::new(),
        });
        let at = rules.partition_point(|r| (r.priority, r.id) < (rule.priority, rule.id));
        rules.insert(at, rule);
        Ok(())
    }

    pub fn delete(&mut self, id: u64) -> Result<Arc<FilterRule>> {
        for rules in self.hooks.iter_mut() {
            if let Some(pos) = rules.iter().position(|r| r.id == id) {
                return Ok(rules.remove(pos));
            }
        }
        Err(Error::NotFound(format!("filter rule {}", id)))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.hooks.iter().flatten().any(|r| r.id == id)
    }

    /// Evaluate `pkt` at `hook`, counting the deciding rule.
    ///
    /// Returns `None` when no rule matches.
    pub fn evaluate(&self, hook: Hook, pkt: &PacketMeta) -> Option<Target> {
        let rule = self.hooks[hook.index()]
            .iter()
            .find(|r| r.direction.admits(pkt.direction) && r.matches.matches(pkt))?;
        rule.counters.record(pkt.len);
        Some(rule.target)
    }

    pub fn flush(&mut self) -> usize {
        let n = self.len();
        for rules in self.hooks.iter_mut() {
            rules.clear();
        }
        n
    }

    /// Rules in hook order, then evaluation order.
    pub fn list(&self) -> Vec<FilterRuleInfo> {
        self.hooks.iter().flatten().map(|r| r.info()).collect()
    }
}
