//! Configuration types

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

use crate::control::codec::DEFAULT_MAX_MESSAGE_LEN;
use crate::dataplane::interface::{InterfaceKind, InterfaceSpec};
use crate::dataplane::rules::{Direction, FilterMatch, FilterRuleSpec, Hook, NatRuleSpec, PortRange, Target};
use crate::dataplane::tunnel::{RemoteEndpoint, Vtep};
use crate::dataplane::{Limits, RouteSpec};
use crate::protocol::ipv4::Protocol;
use crate::protocol::vxlan::DEFAULT_PORT;
use crate::protocol::{Ipv4Cidr, MacAddr};
use crate::telemetry::LogConfig;
use crate::{Error, Result};

/// Router configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub vtep: VtepConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, rename = "namespace")]
    pub namespaces: Vec<NamespaceConfig>,
    #[serde(default, rename = "tunnel")]
    pub tunnels: Vec<TunnelConfig>,
}

/// `[control]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    pub listen: SocketAddr,
    pub max_message_len: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9700)),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// `[vtep]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct VtepConfig {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    /// Underlay next hop used when no ARP entry resolves
    pub gateway_mac: Option<MacAddr>,
    pub udp_port: u16,
    pub uplink: String,
}

impl Default for VtepConfig {
    fn default() -> Self {
        let vtep = Vtep::default();
        Self {
            ip: vtep.ip,
            mac: vtep.mac,
            gateway_mac: None,
            udp_port: DEFAULT_PORT,
            uplink: "uplink0".to_string(),
        }
    }
}

impl VtepConfig {
    pub fn to_vtep(&self) -> Vtep {
        Vtep {
            ip: self.ip,
            mac: self.mac,
            gateway_mac: self.gateway_mac,
            udp_port: self.udp_port,
        }
    }
}

/// `[[namespace]]` entry
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NamespaceConfig {
    pub name: String,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteSpec>,
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub nat: Vec<NatRuleSpec>,
    /// Static underlay ARP entries
    #[serde(default, rename = "neighbor")]
    pub neighbors: Vec<NeighborConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKindName {
    Physical,
    Tunnel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKindName,
    #[serde(default)]
    pub vni: Option<u32>,
    pub mac: MacAddr,
    pub address: Ipv4Cidr,
    /// Extra external addresses (physical only)
    #[serde(default)]
    pub floating_ips: Vec<Ipv4Addr>,
}

impl InterfaceConfig {
    pub fn to_spec(&self) -> Result<InterfaceSpec> {
        let kind = match (self.kind, self.vni) {
            (InterfaceKindName::Physical, None) => InterfaceKind::Physical,
            (InterfaceKindName::Physical, Some(_)) => {
                return Err(Error::Config(format!(
                    "interface {}: vni is only valid for tunnel interfaces",
                    self.name
                )))
            }
            (InterfaceKindName::Tunnel, Some(vni)) => InterfaceKind::Tunnel { vni },
            (InterfaceKindName::Tunnel, None) => {
                return Err(Error::Config(format!(
                    "interface {}: tunnel interface requires vni",
                    self.name
                )))
            }
        };
        Ok(InterfaceSpec {
            name: self.name.clone(),
            kind,
            mac: self.mac,
            address: self.address,
        })
    }
}

/// Flat filter rule as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterConfig {
    pub hook: Hook,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub direction: Direction,
    pub target: Target,
    #[serde(default)]
    pub src: Option<Ipv4Cidr>,
    #[serde(default)]
    pub dst: Option<Ipv4Cidr>,
    #[serde(default)]
    pub sport: Option<PortRange>,
    #[serde(default)]
    pub dport: Option<PortRange>,
    /// "tcp", "udp", "icmp" or a protocol number
    #[serde(default)]
    pub protocol: Option<String>,
}

impl FilterConfig {
    pub fn to_spec(&self) -> Result<FilterRuleSpec> {
        let protocol = self.protocol.as_deref().map(parse_protocol).transpose()?;
        Ok(FilterRuleSpec {
            hook: self.hook,
            priority: self.priority,
            direction: self.direction,
            matches: FilterMatch {
                src: self.src,
                dst: self.dst,
                src_port: self.sport,
                dst_port: self.dport,
                protocol,
            },
            target: self.target,
        })
    }
}

fn parse_protocol(name: &str) -> Result<u8> {
    match name.to_ascii_lowercase().as_str() {
        "icmp" => Ok(Protocol::Icmp as u8),
        "tcp" => Ok(Protocol::Tcp as u8),
        "udp" => Ok(Protocol::Udp as u8),
        other => other
            .parse()
            .map_err(|_| Error::Config(format!("unknown protocol: {}", name))),
    }
}

/// IPv4 to MAC binding, used for underlay ARP and tunnel neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct NeighborConfig {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// `[[tunnel]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelConfig {
    pub vni: u32,
    #[serde(default)]
    pub fdb: Vec<FdbConfig>,
    #[serde(default, rename = "neighbor")]
    pub neighbors: Vec<NeighborConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FdbConfig {
    pub mac: MacAddr,
    #[serde(flatten)]
    pub remote: RemoteEndpoint,
}
