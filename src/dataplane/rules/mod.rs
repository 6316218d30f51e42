//! Per-namespace policy rules
//!
//! Rules attach to one of three hook points. Filter rules are evaluated by
//! priority with unset match fields acting as wildcards; NAT rules match
//! one address exactly.

pub mod filter;
pub mod nat;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::protocol::ipv4::{Ipv4Header, Protocol};
use crate::protocol::{tcp::TcpHeader, udp::UdpHeader};
use crate::{Error, Result};

pub use filter::{Direction, FilterMatch, FilterRuleInfo, FilterRuleSpec, FilterTable, PortRange, Target};
pub use nat::{NatKind, NatRuleInfo, NatRuleSpec, NatTable};

/// Hook point in the packet pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    PreRouting,
    Forwarding,
    PostRouting,
}

impl Hook {
    pub const ALL: [Hook; 3] = [Hook::PreRouting, Hook::Forwarding, Hook::PostRouting];

    pub(crate) fn index(self) -> usize {
        match self {
            Hook::PreRouting => 0,
            Hook::Forwarding => 1,
            Hook::PostRouting => 2,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Hook::PreRouting => "prerouting",
            Hook::Forwarding => "forwarding",
            Hook::PostRouting => "postrouting",
        };
        f.write_str(s)
    }
}

impl FromStr for Hook {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "prerouting" => Ok(Hook::PreRouting),
            "forwarding" | "forward" => Ok(Hook::Forwarding),
            "postrouting" => Ok(Hook::PostRouting),
            _ => Err(Error::Parse(format!("unknown hook: {}", s))),
        }
    }
}

/// Rule table selector for show/flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTableKind {
    Filter,
    Nat,
}

/// Header fields rules match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub direction: Direction,
    /// IP packet length, for byte counters
    pub len: usize,
}

impl PacketMeta {
    /// Extract match fields from an IPv4 packet.
    pub fn from_ipv4(packet: &[u8], direction: Direction) -> Result<Self> {
        let ip = Ipv4Header::parse(packet)?;
        let (src_port, dst_port) = match Protocol::from_u8(ip.protocol()) {
            Some(Protocol::Tcp) => match TcpHeader::parse(ip.payload()) {
                Ok(tcp) => (Some(tcp.src_port()), Some(tcp.dst_port())),
                Err(_) => (None, None),
            },
            Some(Protocol::Udp) => match UdpHeader::parse(ip.payload()) {
                Ok(udp) => (Some(udp.src_port()), Some(udp.dst_port())),
                Err(_) => (None, None),
            },
            _ => (None, None),
        };
        Ok(Self {
            src_ip: ip.src_addr(),
            dst_ip: ip.dst_addr(),
            protocol: ip.protocol(),
            src_port,
            dst_port,
            direction,
            len: ip.total_length() as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ipv4::Ipv4Builder;
    use crate::protocol::udp::UdpBuilder;

    #[test]
    fn test_hook_parse() {
        assert_eq!("PREROUTING".parse::<Hook>().unwrap(), Hook::PreRouting);
        assert_eq!("post-routing".parse::<Hook>().unwrap(), Hook::PostRouting);
        assert_eq!("forward".parse::<Hook>().unwrap(), Hook::Forwarding);
        assert!("input".parse::<Hook>().is_err());
        assert_eq!(Hook::PostRouting.to_string(), "postrouting");
    }

    #[test]
    fn test_packet_meta_udp() {
        let src = Ipv4Addr::new(10, 0, 0, 2);
        let dst = Ipv4Addr::new(8, 8, 8, 8);
        let udp = UdpBuilder::new().src_port(5353).dst_port(53).payload(b"q").build(src, dst);
        let packet = Ipv4Builder::new()
            .src_addr(src)
            .dst_addr(dst)
            .protocol(Protocol::Udp as u8)
            .payload(&udp)
            .build();

        let meta = PacketMeta::from_ipv4(&packet, Direction::Out).unwrap();
        assert_eq!(meta.src_ip, src);
        assert_eq!(meta.dst_port, Some(53));
        assert_eq!(meta.src_port, Some(5353));
        assert_eq!(meta.len, packet.len());
    }
}
