//! Outer-header construction and flow-stable source port selection

use std::net::Ipv4Addr;

use super::fdb::RemoteEndpoint;
use crate::protocol::ethernet::Frame;
use crate::protocol::ipv4::{Ipv4Header, Protocol};
use crate::protocol::vxlan::{self, OuterHeader};
use crate::protocol::MacAddr;

/// Lowest outer UDP source port
pub const SRC_PORT_MIN: u16 = 1024;
/// Number of source ports in the range
pub const SRC_PORT_RANGE: u64 = 4977;

/// Local tunnel endpoint parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vtep {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    /// Underlay next hop for outer frames
    pub gateway_mac: Option<MacAddr>,
    pub udp_port: u16,
}

impl Default for Vtep {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::LOCALHOST,
            mac: MacAddr([0x02, 0, 0, 0, 0, 0x01]),
            gateway_mac: None,
            udp_port: vxlan::DEFAULT_PORT,
        }
    }
}

/// Direction-symmetric CRC-32 over addresses, ports and protocol.
///
/// Returns 0 for frames that are not IPv4 TCP, UDP or ICMP.
fn ipv4_flow_hash(packet: &[u8]) -> u32 {
    let Ok(ip) = Ipv4Header::parse(packet) else {
        return 0;
    };
    let l4 = ip.payload();
    let (src_port, dst_port) = match Protocol::from_u8(ip.protocol()) {
        Some(Protocol::Tcp) | Some(Protocol::Udp) if l4.len() >= 4 => (
            u16::from_be_bytes([l4[0], l4[1]]) as u32,
            u16::from_be_bytes([l4[2], l4[3]]) as u32,
        ),
        Some(Protocol::Icmp) => (0, 0),
        _ => return 0,
    };
    let src_ip = u32::from(ip.src_addr());
    let dst_ip = u32::from(ip.dst_addr());

    let keys: [u32; 4] = if src_ip > dst_ip || (src_ip == dst_ip && src_port > dst_port) {
        [dst_ip, src_ip, (dst_port << 16) | src_port, ip.protocol() as u32]
    } else {
        [src_ip, dst_ip, (src_port << 16) | dst_port, ip.protocol() as u32]
    };
    let mut bytes = [0u8; 16];
    for (chunk, key) in bytes.chunks_exact_mut(4).zip(keys) {
        chunk.copy_from_slice(&key.to_be_bytes());
    }
    crc32fast::hash(&bytes)
}

/// Flow hash of an inner Ethernet frame.
///
/// IPv4 flows hash their 5-tuple; everything else (and a zero flow hash)
/// falls back to the destination+source MAC pair.
pub fn flow_hash(inner: &[u8]) -> u32 {
    let hash = match Frame::parse(inner) {
        Ok(eth) if eth.is_ipv4() => ipv4_flow_hash(eth.payload()),
        _ => 0,
    };
    if hash != 0 {
        return hash;
    }
    let pair = &inner[..inner.len().min(2 * 6)];
    crc32fast::hash(pair)
}

/// Outer UDP source port for `inner`, in `SRC_PORT_MIN..SRC_PORT_MIN + SRC_PORT_RANGE`.
pub fn source_port(inner: &[u8]) -> u16 {
    let hash = flow_hash(inner) as u64;
    (((hash * SRC_PORT_RANGE) >> 32) as u16) + SRC_PORT_MIN
}

/// Wrap `frame` for delivery to `remote`.
pub fn encapsulate_to(frame: &mut Vec<u8>, vtep: &Vtep, remote: &RemoteEndpoint, src_port: u16) {
    let outer = OuterHeader {
        src_mac: vtep.mac,
        dst_mac: vtep.gateway_mac.unwrap_or(MacAddr::BROADCAST),
        src_ip: vtep.ip,
        dst_ip: remote.ip,
        src_port,
        dst_port: remote.port,
        vni: remote.vni,
    };
    vxlan::encapsulate(frame, &outer);
}
