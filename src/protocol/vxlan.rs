//! VXLAN - RFC 7348
//!
//! Outer Ethernet/IPv4/UDP/VXLAN header construction and parsing.

use super::ethernet::{self, Frame};
use super::ipv4::{Ipv4Builder, Ipv4Header, Protocol};
use super::udp::{self, UdpHeader};
use super::{EtherType, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// IANA-assigned VXLAN UDP port
pub const DEFAULT_PORT: u16 = 4789;

/// VXLAN header length
pub const HEADER_LEN: usize = 8;

/// "I" flag: VNI field is valid
pub const FLAGS: u32 = 0x0800_0000;

/// Largest valid VNI (24 bits)
pub const MAX_VNI: u32 = (1 << 24) - 1;

/// Bytes prepended to the inner frame: Ethernet + IPv4 + UDP + VXLAN
pub const ENCAP_OVERHEAD: usize = ethernet::HEADER_LEN + 20 + udp::HEADER_SIZE + HEADER_LEN;

/// Parameters of the outer headers for one remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub vni: u32,
}

/// Encode the 8-byte VXLAN header for `vni`.
pub fn header(vni: u32) -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[0..4].copy_from_slice(&FLAGS.to_be_bytes());
    hdr[4..8].copy_from_slice(&((vni & MAX_VNI) << 8).to_be_bytes());
    hdr
}

/// Decode a VXLAN header, returning the VNI.
pub fn parse_header(buf: &[u8]) -> Result<u32> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Parse("VXLAN header too short".into()));
    }
    let flags = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if flags & FLAGS == 0 {
        return Err(Error::Parse("VXLAN I flag not set".into()));
    }
    Ok(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) >> 8)
}

/// Prepend outer headers to the inner frame held in `frame`.
///
/// The outer UDP checksum is left zero.
pub fn encapsulate(frame: &mut Vec<u8>, outer: &OuterHeader) {
    let udp_len = (udp::HEADER_SIZE + HEADER_LEN + frame.len()) as u16;

    let mut prefix = Vec::with_capacity(ENCAP_OVERHEAD);
    prefix.extend_from_slice(&outer.dst_mac.0);
    prefix.extend_from_slice(&outer.src_mac.0);
    prefix.extend_from_slice(&(EtherType::Ipv4 as u16).to_be_bytes());

    // Header only; the payload follows in `frame`
    let mut ip = Ipv4Builder::new()
        .src_addr(outer.src_ip)
        .dst_addr(outer.dst_ip)
        .protocol(Protocol::Udp as u8)
        .dont_fragment(false)
        .build();
    let total_len = (ip.len() + udp_len as usize) as u16;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[10] = 0;
    ip[11] = 0;
    let sum = super::ipv4::checksum(&ip);
    ip[10..12].copy_from_slice(&sum.to_be_bytes());
    prefix.extend_from_slice(&ip);

    prefix.extend_from_slice(&outer.src_port.to_be_bytes());
    prefix.extend_from_slice(&outer.dst_port.to_be_bytes());
    prefix.extend_from_slice(&udp_len.to_be_bytes());
    prefix.extend_from_slice(&[0, 0]);
    prefix.extend_from_slice(&header(outer.vni));

    frame.splice(0..0, prefix);
}

/// Outer fields of a received VXLAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encapsulated {
    pub outer_src_ip: Ipv4Addr,
    pub outer_dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub vni: u32,
    /// Offset of the inner Ethernet frame
    pub inner_offset: usize,
}

/// Inspect `frame` as Ethernet/IPv4/UDP/VXLAN.
///
/// Returns `Ok(None)` for frames that are not UDP to `port`.
pub fn classify(frame: &[u8], port: u16) -> Result<Option<Encapsulated>> {
    let eth = Frame::parse(frame)?;
    if !eth.is_ipv4() {
        return Ok(None);
    }
    let ip = Ipv4Header::parse(eth.payload())?;
    if ip.protocol() != Protocol::Udp as u8 {
        return Ok(None);
    }
    let udp = UdpHeader::parse(ip.payload())?;
    if udp.dst_port() != port {
        return Ok(None);
    }
    let vni = parse_header(udp.payload())?;
    let inner_offset = ethernet::HEADER_LEN + ip.header_len() + udp::HEADER_SIZE + HEADER_LEN;
    if frame.len() < inner_offset + ethernet::HEADER_LEN {
        return Err(Error::Parse("VXLAN inner frame too short".into()));
    }
    Ok(Some(Encapsulated {
        outer_src_ip: ip.src_addr(),
        outer_dst_ip: ip.dst_addr(),
        dst_port: udp.dst_port(),
        vni,
        inner_offset,
    }))
}

/// Strip outer headers, leaving the inner frame in `frame`.
pub fn decapsulate(frame: &mut Vec<u8>, encap: &Encapsulated) {
    frame.drain(..encap.inner_offset);
}
