//! Ethernet frame parsing and construction

use super::{EtherType, MacAddr};
use crate::{Error, Result};

/// Ethernet header length (no VLAN tag)
pub const HEADER_LEN: usize = 14;
/// Maximum Ethernet frame size (without FCS)
pub const MAX_FRAME_SIZE: usize = 1518;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame from a buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_LEN {
            return Err(Error::Parse("frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
            self.buffer[5],
        ])
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr([
            self.buffer[6],
            self.buffer[7],
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
            self.buffer[11],
        ])
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn is_ipv4(&self) -> bool {
        self.ethertype() == EtherType::Ipv4 as u16
    }

    pub fn is_arp(&self) -> bool {
        self.ethertype() == EtherType::Arp as u16
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }
}

/// Overwrite the destination MAC of the frame in `buf`.
pub fn set_dst_mac(buf: &mut [u8], mac: MacAddr) {
    buf[0..6].copy_from_slice(&mac.0);
}

/// Overwrite the source MAC of the frame in `buf`.
pub fn set_src_mac(buf: &mut [u8], mac: MacAddr) {
    buf[6..12].copy_from_slice(&mac.0);
}

/// Swap source and destination MACs in place.
pub fn swap_macs(buf: &mut [u8]) {
    for i in 0..6 {
        buf.swap(i, i + 6);
    }
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
