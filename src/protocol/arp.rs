//! ARP (Address Resolution Protocol) - RFC 826

use super::ethernet::{FrameBuilder, HEADER_LEN};
use super::{EtherType, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ARP packet size (for Ethernet/IPv4)
pub const ARP_PACKET_SIZE: usize = 28;

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP packet (Ethernet/IPv4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an Ethernet/IPv4 ARP body
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::Parse("ARP packet too short".into()));
        }

        let htype = u16::from_be_bytes([buffer[0], buffer[1]]);
        let ptype = u16::from_be_bytes([buffer[2], buffer[3]]);
        if htype != 1 || ptype != EtherType::Ipv4 as u16 || buffer[4] != 6 || buffer[5] != 4 {
            return Err(Error::Parse("unsupported ARP hardware/protocol".into()));
        }

        let operation = ArpOp::from_u16(u16::from_be_bytes([buffer[6], buffer[7]]))
            .ok_or_else(|| Error::Parse("invalid ARP operation".into()))?;

        let mac_at = |off: usize| {
            MacAddr::from_slice(&buffer[off..]).ok_or_else(|| Error::Parse("ARP truncated".into()))
        };
        let ip_at = |off: usize| {
            Ipv4Addr::new(buffer[off], buffer[off + 1], buffer[off + 2], buffer[off + 3])
        };

        Ok(Self {
            operation,
            sender_mac: mac_at(8)?,
            sender_ip: ip_at(14),
            target_mac: mac_at(18)?,
            target_ip: ip_at(24),
        })
    }

    /// Write the ARP body into `buf`, which must hold `ARP_PACKET_SIZE` bytes.
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&1u16.to_be_bytes());
        buf[2..4].copy_from_slice(&(EtherType::Ipv4 as u16).to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        self.write(&mut buf);
        buf
    }

    /// Create an ARP request
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Reply answering this request on behalf of `mac`.
    pub fn answer(&self, mac: MacAddr) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac: mac,
            sender_ip: self.target_ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Target IP == sender IP
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }

    /// Full Ethernet frame carrying this packet.
    pub fn to_frame(&self, dst: MacAddr) -> Vec<u8> {
        FrameBuilder::new()
            .dst_mac(dst)
            .src_mac(self.sender_mac)
            .ethertype(EtherType::Arp as u16)
            .payload(&self.to_bytes())
            .build()
    }
}

/// Turn the ARP request frame in `frame` into a reply from `mac`, in place.
pub fn reply_in_place(frame: &mut [u8], mac: MacAddr) -> Result<ArpPacket> {
    let body = frame
        .get_mut(HEADER_LEN..HEADER_LEN + ARP_PACKET_SIZE)
        .ok_or_else(|| Error::Parse("ARP frame too short".into()))?;
    let request = ArpPacket::parse(body)?;
    if request.operation != ArpOp::Request {
        return Err(Error::Parse("not an ARP request".into()));
    }
    let reply = request.answer(mac);
    reply.write(body);
    frame[0..6].copy_from_slice(&request.sender_mac.0);
    frame[6..12].copy_from_slice(&mac.0);
    Ok(reply)
}
