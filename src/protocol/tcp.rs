//! TCP protocol - RFC 793
//!
//! Header access and checksums for NAT and payload rewriting.

use super::ipv4::{fold, incremental_checksum_update, incremental_checksum_update_u32, sum_words};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

/// Byte offset of the checksum field
const CHECKSUM_OFFSET: usize = 16;

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    /// Parse TCP header from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP header too short".into()));
        }

        let data_offset = (buffer[12] >> 4) as usize;
        let header_len = data_offset * 4;

        if header_len < MIN_HEADER_SIZE {
            return Err(Error::Parse("TCP data offset too small".into()));
        }

        if buffer.len() < header_len {
            return Err(Error::Parse("TCP header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    /// Source port (offset 0-1)
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Destination port (offset 2-3)
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Sequence number (offset 4-7)
    pub fn seq_num(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ])
    }

    /// Acknowledgment number (offset 8-11)
    pub fn ack_num(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
            self.buffer[11],
        ])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[16], self.buffer[17]])
    }

    /// Header length in bytes
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Payload (TCP data after header)
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    /// Validate checksum with pseudo-header
    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Calculate TCP checksum with pseudo-header
///
/// Pseudo-header:
/// ```text
/// +--------+--------+--------+--------+
/// |          Source Address           |
/// +--------+--------+--------+--------+
/// |        Destination Address        |
/// +--------+--------+--------+--------+
/// |  Zero  |Protocol|   TCP Length    |
/// +--------+--------+--------+--------+
/// ```
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, tcp_segment: &[u8]) -> u16 {
    !fold(pseudo_header_sum(
        src_ip,
        dst_ip,
        PROTOCOL_NUMBER,
        tcp_segment,
    ))
}

/// One's-complement sum of pseudo-header plus `data`, unfolded.
pub(crate) fn pseudo_header_sum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, proto: u8, data: &[u8]) -> u32 {
    let mut sum = sum_words(&src_ip.octets(), 0);
    sum = sum_words(&dst_ip.octets(), sum);
    sum += proto as u32;
    sum += data.len() as u32;
    sum_words(data, sum)
}

/// Recompute the checksum of the segment in place.
pub fn update_checksum(segment: &mut [u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) {
    segment[CHECKSUM_OFFSET] = 0;
    segment[CHECKSUM_OFFSET + 1] = 0;
    let sum = tcp_checksum(src_ip, dst_ip, segment);
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Adjust the checksum for a rewritten pseudo-header address.
pub fn adjust_checksum_for_addr(segment: &mut [u8], old: Ipv4Addr, new: Ipv4Addr) {
    let current = u16::from_be_bytes([segment[CHECKSUM_OFFSET], segment[CHECKSUM_OFFSET + 1]]);
    let sum = incremental_checksum_update_u32(current, u32::from(old), u32::from(new));
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Adjust the checksum for a rewritten 16-bit word of the segment.
pub fn adjust_checksum_for_word(segment: &mut [u8], old: u16, new: u16) {
    let current = u16::from_be_bytes([segment[CHECKSUM_OFFSET], segment[CHECKSUM_OFFSET + 1]]);
    let sum = incremental_checksum_update(current, old, new);
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

/// Minimal TCP segment builder (ACK|PSH, no options)
#[derive(Debug, Clone, Default)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    payload: Vec<u8>,
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut seg = vec![0u8; MIN_HEADER_SIZE];
        seg[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        seg[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        seg[4..8].copy_from_slice(&self.seq.to_be_bytes());
        seg[8..12].copy_from_slice(&self.ack.to_be_bytes());
        seg[12] = 0x50;
        seg[13] = 0x18;
        seg[14..16].copy_from_slice(&0xFFFFu16.to_be_bytes());
        seg.extend_from_slice(&self.payload);
        update_checksum(&mut seg, src_ip, dst_ip);
        seg
    }
}
