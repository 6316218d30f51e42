//! IPv4 protocol - RFC 791

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// Default TTL for locally originated packets
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    /// Parse and sanity-check an IPv4 header.
    ///
    /// Rejects IHL < 5, a version other than 4, and a total length that is
    /// shorter than the header or longer than the buffer.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let ihl = (buffer[0] & 0x0F) as usize;
        if ihl < 5 {
            return Err(Error::Parse("IPv4 IHL below minimum".into()));
        }
        let header_len = ihl * 4;

        if buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        let total_length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        if total_length < header_len {
            return Err(Error::Parse("IPv4 total length below header length".into()));
        }
        if total_length > buffer.len() {
            return Err(Error::Parse("IPv4 packet truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    pub fn version(&self) -> u8 {
        self.buffer[0] >> 4
    }

    pub fn ihl(&self) -> u8 {
        self.buffer[0] & 0x0F
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Payload bounded by the total length field.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..self.total_length() as usize]
    }

    /// Validate header checksum
    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }

    /// A zero checksum field is accepted as "not computed".
    pub fn checksum_ok(&self) -> bool {
        self.checksum() == 0 || self.validate_checksum()
    }

    /// Get raw header bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.header_len]
    }
}

/// Calculate IPv4 header checksum
pub fn checksum(header: &[u8]) -> u16 {
    !fold(sum_words(header, 0))
}

/// Add big-endian 16-bit words of `data` to `sum`, zero-padding an odd tail.
pub fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

/// Fold a 32-bit one's-complement sum to 16 bits.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Incremental checksum update (RFC 1624, eqn. 3)
///
/// Used when only specific fields change (addresses, ports, TTL)
pub fn incremental_checksum_update(old_checksum: u16, old_value: u16, new_value: u16) -> u16 {
    let sum = (!old_checksum) as u32 + (!old_value) as u32 + new_value as u32;
    !fold(sum)
}

/// Incremental update for a changed 32-bit field such as an address.
pub fn incremental_checksum_update_u32(old_checksum: u16, old_value: u32, new_value: u32) -> u16 {
    let c = incremental_checksum_update(
        old_checksum,
        (old_value >> 16) as u16,
        (new_value >> 16) as u16,
    );
    incremental_checksum_update(c, old_value as u16, new_value as u16)
}

/// Mutable view over an IPv4 packet held in a caller-owned buffer
#[derive(Debug)]
pub struct Ipv4PacketMut<'a> {
    buffer: &'a mut [u8],
    header_len: usize,
}

impl<'a> Ipv4PacketMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Result<Self> {
        let header_len = Ipv4Header::parse(buffer)?.header_len();
        Ok(Self { buffer, header_len })
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    /// Decrement TTL and update checksum
    /// Returns false if TTL would become 0 (packet should be dropped)
    pub fn decrement_ttl(&mut self) -> bool {
        let ttl = self.buffer[8];
        if ttl <= 1 {
            return false;
        }
        self.set_ttl(ttl - 1);
        true
    }

    /// Set TTL and adjust the checksum incrementally
    pub fn set_ttl(&mut self, ttl: u8) {
        let old = u16::from_be_bytes([self.buffer[8], self.buffer[9]]);
        self.buffer[8] = ttl;
        let new = u16::from_be_bytes([self.buffer[8], self.buffer[9]]);
        let sum = incremental_checksum_update(self.checksum(), old, new);
        self.set_checksum(sum);
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    fn set_checksum(&mut self, sum: u16) {
        self.buffer[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Rewrite the source address, adjusting the header checksum
    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        let old = u32::from(self.src_addr());
        self.buffer[12..16].copy_from_slice(&addr.octets());
        let sum = incremental_checksum_update_u32(self.checksum(), old, u32::from(addr));
        self.set_checksum(sum);
    }

    /// Rewrite the destination address, adjusting the header checksum
    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        let old = u32::from(self.dst_addr());
        self.buffer[16..20].copy_from_slice(&addr.octets());
        let sum = incremental_checksum_update_u32(self.checksum(), old, u32::from(addr));
        self.set_checksum(sum);
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Set total length; the caller recomputes the checksum.
    pub fn set_total_length(&mut self, len: u16) {
        self.buffer[2..4].copy_from_slice(&len.to_be_bytes());
    }

    /// Recalculate and update header checksum
    pub fn update_checksum(&mut self) {
        self.set_checksum(0);
        let sum = checksum(&self.buffer[..self.header_len]);
        self.set_checksum(sum);
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }
}

/// Builder for constructing IPv4 packets
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    dont_fragment: bool,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            identification: 0,
            dont_fragment: true,
            ttl: DEFAULT_TTL,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn dont_fragment(mut self, df: bool) -> Self {
        self.dont_fragment = df;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = vec![0u8; MIN_HEADER_SIZE];

        // Version (4) + IHL (5)
        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        if self.dont_fragment {
            buffer[6] = 0x40;
        }
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());

        let sum = checksum(&buffer);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
