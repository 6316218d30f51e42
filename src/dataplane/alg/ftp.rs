//! FTP control-channel gateway
//!
//! Rewrites the address literal carried by `PORT`/`EPRT` commands and
//! `227`/`229` replies so that it matches the (translated) source address
//! of the packet carrying it.
//!
//! ```text
//! PORT 192,168,1,1,200,1\r\n
//! EPRT |1|132.235.1.2|6275|\r\n
//! 227 Entering Passive Mode (192,168,1,1,200,1)\r\n
//! 229 Entering Extended Passive Mode (|||6446|)\r\n
//! ```

use std::net::Ipv4Addr;
use tracing::{debug, trace};

use super::AlgVerdict;
use crate::protocol::ethernet;
use crate::protocol::ipv4::{Ipv4Header, Ipv4PacketMut, Protocol};
use crate::protocol::tcp::{self, TcpHeader};

pub const FTP_CONTROL_PORT: u16 = 21;

/// Which side of the control connection the packet comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpMode {
    /// Client commands (destination port 21)
    Active,
    /// Server replies (source port 21)
    Passive,
}

impl FtpMode {
    /// Mode for a TCP segment, or `None` if neither port is 21.
    pub fn for_ports(src_port: u16, dst_port: u16) -> Option<Self> {
        if dst_port == FTP_CONTROL_PORT {
            Some(FtpMode::Active)
        } else if src_port == FTP_CONTROL_PORT {
            Some(FtpMode::Passive)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpCommand {
    Port,
    Eprt,
    Pasv,
    Epsv,
}

struct Search {
    pattern: &'static [u8],
    skip: u8,
    term: u8,
    command: FtpCommand,
}

const ACTIVE: [Search; 2] = [
    Search {
        pattern: b"PORT",
        skip: b' ',
        term: b'\r',
        command: FtpCommand::Port,
    },
    Search {
        pattern: b"EPRT",
        skip: b' ',
        term: b'\r',
        command: FtpCommand::Eprt,
    },
];

const PASSIVE: [Search; 2] = [
    Search {
        pattern: b"227 ",
        skip: b'(',
        term: b')',
        command: FtpCommand::Pasv,
    },
    Search {
        pattern: b"229 ",
        skip: b'(',
        term: b')',
        command: FtpCommand::Epsv,
    },
];

/// A complete address literal found in a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtpMatch {
    pub command: FtpCommand,
    /// Offset of the literal; the skip delimiter sits just before it
    pub offset: usize,
    pub len: usize,
    /// Embedded address (unspecified for EPSV)
    pub ip: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    NoMatch,
    /// A pattern matched but the literal is incomplete
    Partial,
    Found(FtpMatch),
}

/// Scan a control-channel payload for the patterns of `mode`.
pub fn scan(payload: &[u8], mode: FtpMode) -> Scan {
    let searches = match mode {
        FtpMode::Active => &ACTIVE,
        FtpMode::Passive => &PASSIVE,
    };
    for search in searches {
        match find_pattern(payload, search) {
            Scan::NoMatch => continue,
            found => return found,
        }
    }
    Scan::NoMatch
}

fn find_pattern(data: &[u8], search: &Search) -> Scan {
    let plen = search.pattern.len();
    if data.is_empty() {
        return Scan::NoMatch;
    }
    if data.len() <= plen {
        return if data.eq_ignore_ascii_case(&search.pattern[..data.len()]) {
            Scan::Partial
        } else {
            Scan::NoMatch
        };
    }
    if !data[..plen].eq_ignore_ascii_case(search.pattern) {
        return Scan::NoMatch;
    }

    let Some(skip) = data[plen..].iter().position(|&b| b == search.skip) else {
        return Scan::Partial;
    };
    let offset = plen + skip + 1;
    let literal = &data[offset..];

    let parsed = match search.command {
        FtpCommand::Port | FtpCommand::Pasv => try_rfc959(literal, search.term),
        FtpCommand::Eprt => try_eprt(literal),
        FtpCommand::Epsv => try_epsv(literal),
    };
    match parsed {
        Some((len, ip, port)) => Scan::Found(FtpMatch {
            command: search.command,
            offset,
            len,
            ip,
            port,
        }),
        None => Scan::Partial,
    }
}

/// Parse `N` decimal numbers (each at most `max`) separated by `sep` and
/// ended by `term`. Returns the numbers and the length before `term`.
fn try_numbers<const N: usize>(data: &[u8], sep: u8, term: u8, max: u32) -> Option<([u32; N], usize)> {
    let mut nums = [0u32; N];
    let mut i = 0;
    let mut digits = 0;
    for (len, &b) in data.iter().enumerate() {
        match b {
            b'0'..=b'9' => {
                nums[i] = nums[i] * 10 + (b - b'0') as u32;
                if nums[i] > max {
                    trace!(len, "ftp: number out of range");
                    return None;
                }
                digits += 1;
            }
            _ if b == sep && i + 1 < N && digits > 0 => {
                i += 1;
                digits = 0;
            }
            _ if b == term && i + 1 == N && digits > 0 => return Some((nums, len)),
            _ => {
                trace!(len, got = i, "ftp: unexpected character");
                return None;
            }
        }
    }
    None
}

fn octets(n: &[u32]) -> Ipv4Addr {
    Ipv4Addr::new(n[0] as u8, n[1] as u8, n[2] as u8, n[3] as u8)
}

/// `a,b,c,d,p1,p2`
fn try_rfc959(data: &[u8], term: u8) -> Option<(usize, Ipv4Addr, u16)> {
    let (n, len) = try_numbers::<6>(data, b',', term, 255)?;
    Some((len, octets(&n), ((n[4] << 8) | n[5]) as u16))
}

fn is_delimiter(b: u8) -> bool {
    (33..=126).contains(&b) && !b.is_ascii_digit()
}

/// Port digits from `start` up to `delim`; returns the offset past `delim`.
fn get_port(data: &[u8], start: usize, delim: u8) -> Option<(usize, u16)> {
    let mut port: u32 = 0;
    for (i, &b) in data.iter().enumerate().skip(start) {
        match b {
            b'0'..=b'9' => {
                port = port * 10 + (b - b'0') as u32;
                if port > u16::MAX as u32 {
                    return None;
                }
            }
            _ if b == delim && port != 0 => return Some((i + 1, port as u16)),
            _ => return None,
        }
    }
    None
}

/// `|1|a.b.c.d|port|`
fn try_eprt(data: &[u8]) -> Option<(usize, Ipv4Addr, u16)> {
    if data.len() <= 3 {
        return None;
    }
    let delim = data[0];
    if !is_delimiter(delim) || data[2] != delim {
        return None;
    }
    if data[1] != b'1' {
        trace!("ftp: EPRT family is not IPv4");
        return None;
    }
    let (n, len) = try_numbers::<4>(&data[3..], b'.', delim, 255)?;
    let (end, port) = get_port(data, 3 + len + 1, delim)?;
    Some((end, octets(&n), port))
}

/// `|||port|`
fn try_epsv(data: &[u8]) -> Option<(usize, Ipv4Addr, u16)> {
    if data.len() <= 3 {
        return None;
    }
    let delim = data[0];
    if !is_delimiter(delim) || data[1] != delim || data[2] != delim {
        return None;
    }
    let (end, port) = get_port(data, 3, delim)?;
    Some((end, Ipv4Addr::UNSPECIFIED, port))
}

/// Encode `ip`/`port` in the grammar of `m`, or `None` if the literal is
/// never rewritten.
fn replacement(m: &FtpMatch, delim: u8, ip: Ipv4Addr) -> Option<Vec<u8>> {
    let [a, b, c, d] = ip.octets();
    match m.command {
        FtpCommand::Port | FtpCommand::Pasv => Some(
            format!("{},{},{},{},{},{}", a, b, c, d, m.port >> 8, m.port & 0xff).into_bytes(),
        ),
        FtpCommand::Eprt => {
            let d_ = delim as char;
            Some(format!("{d_}1{d_}{a}.{b}.{c}.{d}{d_}{}{d_}", m.port).into_bytes())
        }
        FtpCommand::Epsv => None,
    }
}

/// Splice `rep` over the literal of `m` inside `payload`.
///
/// Shorter replacements are padded with leading spaces ahead of the skip
/// delimiter so the payload keeps its length. Returns the new payload.
fn mangle(payload: &[u8], m: &FtpMatch, rep: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + rep.len());
    if rep.len() <= m.len {
        let skip = payload[m.offset - 1];
        let pad = m.len - rep.len();
        out.extend_from_slice(&payload[..m.offset - 1]);
        out.resize(out.len() + pad, b' ');
        out.push(skip);
    } else {
        out.extend_from_slice(&payload[..m.offset]);
    }
    out.extend_from_slice(rep);
    out.extend_from_slice(&payload[m.offset + m.len..]);
    out
}

/// Run the gateway over an Ethernet frame carrying an IPv4/TCP segment.
///
/// `mtu` bounds the IP packet size when a rewrite grows the payload.
pub fn process(frame: &mut Vec<u8>, mode: FtpMode, mtu: usize) -> AlgVerdict {
    let ip_off = ethernet::HEADER_LEN;
    let Some(ip_bytes) = frame.get(ip_off..) else {
        return AlgVerdict::Unchanged;
    };
    let Ok(ip) = Ipv4Header::parse(ip_bytes) else {
        return AlgVerdict::Unchanged;
    };
    if ip.protocol() != Protocol::Tcp as u8 {
        return AlgVerdict::Unchanged;
    }
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let ip_hlen = ip.header_len();
    let ip_total = ip.total_length() as usize;
    let Ok(tcp_hdr) = TcpHeader::parse(ip.payload()) else {
        return AlgVerdict::Unchanged;
    };
    let tcp_off = ip_off + ip_hlen;
    let payload_off = tcp_off + tcp_hdr.header_len();
    let end = ip_off + ip_total;
    if payload_off > end {
        return AlgVerdict::Unchanged;
    }

    let payload = &frame[payload_off..end];
    let m = match scan(payload, mode) {
        Scan::NoMatch => return AlgVerdict::Unchanged,
        Scan::Partial => {
            debug!(?mode, len = payload.len(), "ftp: partial match");
            return AlgVerdict::Drop;
        }
        Scan::Found(m) => m,
    };
    if m.command == FtpCommand::Epsv || m.ip == src {
        return AlgVerdict::Unchanged;
    }
    let Some(rep) = replacement(&m, payload[m.offset], src) else {
        return AlgVerdict::Unchanged;
    };

    let new_payload = mangle(payload, &m, &rep);
    let new_total = ip_total - payload.len() + new_payload.len();
    let total_length = match u16::try_from(new_total) {
        Ok(len) if new_total <= mtu => len,
        _ => {
            debug!(new_total, mtu, "ftp: rewrite exceeds mtu");
            return AlgVerdict::Drop;
        }
    };

    frame.truncate(payload_off);
    frame.extend_from_slice(&new_payload);

    let Ok(mut pkt) = Ipv4PacketMut::new(&mut frame[ip_off..]) else {
        return AlgVerdict::Drop;
    };
    pkt.set_total_length(total_length);
    pkt.update_checksum();
    tcp::update_checksum(&mut frame[tcp_off..], src, dst);
    debug!(command = ?m.command, from = %m.ip, to = %src, "ftp: rewrote address literal");
    AlgVerdict::Rewritten
}
