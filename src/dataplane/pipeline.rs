//! Hook pipeline
//!
//! ```text
//! Received -> PreRouting -> RouteDecision -+-> Local
//!                                          +-> Forwarding -> PostRouting -> Transmit
//! ```
//!
//! Any stage may drop. Drop reasons are only recorded in the namespace
//! counters.

use std::net::Ipv4Addr;
use tracing::{debug, trace};

use super::alg::{ftp, AlgVerdict, FtpMode};
use super::datapath::Datapath;
use super::interface::{Interface, InterfaceKind};
use super::namespace::Namespace;
use super::route::{RouteClass, RouteClasses};
use super::rules::{Direction, Hook, PacketMeta, Target};
use crate::protocol::arp::{self, ArpOp, ArpPacket};
use crate::protocol::ethernet::{self, Frame};
use crate::protocol::icmp;
use crate::protocol::ipv4::{self, Ipv4Header, Ipv4PacketMut, Protocol};
use crate::protocol::EtherType;

/// Outcome for the frame handed to [`Datapath::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Send the buffer on `egress`
    Accept { egress: String },
    Drop,
}

impl Verdict {
    pub fn is_drop(&self) -> bool {
        matches!(self, Verdict::Drop)
    }
}

/// Sink for extra frames produced while processing one packet.
pub trait Transmit {
    fn transmit(&mut self, egress: &str, frame: &[u8]);
}

impl Transmit for Vec<(String, Vec<u8>)> {
    fn transmit(&mut self, egress: &str, frame: &[u8]) {
        self.push((egress.to_string(), frame.to_vec()));
    }
}

const IP_OFFSET: usize = ethernet::HEADER_LEN;

fn direction_of(iface: &Interface) -> Direction {
    if iface.is_physical() {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Parse and sanity-check the IPv4 header of `frame`.
fn ingress_meta(frame: &[u8], direction: Direction) -> Option<PacketMeta> {
    let ip = Ipv4Header::parse(&frame[IP_OFFSET..]).ok()?;
    if !ip.checksum_ok() || ip.dst_addr().is_multicast() {
        return None;
    }
    PacketMeta::from_ipv4(&frame[IP_OFFSET..], direction).ok()
}

impl Datapath {
    pub(super) fn run_pipeline(
        &self,
        ns: &Namespace,
        ingress: &Interface,
        buf: &mut Vec<u8>,
        tx: &mut dyn Transmit,
    ) -> Verdict {
        let stats = &ns.stats;
        stats.input.inc();
        ingress.stats.record_rx(buf.len());

        let ethertype = match Frame::parse(buf) {
            Ok(eth) => eth.ethertype(),
            Err(_) => {
                stats.header_error.inc();
                return Verdict::Drop;
            }
        };
        match EtherType::from_u16(ethertype) {
            Some(EtherType::Arp) => return self.handle_arp(ns, ingress, buf, tx),
            Some(EtherType::Ipv4) => {}
            _ => {
                trace!(namespace = %ns.name, ethertype, "unsupported ethertype");
                stats.header_error.inc();
                return Verdict::Drop;
            }
        }

        let Some(mut meta) = ingress_meta(buf, direction_of(ingress)) else {
            trace!(namespace = %ns.name, "bad IPv4 header");
            stats.header_error.inc();
            return Verdict::Drop;
        };

        // PreRouting
        if !self.filter(ns, Hook::PreRouting, &meta) {
            return Verdict::Drop;
        }
        if let Some(new) = self.nat(ns, Hook::PreRouting, meta.dst_ip, buf) {
            meta.dst_ip = new;
        }

        // RouteDecision
        let route = match ns.routes().lookup(meta.dst_ip, RouteClasses::ALL) {
            Ok(route) => route.clone(),
            Err(_) => {
                trace!(namespace = %ns.name, dst = %meta.dst_ip, "no route");
                stats.route_error.inc();
                return Verdict::Drop;
            }
        };
        if route.class == RouteClass::Local {
            return self.deliver_local(ns, ingress, buf, &meta, tx);
        }

        // Forwarding
        let Some(egress) = ns.interface(&route.interface) else {
            stats.route_error.inc();
            return Verdict::Drop;
        };
        let Some(_egress_guard) = egress.acquire() else {
            stats.route_error.inc();
            return Verdict::Drop;
        };
        if !self.filter(ns, Hook::Forwarding, &meta) {
            return Verdict::Drop;
        }
        let expired = match Ipv4PacketMut::new(&mut buf[IP_OFFSET..]) {
            Ok(mut ip) => !ip.decrement_ttl(),
            Err(_) => {
                stats.header_error.inc();
                return Verdict::Drop;
            }
        };
        if expired {
            trace!(namespace = %ns.name, src = %meta.src_ip, "ttl expired");
            stats.ttl_expired.inc();
            return Verdict::Drop;
        }

        // PostRouting
        if !self.filter(ns, Hook::PostRouting, &meta) {
            return Verdict::Drop;
        }
        if let Some(new) = self.nat(ns, Hook::PostRouting, meta.src_ip, buf) {
            meta.src_ip = new;
        }
        if !ingress.is_physical() && egress.is_physical() && meta.protocol == Protocol::Tcp as u8 {
            if let (Some(sport), Some(dport)) = (meta.src_port, meta.dst_port) {
                if let Some(mode) = FtpMode::for_ports(sport, dport) {
                    if ftp::process(buf, mode, self.limits.mtu) == AlgVerdict::Drop {
                        stats.alg_drop.inc();
                        return Verdict::Drop;
                    }
                }
            }
        }

        // Transmit
        let target = route.next_hop.unwrap_or(meta.dst_ip);
        self.transmit(ns, &egress, buf, Some(target), tx)
    }

    /// Evaluate the filter table; false means drop.
    fn filter(&self, ns: &Namespace, hook: Hook, meta: &PacketMeta) -> bool {
        match ns.filters().evaluate(hook, meta) {
            Some(Target::Drop) => {
                trace!(namespace = %ns.name, %hook, src = %meta.src_ip, dst = %meta.dst_ip, "filtered");
                ns.stats.filter_drop.inc();
                false
            }
            Some(Target::Accept) | None => true,
        }
    }

    /// Apply the NAT rule for `addr` at `hook`, returning the translated
    /// address on a hit.
    fn nat(&self, ns: &Namespace, hook: Hook, addr: Ipv4Addr, buf: &mut [u8]) -> Option<Ipv4Addr> {
        let nat = ns.nat();
        let rule = nat.lookup(hook, addr)?;
        match rule.apply(&mut buf[IP_OFFSET..]) {
            Ok(()) => {
                ns.stats.nat_hits.inc();
                trace!(namespace = %ns.name, %hook, kind = %rule.kind, from = %addr, to = %rule.translated, "nat");
                Some(rule.translated)
            }
            Err(e) => {
                debug!(namespace = %ns.name, %hook, error = %e, "nat rewrite failed");
                None
            }
        }
    }

    /// Answer ICMP echo addressed to the router; drop everything else.
    fn deliver_local(
        &self,
        ns: &Namespace,
        ingress: &Interface,
        buf: &mut Vec<u8>,
        meta: &PacketMeta,
        tx: &mut dyn Transmit,
    ) -> Verdict {
        if meta.protocol == Protocol::Icmp as u8 && echo_reply(buf).is_some() {
            ethernet::swap_macs(buf);
            ns.stats.local_delivered.inc();
            return self.transmit(ns, ingress, buf, None, tx);
        }
        trace!(namespace = %ns.name, dst = %meta.dst_ip, protocol = meta.protocol, "local drop");
        ns.stats.local_dropped.inc();
        Verdict::Drop
    }

    /// Learn from ARP seen on the physical side and answer requests for
    /// the ingress interface's addresses.
    fn handle_arp(
        &self,
        ns: &Namespace,
        ingress: &Interface,
        buf: &mut Vec<u8>,
        tx: &mut dyn Transmit,
    ) -> Verdict {
        let Ok(packet) = ArpPacket::parse(&buf[IP_OFFSET..]) else {
            ns.stats.header_error.inc();
            return Verdict::Drop;
        };
        if ingress.is_physical() && !packet.sender_ip.is_unspecified() {
            ns.neighbors.learn(packet.sender_ip, packet.sender_mac);
        }
        if packet.operation == ArpOp::Request
            && ingress.owns(packet.target_ip)
            && arp::reply_in_place(buf, ingress.mac).is_ok()
        {
            ns.stats.local_delivered.inc();
            return self.transmit(ns, ingress, buf, None, tx);
        }
        ns.stats.local_dropped.inc();
        Verdict::Drop
    }

    /// Hand the frame to `egress`, resolving link-layer addresses.
    ///
    /// `target` is the IP whose MAC is resolved; `None` keeps the
    /// destination MAC already in the frame.
    fn transmit(
        &self,
        ns: &Namespace,
        egress: &Interface,
        buf: &mut Vec<u8>,
        target: Option<Ipv4Addr>,
        tx: &mut dyn Transmit,
    ) -> Verdict {
        ethernet::set_src_mac(buf, egress.mac);
        match egress.kind {
            InterfaceKind::Physical => {
                if let Some(ip) = target {
                    let resolved = ns.neighbors.lookup(ip).or_else(|| {
                        ns.neighbors.mark_incomplete(ip);
                        self.vtep.gateway_mac
                    });
                    match resolved {
                        Some(mac) => ethernet::set_dst_mac(buf, mac),
                        None => {
                            debug!(namespace = %ns.name, %ip, "no underlay neighbor");
                            ns.stats.neighbor_error.inc();
                            egress.stats.record_tx_drop();
                            return Verdict::Drop;
                        }
                    }
                }
                ns.stats.output.inc();
                egress.stats.record_tx(buf.len());
                Verdict::Accept {
                    egress: egress.name.clone(),
                }
            }
            InterfaceKind::Tunnel { vni } => {
                let sent = self.tunnels.get(vni).and_then(|device| {
                    let _guard = device.acquire()?;
                    match device.send(buf, target, &self.vtep, &egress.name, tx) {
                        Ok(n) => Some(n),
                        Err(e) => {
                            debug!(namespace = %ns.name, vni, error = %e, "tunnel send failed");
                            None
                        }
                    }
                });
                match sent {
                    Some(n) => {
                        ns.stats.output.add(n as u64);
                        for _ in 0..n {
                            egress.stats.record_tx(buf.len());
                        }
                        Verdict::Accept {
                            egress: egress.name.clone(),
                        }
                    }
                    None => {
                        ns.stats.neighbor_error.inc();
                        egress.stats.record_tx_drop();
                        Verdict::Drop
                    }
                }
            }
        }
    }
}

/// Turn an ICMP echo request into its reply: addresses swapped, TTL reset.
fn echo_reply(buf: &mut [u8]) -> Option<()> {
    let ip = Ipv4Header::parse(&buf[IP_OFFSET..]).ok()?;
    let start = IP_OFFSET + ip.header_len();
    let end = IP_OFFSET + ip.total_length() as usize;
    icmp::echo_reply_in_place(&mut buf[start..end]).ok()?;

    let mut ip = Ipv4PacketMut::new(&mut buf[IP_OFFSET..]).ok()?;
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    ip.set_src_addr(dst);
    ip.set_dst_addr(src);
    ip.set_ttl(ipv4::DEFAULT_TTL);
    Some(())
}
