//! Router fixture and hand-built frames

use std::net::Ipv4Addr;
use std::sync::Arc;

use vrouter::control::Controller;
use vrouter::dataplane::tunnel::RemoteEndpoint;
use vrouter::dataplane::{Datapath, InterfaceKind, InterfaceSpec, Limits, Verdict, Vtep};
use vrouter::protocol::ethernet::{self, FrameBuilder};
use vrouter::protocol::icmp::EchoRequestBuilder;
use vrouter::protocol::ipv4::{Ipv4Builder, Ipv4Header, Protocol};
use vrouter::protocol::tcp::TcpBuilder;
use vrouter::protocol::udp::UdpBuilder;
use vrouter::protocol::vxlan::{self, OuterHeader};
use vrouter::protocol::{EtherType, MacAddr};

pub const UPLINK: &str = "uplink0";
pub const VNI: u32 = 100;

pub const VTEP_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const VTEP_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0xff, 0x01]);
pub const UNDERLAY_GW_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0xff, 0xfe]);
pub const REMOTE_VTEP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

pub const TAP_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const TAP_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const ETH_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
pub const ETH_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

/// Tenant VM behind the tunnel
pub const VM_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x05]);
pub const VM_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const FLOATING_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 50);

/// Host on the internet side
pub const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0xee, 0x01]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 20);

pub struct Router {
    pub ctl: Controller,
    pub dp: Arc<Datapath>,
}

impl Router {
    /// Empty router with an underlay gateway.
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let vtep = Vtep {
            ip: VTEP_IP,
            mac: VTEP_MAC,
            gateway_mac: Some(UNDERLAY_GW_MAC),
            udp_port: vxlan::DEFAULT_PORT,
        };
        let dp = Arc::new(Datapath::new(vtep, UPLINK, limits));
        let ctl = Controller::new(Arc::clone(&dp));
        Self { ctl, dp }
    }

    /// Router with namespace "blue": tap0 on VNI 100 (10.0.0.1/24) and
    /// eth0 physical (203.0.113.5/24). The VM at 10.0.0.5 sits behind
    /// REMOTE_VTEP.
    pub fn tenant() -> Self {
        Self::tenant_with_limits(Limits::default())
    }

    pub fn tenant_with_limits(limits: Limits) -> Self {
        let r = Self::with_limits(limits);
        r.ctl.create_namespace("blue").unwrap();
        r.ctl
            .add_interface("blue", spec("tap0", InterfaceKind::Tunnel { vni: VNI }, TAP_MAC, "10.0.0.1/24"))
            .unwrap();
        r.ctl
            .add_interface("blue", spec("eth0", InterfaceKind::Physical, ETH_MAC, "203.0.113.5/24"))
            .unwrap();
        r.ctl.add_forwarding_entry(VNI, VM_MAC, remote(REMOTE_VTEP)).unwrap();
        r.ctl.add_neighbor_entry(VNI, VM_IP, VM_MAC).unwrap();
        r
    }

    /// Run one frame, returning the verdict, the (possibly rewritten)
    /// frame and any extra fan-out copies.
    pub fn process(&self, frame: Vec<u8>, ingress: &str) -> (Verdict, Vec<u8>, Vec<(String, Vec<u8>)>) {
        let mut buf = frame;
        let mut extra = Vec::new();
        let verdict = self.dp.process(&mut buf, ingress, &mut extra);
        (verdict, buf, extra)
    }

    pub fn counter(&self, ns: &str, name: &str) -> u64 {
        self.ctl
            .show_namespace(ns)
            .unwrap()
            .counters
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("no counter {}", name))
    }
}

pub fn spec(name: &str, kind: InterfaceKind, mac: MacAddr, address: &str) -> InterfaceSpec {
    InterfaceSpec {
        name: name.into(),
        kind,
        mac,
        address: address.parse().unwrap(),
    }
}

pub fn remote(ip: Ipv4Addr) -> RemoteEndpoint {
    RemoteEndpoint {
        ip,
        port: vxlan::DEFAULT_PORT,
        vni: VNI,
    }
}

pub fn ethernet(dst: MacAddr, src: MacAddr, ip_packet: &[u8]) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(src)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(ip_packet)
        .build()
}

fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: Protocol, payload: &[u8], ttl: u8) -> Vec<u8> {
    Ipv4Builder::new()
        .src_addr(src)
        .dst_addr(dst)
        .protocol(protocol as u8)
        .ttl(ttl)
        .payload(payload)
        .build()
}

pub fn udp(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, data: &[u8]) -> Vec<u8> {
    let seg = UdpBuilder::new().src_port(sport).dst_port(dport).payload(data).build(src, dst);
    ipv4(src, dst, Protocol::Udp, &seg, 64)
}

pub fn tcp(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16, data: &[u8]) -> Vec<u8> {
    let seg = TcpBuilder::new()
        .src_port(sport)
        .dst_port(dport)
        .seq(1000)
        .ack(2000)
        .payload(data)
        .build(src, dst);
    ipv4(src, dst, Protocol::Tcp, &seg, 64)
}

pub fn ping(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Vec<u8> {
    let icmp = EchoRequestBuilder::new(7, 1).payload(b"abcdefgh").build();
    ipv4(src, dst, Protocol::Icmp, &icmp, ttl)
}

/// Frame from the VM as it arrives on tap0 (already decapsulated).
pub fn from_vm(ip_packet: &[u8]) -> Vec<u8> {
    ethernet(TAP_MAC, VM_MAC, ip_packet)
}

/// Frame from the internet as it arrives on the uplink.
pub fn from_internet(ip_packet: &[u8]) -> Vec<u8> {
    ethernet(ETH_MAC, PEER_MAC, ip_packet)
}

/// Wrap `inner` the way a remote VTEP would before sending it to us.
pub fn overlay(inner: &[u8], vni: u32) -> Vec<u8> {
    let mut frame = inner.to_vec();
    vxlan::encapsulate(
        &mut frame,
        &OuterHeader {
            src_mac: UNDERLAY_GW_MAC,
            dst_mac: VTEP_MAC,
            src_ip: REMOTE_VTEP,
            dst_ip: VTEP_IP,
            src_port: 40000,
            dst_port: vxlan::DEFAULT_PORT,
            vni,
        },
    );
    frame
}

/// Outer destination, VNI and inner frame of an encapsulated frame.
pub fn unwrap_overlay(frame: &[u8]) -> (Ipv4Addr, u32, Vec<u8>) {
    let enc = vxlan::classify(frame, vxlan::DEFAULT_PORT)
        .unwrap()
        .expect("not a VXLAN frame");
    (enc.outer_dst_ip, enc.vni, frame[enc.inner_offset..].to_vec())
}

/// IPv4 header of an Ethernet frame.
pub fn ip_of(frame: &[u8]) -> Ipv4Header<'_> {
    Ipv4Header::parse(&frame[ethernet::HEADER_LEN..]).unwrap()
}

pub fn dst_mac(frame: &[u8]) -> MacAddr {
    MacAddr::from_slice(&frame[0..6]).unwrap()
}

pub fn src_mac(frame: &[u8]) -> MacAddr {
    MacAddr::from_slice(&frame[6..12]).unwrap()
}

pub fn accepted(verdict: &Verdict, egress: &str) -> bool {
    matches!(verdict, Verdict::Accept { egress: e } if e == egress)
}
