//! Overlay ingress demultiplexing and tunnel egress

use std::net::Ipv4Addr;

use vrouter::dataplane::tunnel::encap::{SRC_PORT_MIN, SRC_PORT_RANGE};
use vrouter::dataplane::{InterfaceKind, Verdict};
use vrouter::protocol::udp::UdpHeader;
use vrouter::protocol::MacAddr;
use vrouter::Error;

use crate::harness::*;

const OTHER_VTEP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 11);

fn outer_src_port(frame: &[u8]) -> u16 {
    UdpHeader::parse(ip_of(frame).payload()).unwrap().src_port()
}

#[test]
fn test_overlay_ingress_reaches_member() {
    let r = Router::tenant();
    let inner = from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"q"));
    let (verdict, out, _) = r.process(overlay(&inner, VNI), UPLINK);

    assert!(accepted(&verdict, "eth0"), "{:?}", verdict);
    assert_eq!(ip_of(&out).dst_addr(), PEER_IP);
    assert_eq!(r.counter("blue", "input"), 1);
    assert_eq!(r.dp.unclaimed.get(), 0);
}

#[test]
fn test_overlay_demux_by_inner_mac() {
    let r = Router::tenant();
    let red_mac = MacAddr([0x02, 0, 0, 0, 0, 0x31]);
    r.ctl.create_namespace("red").unwrap();
    r.ctl
        .add_interface("red", spec("tap1", InterfaceKind::Tunnel { vni: VNI }, red_mac, "10.0.0.1/24"))
        .unwrap();

    let inner = ethernet(red_mac, VM_MAC, &udp(VM_IP, 1, Ipv4Addr::new(10, 0, 0, 99), 2, b"x"));
    let (verdict, _, _) = r.process(overlay(&inner, VNI), UPLINK);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("red", "input"), 1);
    assert_eq!(r.counter("blue", "input"), 0);
}

#[test]
fn test_unclaimed_uplink_frames() {
    let r = Router::tenant();
    let inner = from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x"));

    // Unknown VNI
    let (verdict, _, _) = r.process(overlay(&inner, 999), UPLINK);
    assert_eq!(verdict, Verdict::Drop);

    // Inner MAC belongs to no member
    let stray = ethernet(MacAddr([0x02, 0, 0, 0, 0, 0x77]), VM_MAC, &udp(VM_IP, 1, PEER_IP, 2, b"x"));
    let (verdict, _, _) = r.process(overlay(&stray, VNI), UPLINK);
    assert_eq!(verdict, Verdict::Drop);

    // Plain IPv4 to an address nobody owns
    let plain = from_internet(&udp(PEER_IP, 1, Ipv4Addr::new(203, 0, 113, 99), 2, b"x"));
    let (verdict, _, _) = r.process(plain, UPLINK);
    assert_eq!(verdict, Verdict::Drop);

    assert_eq!(r.dp.unclaimed.get(), 3);
    assert_eq!(r.counter("blue", "input"), 0);
}

#[test]
fn test_egress_encapsulation() {
    let r = Router::tenant();
    let (verdict, out, extra) =
        r.process(from_internet(&udp(PEER_IP, 4000, VM_IP, 8080, b"data")), "eth0");
    assert!(accepted(&verdict, "tap0"));
    assert!(extra.is_empty());

    assert_eq!(dst_mac(&out), UNDERLAY_GW_MAC);
    assert_eq!(src_mac(&out), VTEP_MAC);
    let outer = ip_of(&out);
    assert_eq!(outer.src_addr(), VTEP_IP);
    assert!(outer.validate_checksum());

    let port = outer_src_port(&out);
    assert!(port >= SRC_PORT_MIN && (port as u64) < SRC_PORT_MIN as u64 + SRC_PORT_RANGE);

    let (outer_dst, vni, inner) = unwrap_overlay(&out);
    assert_eq!(outer_dst, REMOTE_VTEP);
    assert_eq!(vni, VNI);
    assert_eq!(src_mac(&inner), TAP_MAC);
    assert_eq!(dst_mac(&inner), VM_MAC);
    assert_eq!(ip_of(&inner).ttl(), 63);
}

#[test]
fn test_source_port_stable_per_flow() {
    let r = Router::tenant();
    let send = |sport| {
        let (_, out, _) = r.process(from_internet(&udp(PEER_IP, sport, VM_IP, 8080, b"data")), "eth0");
        outer_src_port(&out)
    };
    assert_eq!(send(4000), send(4000));
}

#[test]
fn test_broadcast_fan_out() {
    let r = Router::tenant();
    r.ctl.add_forwarding_entry(VNI, MacAddr::BROADCAST, remote(REMOTE_VTEP)).unwrap();
    r.ctl.add_forwarding_entry(VNI, MacAddr::BROADCAST, remote(OTHER_VTEP)).unwrap();

    // No tunnel neighbor for .77, so the broadcast destination is kept
    let unknown = Ipv4Addr::new(10, 0, 0, 77);
    let frame = ethernet(MacAddr::BROADCAST, PEER_MAC, &udp(PEER_IP, 1, unknown, 2, b"who"));
    let (verdict, out, extra) = r.process(frame, "eth0");

    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);
    assert_eq!(extra.len(), 1);
    assert_eq!(extra[0].0, "tap0");

    let (first, _, inner) = unwrap_overlay(&out);
    let (second, _, copy) = unwrap_overlay(&extra[0].1);
    assert_eq!(first, REMOTE_VTEP);
    assert_eq!(second, OTHER_VTEP);
    assert_eq!(inner, copy);
    assert_eq!(dst_mac(&inner), MacAddr::BROADCAST);
    assert_eq!(r.counter("blue", "output"), 2);
}

#[test]
fn test_fdb_miss_is_neighbor_error() {
    let r = Router::tenant();
    let orphan_ip = Ipv4Addr::new(10, 0, 0, 6);
    r.ctl
        .add_neighbor_entry(VNI, orphan_ip, MacAddr([0x02, 0, 0, 0, 0, 0x06]))
        .unwrap();

    let (verdict, _, extra) = r.process(from_internet(&udp(PEER_IP, 1, orphan_ip, 2, b"x")), "eth0");
    assert_eq!(verdict, Verdict::Drop);
    assert!(extra.is_empty());
    assert_eq!(r.counter("blue", "neighbor_error"), 1);
    assert_eq!(r.counter("blue", "output"), 0);
}

#[test]
fn test_forwarding_entry_management() {
    let r = Router::tenant();
    assert!(matches!(
        r.ctl.add_forwarding_entry(999, VM_MAC, remote(REMOTE_VTEP)),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        r.ctl.add_forwarding_entry(VNI, VM_MAC, remote(REMOTE_VTEP)),
        Err(Error::AlreadyExists(_))
    ));

    // A unicast MAC moves to its new endpoint
    r.ctl.add_forwarding_entry(VNI, VM_MAC, remote(OTHER_VTEP)).unwrap();
    let entries = r.ctl.show_forwarding(VNI).unwrap();
    let vm = entries.iter().find(|e| e.mac == VM_MAC).unwrap();
    assert_eq!(vm.remotes, vec![remote(OTHER_VTEP)]);

    let (_, out, _) = r.process(from_internet(&udp(PEER_IP, 1, VM_IP, 2, b"x")), "eth0");
    assert_eq!(unwrap_overlay(&out).0, OTHER_VTEP);

    assert!(matches!(
        r.ctl.delete_forwarding_entry(VNI, VM_MAC, Some(remote(REMOTE_VTEP))),
        Err(Error::NotFound(_))
    ));
    r.ctl.delete_forwarding_entry(VNI, VM_MAC, None).unwrap();
    let (verdict, _, _) = r.process(from_internet(&udp(PEER_IP, 1, VM_IP, 2, b"x")), "eth0");
    assert_eq!(verdict, Verdict::Drop);
}

#[test]
fn test_tunnel_neighbor_management() {
    let r = Router::tenant();
    assert_eq!(r.ctl.show_neighbors(VNI).unwrap().len(), 1);
    r.ctl.delete_neighbor_entry(VNI, VM_IP, Some(VM_MAC)).unwrap();
    assert!(matches!(
        r.ctl.delete_neighbor_entry(VNI, VM_IP, None),
        Err(Error::NotFound(_))
    ));

    // Without a neighbor the frame keeps eth0's MAC, which has no FDB entry
    let (verdict, _, _) = r.process(from_internet(&udp(PEER_IP, 1, VM_IP, 2, b"x")), "eth0");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "neighbor_error"), 1);
}

#[test]
fn test_last_member_removes_device() {
    let r = Router::tenant();
    assert_eq!(r.dp.tunnels.list().len(), 1);
    r.ctl.delete_interface("blue", "tap0").unwrap();
    assert!(r.dp.tunnels.is_empty());
    assert!(matches!(r.ctl.show_forwarding(VNI), Err(Error::NotFound(_))));

    let inner = from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x"));
    let (verdict, _, _) = r.process(overlay(&inner, VNI), UPLINK);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.dp.unclaimed.get(), 1);
}
