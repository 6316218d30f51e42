//! Route decisions, TTL handling and ingress validation

use vrouter::dataplane::{InterfaceKind, NeighborState, RouteClass, RouteSpec, Verdict};
use vrouter::protocol::arp::ArpPacket;
use vrouter::protocol::udp::UdpHeader;
use vrouter::Error;

use crate::harness::*;

fn static_route(destination: &str, gateway: Option<&str>, interface: Option<&str>) -> RouteSpec {
    RouteSpec {
        destination: destination.parse().unwrap(),
        gateway: gateway.map(|g| g.parse().unwrap()),
        interface: interface.map(String::from),
    }
}

#[test]
fn test_vm_to_internet_uses_default_route() {
    let r = Router::tenant();
    let (verdict, out, extra) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"query")), "tap0");

    assert!(accepted(&verdict, "eth0"), "{:?}", verdict);
    assert!(extra.is_empty());
    assert_eq!(src_mac(&out), ETH_MAC);
    assert_eq!(dst_mac(&out), UNDERLAY_GW_MAC);

    let ip = ip_of(&out);
    assert_eq!(ip.ttl(), 63);
    assert!(ip.validate_checksum());
    assert_eq!(ip.src_addr(), VM_IP);
    assert_eq!(r.counter("blue", "input"), 1);
    assert_eq!(r.counter("blue", "output"), 1);
}

#[test]
fn test_arp_entry_preferred_over_gateway_mac() {
    let r = Router::tenant();
    r.ctl.add_arp_entry("blue", PEER_IP, PEER_MAC).unwrap();
    let (verdict, out, _) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"q")), "tap0");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(dst_mac(&out), PEER_MAC);
}

#[test]
fn test_unresolved_next_hop_left_incomplete() {
    let r = Router::tenant();
    let (verdict, out, _) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"q")), "tap0");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(dst_mac(&out), UNDERLAY_GW_MAC);

    let entries = r.ctl.show_arp_entries("blue").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ip, PEER_IP);
    assert_eq!(entries[0].state, NeighborState::Incomplete);

    // ARP from the peer completes the entry
    let request = ArpPacket::request(PEER_MAC, PEER_IP, ETH_IP)
        .to_frame(vrouter::protocol::MacAddr::BROADCAST);
    r.process(request, UPLINK);
    let entries = r.ctl.show_arp_entries("blue").unwrap();
    assert_eq!(entries[0].state, NeighborState::Reachable);

    let (_, out, _) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"q")), "tap0");
    assert_eq!(dst_mac(&out), PEER_MAC);
}

#[test]
fn test_static_route_through_tunnel_gateway() {
    let r = Router::tenant();
    let gw_mac = vrouter::protocol::MacAddr([0x02, 0, 0, 0, 0, 0x09]);
    let gw_vtep = "192.0.2.11".parse().unwrap();
    r.ctl.add_neighbor_entry(VNI, "10.0.0.9".parse().unwrap(), gw_mac).unwrap();
    r.ctl.add_forwarding_entry(VNI, gw_mac, remote(gw_vtep)).unwrap();
    let route = r
        .ctl
        .add_route("blue", &static_route("192.168.0.0/16", Some("10.0.0.9"), Some("tap0")))
        .unwrap();
    assert_eq!(route.class, RouteClass::Static);
    assert_eq!(route.interface, "tap0");

    let dst = "192.168.4.4".parse().unwrap();
    let (verdict, out, _) = r.process(from_internet(&udp(PEER_IP, 7, dst, 7, b"echo")), "eth0");
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (outer_dst, vni, inner) = unwrap_overlay(&out);
    assert_eq!(outer_dst, gw_vtep);
    assert_eq!(vni, VNI);
    assert_eq!(dst_mac(&inner), gw_mac);
    assert_eq!(src_mac(&inner), TAP_MAC);
    let ip = ip_of(&inner);
    assert_eq!(ip.dst_addr(), dst);
    assert_eq!(ip.ttl(), 63);
    let udp = UdpHeader::parse(ip.payload()).unwrap();
    assert!(udp.validate_checksum(PEER_IP, dst));
}

#[test]
fn test_route_validation() {
    let r = Router::tenant();
    let add = |d, g, i| r.ctl.add_route("blue", &static_route(d, g, i));

    assert!(matches!(add("192.168.0.0/16", None, None), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        add("192.168.0.0/16", Some("203.0.113.1"), Some("eth0")),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        add("192.168.0.0/16", Some("10.1.0.9"), Some("tap0")),
        Err(Error::Unreachable(_))
    ));
    // Inside the subnet but no tunnel neighbor
    assert!(matches!(
        add("192.168.0.0/16", Some("10.0.0.77"), Some("tap0")),
        Err(Error::Unreachable(_))
    ));
    assert!(matches!(add("10.0.0.0/24", None, Some("tap0")), Err(Error::AlreadyExists(_))));
    assert!(matches!(add("192.168.0.0/16", None, Some("tap9")), Err(Error::NotFound(_))));

    add("192.168.0.0/16", None, Some("eth0")).unwrap();
    assert!(matches!(add("192.168.0.0/16", None, Some("eth0")), Err(Error::AlreadyExists(_))));
}

#[test]
fn test_gateway_must_be_connected() {
    let r = Router::new();
    r.ctl.create_namespace("red").unwrap();
    r.ctl
        .add_interface("red", spec("tap5", InterfaceKind::Tunnel { vni: 5 }, TAP_MAC, "10.5.0.1/24"))
        .unwrap();
    let err = r
        .ctl
        .add_route("red", &static_route("0.0.0.0/0", Some("10.9.9.9"), None))
        .unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
    r.ctl
        .add_route("red", &static_route("0.0.0.0/0", Some("10.5.0.254"), None))
        .unwrap();
}

#[test]
fn test_delete_route_semantics() {
    let r = Router::tenant();
    r.ctl
        .add_route("blue", &static_route("172.16.0.0/12", Some("10.0.0.9"), None))
        .unwrap();

    assert!(matches!(
        r.ctl.delete_route("blue", "10.0.0.0/24".parse().unwrap()),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        r.ctl.delete_route("blue", "172.16.0.0/16".parse().unwrap()),
        Err(Error::NotFound(_))
    ));
    let removed = r.ctl.delete_route("blue", "172.16.0.0/12".parse().unwrap()).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].class, RouteClass::Static);
}

#[test]
fn test_no_route_counts_route_error() {
    let r = Router::new();
    r.ctl.create_namespace("red").unwrap();
    r.ctl
        .add_interface("red", spec("tap5", InterfaceKind::Tunnel { vni: 5 }, TAP_MAC, "10.5.0.1/24"))
        .unwrap();
    let frame = ethernet(TAP_MAC, VM_MAC, &udp("10.5.0.7".parse().unwrap(), 1, PEER_IP, 2, b"x"));
    let (verdict, _, _) = r.process(frame, "tap5");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("red", "route_error"), 1);
}

#[test]
fn test_ttl_expired() {
    let r = Router::tenant();
    let (verdict, _, _) = r.process(from_vm(&ping(VM_IP, PEER_IP, 1)), "tap0");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "ttl_expired"), 1);

    let (verdict, out, _) = r.process(from_vm(&ping(VM_IP, PEER_IP, 2)), "tap0");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(ip_of(&out).ttl(), 1);
}

#[test]
fn test_ingress_validation() {
    let r = Router::tenant();

    let (verdict, _, _) = r.process(vec![0u8; 10], "tap0");
    assert_eq!(verdict, Verdict::Drop);

    let mut bad_sum = from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x"));
    bad_sum[14 + 10] ^= 0xff;
    let (verdict, _, _) = r.process(bad_sum, "tap0");
    assert_eq!(verdict, Verdict::Drop);

    let multicast = from_vm(&udp(VM_IP, 1, "224.0.0.5".parse().unwrap(), 2, b"x"));
    let (verdict, _, _) = r.process(multicast, "tap0");
    assert_eq!(verdict, Verdict::Drop);

    let mut short_ihl = from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x"));
    short_ihl[14] = 0x44;
    let (verdict, _, _) = r.process(short_ihl, "tap0");
    assert_eq!(verdict, Verdict::Drop);

    assert_eq!(r.counter("blue", "header_error"), 4);
    assert_eq!(r.counter("blue", "output"), 0);
}

#[test]
fn test_unknown_ingress_dropped() {
    let r = Router::tenant();
    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x")), "tap9");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "input"), 0);
}
