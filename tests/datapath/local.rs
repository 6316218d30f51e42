//! Traffic addressed to the router itself: ICMP echo and ARP

use vrouter::dataplane::{NeighborState, Verdict};
use vrouter::protocol::arp::{ArpOp, ArpPacket};
use vrouter::protocol::ethernet;
use vrouter::protocol::icmp::{IcmpPacket, IcmpType};
use vrouter::protocol::MacAddr;

use crate::harness::*;

fn arp_of(frame: &[u8]) -> ArpPacket {
    ArpPacket::parse(&frame[ethernet::HEADER_LEN..]).unwrap()
}

#[test]
fn test_ping_tunnel_address_over_overlay() {
    let r = Router::tenant();
    let request = overlay(&from_vm(&ping(VM_IP, TAP_IP, 64)), VNI);
    let (verdict, out, _) = r.process(request, UPLINK);
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (outer_dst, vni, inner) = unwrap_overlay(&out);
    assert_eq!(outer_dst, REMOTE_VTEP);
    assert_eq!(vni, VNI);
    assert_eq!(dst_mac(&inner), VM_MAC);
    assert_eq!(src_mac(&inner), TAP_MAC);

    let ip = ip_of(&inner);
    assert_eq!(ip.src_addr(), TAP_IP);
    assert_eq!(ip.dst_addr(), VM_IP);
    assert!(ip.validate_checksum());
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), IcmpType::EchoReply as u8);
    assert!(icmp.validate_checksum());
    assert_eq!(icmp.payload(), b"abcdefgh");

    assert_eq!(r.counter("blue", "local_delivered"), 1);
    assert_eq!(r.counter("blue", "output"), 1);
}

#[test]
fn test_ping_external_address() {
    let r = Router::tenant();
    let (verdict, out, _) = r.process(from_internet(&ping(PEER_IP, ETH_IP, 64)), UPLINK);
    assert!(accepted(&verdict, "eth0"), "{:?}", verdict);
    assert_eq!(dst_mac(&out), PEER_MAC);
    assert_eq!(src_mac(&out), ETH_MAC);

    let ip = ip_of(&out);
    assert_eq!(ip.src_addr(), ETH_IP);
    assert_eq!(ip.dst_addr(), PEER_IP);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), IcmpType::EchoReply as u8);
}

#[test]
fn test_ping_with_ttl_one_is_answered() {
    let r = Router::tenant();
    let (verdict, out, _) = r.process(from_vm(&ping(VM_IP, TAP_IP, 1)), "tap0");
    assert!(accepted(&verdict, "tap0"));
    let (_, _, inner) = unwrap_overlay(&out);
    assert_eq!(ip_of(&inner).ttl(), 64);
    assert_eq!(r.counter("blue", "ttl_expired"), 0);
}

#[test]
fn test_other_local_traffic_dropped() {
    let r = Router::tenant();
    let (verdict, _, _) = r.process(from_vm(&tcp(VM_IP, 40000, TAP_IP, 22, b"")), "tap0");
    assert_eq!(verdict, Verdict::Drop);
    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 40000, ETH_IP, 53, b"q")), "tap0");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "local_dropped"), 2);
    assert_eq!(r.counter("blue", "local_delivered"), 0);
}

#[test]
fn test_arp_for_tunnel_address() {
    let r = Router::tenant();
    let request = ArpPacket::request(VM_MAC, VM_IP, TAP_IP).to_frame(MacAddr::BROADCAST);
    let (verdict, out, _) = r.process(overlay(&request, VNI), UPLINK);
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (outer_dst, _, inner) = unwrap_overlay(&out);
    assert_eq!(outer_dst, REMOTE_VTEP);
    assert_eq!(dst_mac(&inner), VM_MAC);
    let reply = arp_of(&inner);
    assert_eq!(reply.operation, ArpOp::Reply);
    assert_eq!(reply.sender_mac, TAP_MAC);
    assert_eq!(reply.sender_ip, TAP_IP);
    assert_eq!(reply.target_ip, VM_IP);

    // Tunnel-side senders are not learned into the underlay cache
    assert!(r.ctl.show_arp_entries("blue").unwrap().is_empty());
}

#[test]
fn test_arp_learning_on_physical() {
    let r = Router::tenant();
    let request = ArpPacket::request(PEER_MAC, PEER_IP, ETH_IP).to_frame(MacAddr::BROADCAST);
    let (verdict, out, _) = r.process(request, UPLINK);
    assert!(accepted(&verdict, "eth0"));
    let reply = arp_of(&out);
    assert_eq!(reply.sender_mac, ETH_MAC);
    assert_eq!(dst_mac(&out), PEER_MAC);

    let entries = r.ctl.show_arp_entries("blue").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ip, PEER_IP);
    assert_eq!(entries[0].mac, PEER_MAC);
    assert_eq!(entries[0].state, NeighborState::Reachable);

    // The learned MAC now beats the underlay gateway
    let (verdict, out, _) = r.process(from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x")), "tap0");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(dst_mac(&out), PEER_MAC);
}

#[test]
fn test_arp_for_floating_ip() {
    let r = Router::tenant();
    let request = ArpPacket::request(PEER_MAC, PEER_IP, FLOATING_IP).to_frame(MacAddr::BROADCAST);

    let (verdict, _, _) = r.process(request.clone(), UPLINK);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.dp.unclaimed.get(), 1);

    r.ctl.add_floating_ip("blue", "eth0", FLOATING_IP).unwrap();
    let (verdict, out, _) = r.process(request, UPLINK);
    assert!(accepted(&verdict, "eth0"));
    let reply = arp_of(&out);
    assert_eq!(reply.sender_ip, FLOATING_IP);
    assert_eq!(reply.sender_mac, ETH_MAC);
}

#[test]
fn test_arp_for_foreign_address_ignored() {
    let r = Router::tenant();
    let request = ArpPacket::request(VM_MAC, VM_IP, "10.0.0.9".parse().unwrap()).to_frame(TAP_MAC);
    let (verdict, _, _) = r.process(request, "tap0");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "local_dropped"), 1);
}
