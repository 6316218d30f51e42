//! FTP control-channel address rewriting on the tenant-to-internet path

use std::net::Ipv4Addr;

use vrouter::dataplane::rules::NatRuleSpec;
use vrouter::dataplane::{Limits, Verdict};
use vrouter::protocol::ethernet;
use vrouter::protocol::tcp::TcpHeader;

use crate::harness::*;

const FTP_SERVER: Ipv4Addr = PEER_IP;

fn with_snat(r: Router) -> Router {
    r.ctl.add_nat_rule("blue", NatRuleSpec::snat(VM_IP, FLOATING_IP)).unwrap();
    r
}

/// Send a control segment from the VM through the router.
fn from_tenant(r: &Router, sport: u16, dport: u16, data: &[u8]) -> (Verdict, Vec<u8>) {
    let (verdict, out, _) = r.process(from_vm(&tcp(VM_IP, sport, FTP_SERVER, dport, data)), "tap0");
    (verdict, out)
}

/// TCP payload of an Ethernet frame, after checking both checksums.
fn checked_payload(frame: &[u8]) -> Vec<u8> {
    let ip = ip_of(frame);
    assert!(ip.validate_checksum(), "bad IP checksum");
    assert_eq!(ip.total_length() as usize, frame.len() - ethernet::HEADER_LEN);
    let seg = TcpHeader::parse(ip.payload()).unwrap();
    assert!(seg.validate_checksum(ip.src_addr(), ip.dst_addr()), "bad TCP checksum");
    seg.payload().to_vec()
}

#[test]
fn test_port_command_rewritten_after_snat() {
    let r = with_snat(Router::tenant());
    let (verdict, out) = from_tenant(&r, 40000, 21, b"PORT 10,0,0,5,200,1\r\n");
    assert!(accepted(&verdict, "eth0"), "{:?}", verdict);

    assert_eq!(ip_of(&out).src_addr(), FLOATING_IP);
    assert_eq!(checked_payload(&out), b"PORT 203,0,113,50,200,1\r\n");
}

#[test]
fn test_eprt_command_rewritten() {
    let r = with_snat(Router::tenant());
    let (verdict, out) = from_tenant(&r, 40000, 21, b"EPRT |1|10.0.0.5|6275|\r\n");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(checked_payload(&out), b"EPRT |1|203.0.113.50|6275|\r\n");
}

#[test]
fn test_passive_reply_rewritten() {
    let r = with_snat(Router::tenant());
    let reply = b"227 Entering Passive Mode (10,0,0,5,195,80)\r\n";
    let (verdict, out) = from_tenant(&r, 21, 40000, reply);
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(
        checked_payload(&out),
        b"227 Entering Passive Mode (203,0,113,50,195,80)\r\n"
    );
}

#[test]
fn test_shorter_literal_keeps_length() {
    let r = Router::tenant();
    r.ctl.add_nat_rule("blue", NatRuleSpec::snat(VM_IP, Ipv4Addr::new(1, 2, 3, 4))).unwrap();
    let cmd = b"PORT 10,0,0,5,200,1\r\n";
    let (verdict, out) = from_tenant(&r, 40000, 21, cmd);
    assert!(accepted(&verdict, "eth0"));
    let payload = checked_payload(&out);
    assert_eq!(payload.len(), cmd.len());
    assert_eq!(payload, b"PORT  1,2,3,4,200,1\r\n");
}

#[test]
fn test_epsv_never_rewritten() {
    let r = with_snat(Router::tenant());
    let reply = b"229 Entering Extended Passive Mode (|||6446|)\r\n";
    let (verdict, out) = from_tenant(&r, 21, 40000, reply);
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(checked_payload(&out), reply);
    assert_eq!(r.counter("blue", "alg_drop"), 0);
}

#[test]
fn test_literal_matching_source_untouched() {
    let r = Router::tenant();
    let cmd = b"PORT 10,0,0,5,200,1\r\n";
    let (verdict, out) = from_tenant(&r, 40000, 21, cmd);
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(checked_payload(&out), cmd);
}

#[test]
fn test_partial_command_dropped() {
    let r = with_snat(Router::tenant());
    let (verdict, _) = from_tenant(&r, 40000, 21, b"POR");
    assert_eq!(verdict, Verdict::Drop);

    let (verdict, _) = from_tenant(&r, 40000, 21, b"PORT 10,0,0,5,2");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "alg_drop"), 2);

    // Other commands and empty segments pass
    let (verdict, _) = from_tenant(&r, 40000, 21, b"USER anonymous\r\n");
    assert!(accepted(&verdict, "eth0"));
    let (verdict, _) = from_tenant(&r, 40000, 21, b"");
    assert!(accepted(&verdict, "eth0"));
}

#[test]
fn test_inbound_control_not_rewritten() {
    let r = with_snat(Router::tenant());
    r.ctl.add_floating_ip("blue", "eth0", FLOATING_IP).unwrap();
    r.ctl.add_nat_rule("blue", NatRuleSpec::dnat(FLOATING_IP, VM_IP)).unwrap();

    let cmd = b"PORT 1,2,3,4,0,20\r\n";
    let frame = from_internet(&tcp(PEER_IP, 40000, FLOATING_IP, 21, cmd));
    let (verdict, out, _) = r.process(frame, UPLINK);
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (_, _, inner) = unwrap_overlay(&out);
    assert_eq!(checked_payload(&inner), cmd);
}

#[test]
fn test_rewrite_beyond_mtu_dropped() {
    let cmd = b"PORT 10,0,0,5,200,1\r\n";
    // Headers plus the original payload fit; four more bytes do not
    let r = with_snat(Router::tenant_with_limits(Limits {
        mtu: 20 + 20 + cmd.len() + 2,
        ..Limits::default()
    }));
    let (verdict, _) = from_tenant(&r, 40000, 21, cmd);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "alg_drop"), 1);
    assert_eq!(r.counter("blue", "output"), 0);

    // Unchanged segments of the same size still pass
    let (verdict, _) = from_tenant(&r, 40000, 21, b"NOOP 10,0,0,5,200,1\r\n");
    assert!(accepted(&verdict, "eth0"));
}
