//! Filter and NAT rules on live traffic, plus rule table management

use vrouter::dataplane::rules::{
    Direction, FilterMatch, FilterRuleSpec, NatRuleSpec, PortRange, Target,
};
use vrouter::dataplane::{Hook, Limits, RuleList, RuleTableKind, Verdict};
use vrouter::protocol::ipv4::Protocol;
use vrouter::protocol::tcp::TcpHeader;
use vrouter::protocol::udp::UdpHeader;
use vrouter::Error;

use crate::harness::*;

fn filter(hook: Hook, priority: u32, target: Target, matches: FilterMatch) -> FilterRuleSpec {
    FilterRuleSpec {
        hook,
        priority: Some(priority),
        direction: Direction::Any,
        matches,
        target,
    }
}

/// Router where FLOATING_IP maps one-to-one onto the VM.
fn floating() -> Router {
    let r = Router::tenant();
    r.ctl.add_floating_ip("blue", "eth0", FLOATING_IP).unwrap();
    r.ctl.add_nat_rule("blue", NatRuleSpec::dnat(FLOATING_IP, VM_IP)).unwrap();
    r.ctl.add_nat_rule("blue", NatRuleSpec::snat(VM_IP, FLOATING_IP)).unwrap();
    r
}

#[test]
fn test_inbound_filter_by_direction() {
    let r = floating();
    let mut ssh_in = FilterRuleSpec::new(Hook::PreRouting, Target::Drop);
    ssh_in.direction = Direction::In;
    ssh_in.matches.dst_port = Some(PortRange::single(22));
    r.ctl.add_filter_rule("blue", ssh_in).unwrap();

    let (verdict, _, _) = r.process(from_internet(&udp(PEER_IP, 4000, FLOATING_IP, 22, b"x")), UPLINK);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "filter_drop"), 1);

    // Same port from the tenant side is outbound
    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 4000, PEER_IP, 22, b"x")), "tap0");
    assert!(accepted(&verdict, "eth0"));
    assert_eq!(r.counter("blue", "filter_drop"), 1);
}

#[test]
fn test_priority_decides() {
    let r = Router::tenant();
    let udp_only = FilterMatch {
        protocol: Some(Protocol::Udp as u8),
        ..Default::default()
    };
    let dns = FilterMatch {
        dst_port: Some(PortRange::single(53)),
        ..udp_only.clone()
    };
    r.ctl
        .add_filter_rule("blue", filter(Hook::Forwarding, 20, Target::Drop, udp_only))
        .unwrap();
    r.ctl
        .add_filter_rule("blue", filter(Hook::Forwarding, 10, Target::Accept, dns))
        .unwrap();

    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 53, b"q")), "tap0");
    assert!(accepted(&verdict, "eth0"));
    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 5000, PEER_IP, 54, b"q")), "tap0");
    assert_eq!(verdict, Verdict::Drop);
    // Non-UDP falls through every rule and is accepted
    let (verdict, _, _) = r.process(from_vm(&ping(VM_IP, PEER_IP, 64)), "tap0");
    assert!(accepted(&verdict, "eth0"));

    match r.ctl.show_rules("blue", RuleTableKind::Filter).unwrap() {
        RuleList::Filter(rules) => {
            let order: Vec<u32> = rules.iter().map(|rule| rule.priority).collect();
            assert_eq!(order, vec![10, 20]);
            assert_eq!(rules[0].counters.packets, 1);
            assert_eq!(rules[1].counters.packets, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_postrouting_filter_sees_forwarded_traffic() {
    let r = Router::tenant();
    let to_peer = FilterMatch {
        dst: Some(vrouter::protocol::Ipv4Cidr::host(PEER_IP)),
        ..Default::default()
    };
    r.ctl
        .add_filter_rule("blue", filter(Hook::PostRouting, 1, Target::Drop, to_peer))
        .unwrap();
    let (verdict, _, _) = r.process(from_vm(&udp(VM_IP, 1, PEER_IP, 2, b"x")), "tap0");
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(r.counter("blue", "filter_drop"), 1);
    assert_eq!(r.counter("blue", "ttl_expired"), 0);
}

#[test]
fn test_floating_ip_inbound_dnat() {
    let r = floating();
    let (verdict, out, _) =
        r.process(from_internet(&udp(PEER_IP, 4000, FLOATING_IP, 8080, b"hello")), UPLINK);
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (outer_dst, vni, inner) = unwrap_overlay(&out);
    assert_eq!(outer_dst, REMOTE_VTEP);
    assert_eq!(vni, VNI);
    assert_eq!(dst_mac(&inner), VM_MAC);

    let ip = ip_of(&inner);
    assert_eq!(ip.src_addr(), PEER_IP);
    assert_eq!(ip.dst_addr(), VM_IP);
    assert!(ip.validate_checksum());
    let seg = UdpHeader::parse(ip.payload()).unwrap();
    assert!(seg.validate_checksum(PEER_IP, VM_IP));
    assert_eq!(seg.payload(), b"hello");
    assert_eq!(r.counter("blue", "nat_hits"), 1);
}

#[test]
fn test_floating_ip_outbound_snat() {
    let r = floating();
    let (verdict, out, _) = r.process(from_vm(&udp(VM_IP, 4000, PEER_IP, 8080, b"hello")), "tap0");
    assert!(accepted(&verdict, "eth0"));

    let ip = ip_of(&out);
    assert_eq!(ip.src_addr(), FLOATING_IP);
    assert!(ip.validate_checksum());
    let seg = UdpHeader::parse(ip.payload()).unwrap();
    assert!(seg.validate_checksum(FLOATING_IP, PEER_IP));
    assert_eq!(r.counter("blue", "nat_hits"), 1);
}

#[test]
fn test_nat_round_trip_restores_source() {
    let r = floating();
    let (verdict, out, _) = r.process(from_vm(&tcp(VM_IP, 40000, PEER_IP, 80, b"GET /")), "tap0");
    assert!(accepted(&verdict, "eth0"));

    // Answer whatever arrived at the peer
    let request = ip_of(&out);
    let seg = TcpHeader::parse(request.payload()).unwrap();
    assert_eq!(request.src_addr(), FLOATING_IP);
    let reply = tcp(
        request.dst_addr(),
        seg.dst_port(),
        request.src_addr(),
        seg.src_port(),
        b"200 OK",
    );
    let (verdict, back, _) = r.process(from_internet(&reply), UPLINK);
    assert!(accepted(&verdict, "tap0"), "{:?}", verdict);

    let (_, _, inner) = unwrap_overlay(&back);
    assert_eq!(dst_mac(&inner), VM_MAC);
    let ip = ip_of(&inner);
    assert_eq!(ip.src_addr(), PEER_IP);
    assert_eq!(ip.dst_addr(), VM_IP);
    assert!(ip.validate_checksum());
    let seg = TcpHeader::parse(ip.payload()).unwrap();
    assert_eq!(seg.dst_port(), 40000);
    assert!(seg.validate_checksum(PEER_IP, VM_IP));
    assert_eq!(seg.payload(), b"200 OK");
    assert_eq!(r.counter("blue", "nat_hits"), 2);
}

#[test]
fn test_rule_ids_show_and_flush() {
    let r = Router::tenant();
    let f1 = r
        .ctl
        .add_filter_rule("blue", FilterRuleSpec::new(Hook::Forwarding, Target::Accept))
        .unwrap();
    let n1 = r
        .ctl
        .add_nat_rule("blue", NatRuleSpec::snat(VM_IP, FLOATING_IP))
        .unwrap();
    let f2 = r
        .ctl
        .add_filter_rule("blue", FilterRuleSpec::new(Hook::PreRouting, Target::Drop))
        .unwrap();
    assert_eq!((f1, n1, f2), (1, 2, 3));

    match r.ctl.show_rules("blue", RuleTableKind::Filter).unwrap() {
        RuleList::Filter(rules) => {
            let ids: Vec<u64> = rules.iter().map(|rule| rule.id).collect();
            assert_eq!(ids, vec![3, 1]);
        }
        other => panic!("unexpected {:?}", other),
    }

    r.ctl.delete_filter_rule("blue", f1).unwrap();
    assert!(matches!(r.ctl.delete_filter_rule("blue", f1), Err(Error::NotFound(_))));
    assert!(matches!(r.ctl.delete_nat_rule("blue", f2), Err(Error::NotFound(_))));

    assert_eq!(r.ctl.flush_rules("blue", RuleTableKind::Filter).unwrap(), 1);
    assert_eq!(r.ctl.flush_rules("blue", RuleTableKind::Nat).unwrap(), 1);
    assert_eq!(r.ctl.flush_rules("blue", RuleTableKind::Nat).unwrap(), 0);

    // Ids are never reused after a flush
    let next = r
        .ctl
        .add_filter_rule("blue", FilterRuleSpec::new(Hook::Forwarding, Target::Accept))
        .unwrap();
    assert_eq!(next, 4);
}

#[test]
fn test_rule_validation() {
    let r = Router::tenant();

    let mut wrong_hook = NatRuleSpec::dnat(FLOATING_IP, VM_IP);
    wrong_hook.hook = Hook::PostRouting;
    assert!(matches!(r.ctl.add_nat_rule("blue", wrong_hook), Err(Error::InvalidArgument(_))));

    r.ctl.add_nat_rule("blue", NatRuleSpec::snat(VM_IP, FLOATING_IP)).unwrap();
    assert!(matches!(
        r.ctl.add_nat_rule("blue", NatRuleSpec::snat(VM_IP, ETH_IP)),
        Err(Error::AlreadyExists(_))
    ));

    let mut bad_priority = FilterRuleSpec::new(Hook::Forwarding, Target::Drop);
    bad_priority.priority = Some(0);
    assert!(matches!(r.ctl.add_filter_rule("blue", bad_priority), Err(Error::OutOfRange(_))));

    assert!(matches!(
        r.ctl.add_filter_rule("green", FilterRuleSpec::new(Hook::Forwarding, Target::Drop)),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_rule_table_capacity() {
    let r = Router::with_limits(Limits {
        max_rules_per_hook: 1,
        ..Limits::default()
    });
    r.ctl.create_namespace("blue").unwrap();

    r.ctl
        .add_filter_rule("blue", FilterRuleSpec::new(Hook::Forwarding, Target::Drop))
        .unwrap();
    assert!(matches!(
        r.ctl.add_filter_rule("blue", FilterRuleSpec::new(Hook::Forwarding, Target::Accept)),
        Err(Error::ResourceExhausted(_))
    ));
    // Each hook has its own budget
    r.ctl
        .add_filter_rule("blue", FilterRuleSpec::new(Hook::PreRouting, Target::Accept))
        .unwrap();
}
