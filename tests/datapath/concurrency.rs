//! Packet workers running while the control side mutates state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vrouter::dataplane::rules::{FilterRuleSpec, Target};
use vrouter::dataplane::{Hook, InterfaceKind, Verdict};
use vrouter::protocol::MacAddr;

use crate::harness::*;

const WORKERS: usize = 4;

#[test]
fn test_workers_survive_reconfiguration() {
    let r = Arc::new(Router::tenant());
    let stop = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..WORKERS)
        .map(|i| {
            let r = Arc::clone(&r);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut processed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let frame = from_vm(&udp(VM_IP, 1000 + i as u16, PEER_IP, 53, b"q"));
                    let (verdict, _, _) = r.process(frame, "tap0");
                    // Accepted, or dropped by a rule installed meanwhile
                    assert!(accepted(&verdict, "eth0") || verdict == Verdict::Drop);
                    processed += 1;
                }
                processed
            })
        })
        .collect();

    for round in 0..50u8 {
        let id = r
            .ctl
            .add_filter_rule("blue", FilterRuleSpec::new(Hook::Forwarding, Target::Drop))
            .unwrap();
        let name = format!("tap{}", 100 + round as usize);
        r.ctl
            .add_interface(
                "blue",
                spec(
                    &name,
                    InterfaceKind::Tunnel { vni: 200 },
                    MacAddr([0x02, 0, 0, 1, 0, round]),
                    "10.1.0.1/24",
                ),
            )
            .unwrap();
        r.ctl.delete_filter_rule("blue", id).unwrap();
        r.ctl.delete_interface("blue", &name).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    let total: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();

    assert!(total > 0);
    assert_eq!(r.counter("blue", "input"), total);
    assert_eq!(
        r.counter("blue", "output") + r.counter("blue", "filter_drop"),
        total
    );
    assert_eq!(r.dp.tunnels.list().len(), 1);
}

#[test]
fn test_delete_interface_under_traffic() {
    let r = Arc::new(Router::tenant());
    let stop = Arc::new(AtomicBool::new(false));

    let worker = {
        let r = Arc::clone(&r);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut processed = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let frame = from_internet(&udp(PEER_IP, 1, VM_IP, 2, b"x"));
                let (verdict, _, _) = r.process(frame, "eth0");
                assert!(
                    accepted(&verdict, "tap0") || accepted(&verdict, "eth0") || verdict.is_drop(),
                    "{:?}",
                    verdict
                );
                processed += 1;
            }
            processed
        })
    };

    thread::sleep(Duration::from_millis(20));
    r.ctl.delete_interface("blue", "tap0").unwrap();
    thread::sleep(Duration::from_millis(20));
    stop.store(true, Ordering::Relaxed);
    let processed = worker.join().unwrap();
    assert_eq!(r.counter("blue", "input"), processed);

    // Only the physical routes remain, so the tenant subnet now follows
    // the default route
    assert!(r.dp.tunnels.is_empty());
    assert_eq!(r.ctl.show_routes("blue").unwrap().len(), 2);
    let (verdict, _, _) = r.process(from_internet(&udp(PEER_IP, 1, VM_IP, 2, b"x")), "eth0");
    assert!(accepted(&verdict, "eth0"));
}
