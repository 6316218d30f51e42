//! Counters for packet statistics.
//!
//! Datapath counters are sharded per worker thread so concurrent cores do
//! not contend on one cache line; reads sum every shard.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
#[repr(align(64))]
struct Slot(AtomicU64);

fn shard_count() -> usize {
    static SHARDS: OnceLock<usize> = OnceLock::new();
    *SHARDS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

fn shard_index() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static SHARD: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    SHARD.with(|s| *s) % shard_count()
}

/// Counter with one slot per CPU, summed on read
#[derive(Debug)]
pub struct PerCpuCounter {
    slots: Box<[Slot]>,
}

impl Default for PerCpuCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PerCpuCounter {
    pub fn new() -> Self {
        Self {
            slots: (0..shard_count()).map(|_| Slot::default()).collect(),
        }
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, val: u64) {
        self.slots[shard_index() % self.slots.len()]
            .0
            .fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.0.load(Ordering::Relaxed))
            .fold(0u64, u64::wrapping_add)
    }

    pub fn reset(&self) {
        for s in self.slots.iter() {
            s.0.store(0, Ordering::Relaxed);
        }
    }
}

/// Packet and byte hit counters of a rule or interface.
#[derive(Debug, Default)]
pub struct PacketCounters {
    pub packets: PerCpuCounter,
    pub bytes: PerCpuCounter,
}

/// Point-in-time totals of a [`PacketCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketTotals {
    pub packets: u64,
    pub bytes: u64,
}

impl PacketCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: usize) {
        self.packets.inc();
        self.bytes.add(bytes as u64);
    }

    pub fn totals(&self) -> PacketTotals {
        PacketTotals {
            packets: self.packets.get(),
            bytes: self.bytes.get(),
        }
    }
}

/// Per-namespace datapath statistics.
///
/// Drop reasons are only observable here.
#[derive(Debug, Default)]
pub struct NamespaceStats {
    pub input: PerCpuCounter,
    pub output: PerCpuCounter,
    /// Malformed or unsupported headers
    pub header_error: PerCpuCounter,
    /// No route to destination
    pub route_error: PerCpuCounter,
    /// Link-layer or tunnel endpoint not resolvable
    pub neighbor_error: PerCpuCounter,
    pub filter_drop: PerCpuCounter,
    pub nat_hits: PerCpuCounter,
    pub local_delivered: PerCpuCounter,
    pub local_dropped: PerCpuCounter,
    pub ttl_expired: PerCpuCounter,
    /// FTP gateway partial matches and failed rewrites
    pub alg_drop: PerCpuCounter,
}

impl NamespaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports all counters as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        [
            ("input", &self.input),
            ("output", &self.output),
            ("header_error", &self.header_error),
            ("route_error", &self.route_error),
            ("neighbor_error", &self.neighbor_error),
            ("filter_drop", &self.filter_drop),
            ("nat_hits", &self.nat_hits),
            ("local_delivered", &self.local_delivered),
            ("local_dropped", &self.local_dropped),
            ("ttl_expired", &self.ttl_expired),
            ("alg_drop", &self.alg_drop),
        ]
        .into_iter()
        .map(|(name, c)| (name.to_string(), c.get()))
        .collect()
    }
}

/// Per-interface statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub rx: PacketCounters,
    pub tx: PacketCounters,
    pub tx_dropped: PerCpuCounter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx.record(bytes);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx.record(bytes);
    }

    pub fn record_tx_drop(&self) {
        self.tx_dropped.inc();
    }

    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("rx_packets".into(), self.rx.packets.get()),
            ("rx_bytes".into(), self.rx.bytes.get()),
            ("tx_packets".into(), self.tx.packets.get()),
            ("tx_bytes".into(), self.tx.bytes.get()),
            ("tx_dropped".into(), self.tx_dropped.get()),
        ]
    }
}
