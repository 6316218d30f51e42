//! Hash table with one reader/writer lock per bucket
//!
//! Send-path lookups take a bucket read lock; control-channel mutations take
//! the write lock of the one bucket they touch. Values are replaced whole
//! under the lock, so readers see either the old or the new value.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};

use crate::protocol::MacAddr;

pub const DEFAULT_BUCKETS: usize = 256;

/// Keys spread over buckets by CRC-32 of their bytes.
pub trait BucketKey: Copy + Eq + Hash {
    fn bucket_hash(&self) -> u32;
}

impl BucketKey for MacAddr {
    fn bucket_hash(&self) -> u32 {
        crc32fast::hash(&self.0)
    }
}

impl BucketKey for Ipv4Addr {
    fn bucket_hash(&self) -> u32 {
        crc32fast::hash(&self.octets())
    }
}

#[derive(Debug)]
pub struct BucketTable<K, V> {
    buckets: Box<[RwLock<HashMap<K, V>>]>,
    len: AtomicUsize,
}

impl<K: BucketKey, V: Clone> BucketTable<K, V> {
    pub fn new(buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: (0..buckets).map(|_| RwLock::new(HashMap::new())).collect(),
            len: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        &self.buckets[key.bucket_hash() as usize % self.buckets.len()]
    }

    /// Write-lock the bucket holding `key`.
    pub fn lock(&self, key: &K) -> BucketGuard<'_, K, V> {
        BucketGuard {
            map: self.bucket(key).write().unwrap(),
            len: &self.len,
        }
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.bucket(key).read().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.bucket(key).read().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, one bucket at a time.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        for bucket in self.buckets.iter() {
            out.extend(bucket.read().unwrap().iter().map(|(k, v)| (*k, v.clone())));
        }
        out
    }
}

/// Write access to one bucket; keeps the entry count current.
pub struct BucketGuard<'a, K, V> {
    map: RwLockWriteGuard<'a, HashMap<K, V>>,
    len: &'a AtomicUsize,
}

impl<K: BucketKey, V> BucketGuard<'_, K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let old = self.map.insert(key, value);
        if old.is_none() {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        old
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let old = self.map.remove(key);
        if old.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        old
    }
}
