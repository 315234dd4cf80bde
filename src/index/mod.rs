//! Index backends under test
//!
//! Every backend hands out [`Reader`] and [`Writer`] handles that worker
//! threads drive concurrently, and reports [`IndexStats`] once a run is
//! over so the runner can check the index against the operations applied.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::Result;

pub mod btree;
pub mod mem;
pub mod sharded;
pub mod wal;

pub use btree::BtreeIndex;
pub use mem::MemIndex;
pub use sharded::ShardedIndex;
pub use wal::{Wal, WalWriter};

/// Write handle.
pub trait Writer<K, V> {
    /// Insert or replace, returning the previous live value.
    fn set(&mut self, key: K, value: V) -> Result<Option<V>>;

    /// Remove, returning the previous live value.
    fn delete(&mut self, key: &K) -> Result<Option<V>>;
}

/// Read handle. Range style reads return the number of entries visited.
pub trait Reader<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>>;

    fn range(&self, low: Bound<K>, high: Bound<K>) -> Result<usize>;

    fn reverse(&self, low: Bound<K>, high: Bound<K>) -> Result<usize>;

    fn iter(&self) -> Result<usize>;
}

/// An index that can be shared by reader and writer threads.
pub trait Index<K, V>: Send + Sync {
    type R: Reader<K, V> + Send + 'static;
    type W: Writer<K, V> + Send + 'static;

    fn to_reader(&self) -> Result<Self::R>;

    fn to_writer(&self) -> Result<Self::W>;

    /// Walk the whole index, checking its internal invariants.
    fn validate(&self) -> Result<IndexStats>;
}

/// Index statistics collected by [`Index::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    /// Entries including tombstones
    pub entries: usize,
    pub live: usize,
    pub tombstones: usize,
    /// Versions held across all entries
    pub versions: u64,
    pub key_footprint: usize,
    pub value_footprint: usize,
    pub read_locks: u64,
    /// `None` when the backend does not count write latches
    pub write_locks: Option<u64>,
    /// Latch attempts that had to spin
    pub conflicts: u64,
    pub shards: usize,
}

impl IndexStats {
    /// Fold the statistics of another shard into these.
    pub fn merge(&mut self, other: &IndexStats) {
        self.entries += other.entries;
        self.live += other.live;
        self.tombstones += other.tombstones;
        self.versions += other.versions;
        self.key_footprint += other.key_footprint;
        self.value_footprint += other.value_footprint;
        self.read_locks += other.read_locks;
        self.write_locks = match (self.write_locks, other.write_locks) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        self.conflicts += other.conflicts;
        self.shards += other.shards;
    }
}

/// True when `low..high` holds no keys. `BTreeMap::range` panics on such
/// bounds, so callers check first.
pub fn range_is_empty<K: Ord>(low: &Bound<K>, high: &Bound<K>) -> bool {
    match (low, high) {
        (Bound::Included(l), Bound::Included(h)) => l > h,
        (Bound::Included(l), Bound::Excluded(h)) => l >= h,
        (Bound::Excluded(l), Bound::Included(h)) => l >= h,
        (Bound::Excluded(l), Bound::Excluded(h)) => l >= h,
        _ => false,
    }
}

/// Latch accounting around a `RwLock`, optionally spinning on `try_*`.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    spin: bool,
    read_locks: AtomicU64,
    write_locks: AtomicU64,
    conflicts: AtomicU64,
}

impl Latch {
    pub(crate) fn new(spin: bool) -> Latch {
        Latch {
            spin,
            ..Latch::default()
        }
    }

    pub(crate) fn read<'a, T>(&self, lock: &'a RwLock<T>) -> RwLockReadGuard<'a, T> {
        self.read_locks.fetch_add(1, Ordering::Relaxed);
        if !self.spin {
            return lock.read();
        }
        loop {
            if let Some(guard) = lock.try_read() {
                break guard;
            }
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            std::hint::spin_loop();
        }
    }

    pub(crate) fn write<'a, T>(&self, lock: &'a RwLock<T>) -> RwLockWriteGuard<'a, T> {
        self.write_locks.fetch_add(1, Ordering::Relaxed);
        if !self.spin {
            return lock.write();
        }
        loop {
            if let Some(guard) = lock.try_write() {
                break guard;
            }
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            std::hint::spin_loop();
        }
    }

    pub(crate) fn read_locks(&self) -> u64 {
        self.read_locks.load(Ordering::Relaxed)
    }

    pub(crate) fn write_locks(&self) -> u64 {
        self.write_locks.load(Ordering::Relaxed)
    }

    pub(crate) fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}
