//! In-memory sorted index, the `rdms/llrb` backend.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{range_is_empty, Index, IndexStats, Latch, Reader, Writer};
use crate::bench::generator::{RandomKV, RandomKey};
use crate::config::LlrbOpt;
use crate::{IxperfError, Result};

#[derive(Debug, Clone)]
struct Entry<V> {
    /// `None` marks a tombstone
    value: Option<V>,
    versions: u64,
}

struct Inner<K, V> {
    name: String,
    opt: LlrbOpt,
    latch: Latch,
    map: RwLock<BTreeMap<K, Entry<V>>>,
}

/// Ordered map behind a latch, with optional lsm, sticky and spin modes.
///
/// Cloning hands out another handle onto the same index.
pub struct MemIndex<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for MemIndex<K, V> {
    fn clone(&self) -> Self {
        MemIndex {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> MemIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    pub fn new(name: &str, opt: LlrbOpt) -> MemIndex<K, V> {
        debug!(
            target: "ixperf",
            "{}: new index lsm:{} sticky:{} spin:{}", name, opt.lsm, opt.sticky, opt.spin
        );
        MemIndex {
            inner: Arc::new(Inner {
                name: name.to_string(),
                latch: Latch::new(opt.spin),
                opt,
                map: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Deletes leave tombstones behind.
    fn keeps_tombstones(&self) -> bool {
        self.inner.opt.lsm || self.inner.opt.sticky
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.latch.read(&self.inner.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live handles onto this index.
    #[cfg(test)]
    pub(crate) fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn count_live<'a, I>(iter: I) -> usize
    where
        I: Iterator<Item = (&'a K, &'a Entry<V>)>,
        K: 'a,
        V: 'a,
    {
        iter.filter(|(_, e)| e.value.is_some()).count()
    }
}

impl<K, V> MemIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    /// Insert or replace through a shared handle.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        let lsm = self.inner.opt.lsm;
        let mut map = self.inner.latch.write(&self.inner.map);
        match map.get_mut(&key) {
            Some(entry) => {
                if lsm {
                    entry.versions += 1;
                }
                Ok(entry.value.replace(value))
            }
            None => {
                let entry = Entry {
                    value: Some(value),
                    versions: 1,
                };
                map.insert(key, entry);
                Ok(None)
            }
        }
    }

    /// Remove through a shared handle, leaving a tombstone under lsm or sticky.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let (lsm, tombstones) = (self.inner.opt.lsm, self.keeps_tombstones());
        let mut map = self.inner.latch.write(&self.inner.map);
        if !tombstones {
            return Ok(map.remove(key).and_then(|e| e.value));
        }
        match map.get_mut(key) {
            Some(entry) => {
                if lsm {
                    entry.versions += 1;
                }
                Ok(entry.value.take())
            }
            None => {
                let entry = Entry {
                    value: None,
                    versions: 1,
                };
                map.insert(key.clone(), entry);
                Ok(None)
            }
        }
    }
}

impl<K, V> Writer<K, V> for MemIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn set(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.insert(key, value)
    }

    fn delete(&mut self, key: &K) -> Result<Option<V>> {
        self.remove(key)
    }
}

impl<K, V> Reader<K, V> for MemIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        let map = self.inner.latch.read(&self.inner.map);
        Ok(map.get(key).and_then(|e| e.value.clone()))
    }

    fn range(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        if range_is_empty(&low, &high) {
            return Ok(0);
        }
        let map = self.inner.latch.read(&self.inner.map);
        Ok(Self::count_live(map.range((low, high))))
    }

    fn reverse(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        if range_is_empty(&low, &high) {
            return Ok(0);
        }
        let map = self.inner.latch.read(&self.inner.map);
        Ok(Self::count_live(map.range((low, high)).rev()))
    }

    fn iter(&self) -> Result<usize> {
        let map = self.inner.latch.read(&self.inner.map);
        Ok(Self::count_live(map.iter()))
    }
}

impl<K, V> Index<K, V> for MemIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    type R = MemIndex<K, V>;
    type W = MemIndex<K, V>;

    fn to_reader(&self) -> Result<Self::R> {
        Ok(self.clone())
    }

    fn to_writer(&self) -> Result<Self::W> {
        Ok(self.clone())
    }

    fn validate(&self) -> Result<IndexStats> {
        let inner = &self.inner;
        let map = inner.map.read();

        let mut stats = IndexStats {
            name: inner.name.clone(),
            entries: map.len(),
            read_locks: inner.latch.read_locks(),
            write_locks: Some(inner.latch.write_locks()),
            conflicts: inner.latch.conflicts(),
            shards: 1,
            ..IndexStats::default()
        };
        for (key, entry) in map.iter() {
            if entry.versions == 0 {
                return Err(IxperfError::ValidationError(format!(
                    "{}: entry {:?} has no versions",
                    inner.name, key
                )));
            }
            if !inner.opt.lsm && entry.versions != 1 {
                return Err(IxperfError::ValidationError(format!(
                    "{}: entry {:?} holds {} versions without lsm",
                    inner.name, key, entry.versions
                )));
            }
            stats.versions += entry.versions;
            stats.key_footprint += key.footprint();
            match &entry.value {
                Some(value) => {
                    stats.live += 1;
                    stats.value_footprint += value.footprint();
                }
                None => stats.tombstones += 1,
            }
        }
        if !self.keeps_tombstones() && stats.tombstones > 0 {
            return Err(IxperfError::ValidationError(format!(
                "{}: {} tombstones without lsm or sticky",
                inner.name, stats.tombstones
            )));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn opt(lsm: bool, sticky: bool, spin: bool) -> LlrbOpt {
        LlrbOpt { lsm, sticky, spin }
    }

    #[test]
    fn test_set_get_delete() {
        let index: MemIndex<i64, i64> = MemIndex::new("test", LlrbOpt::default());
        let mut w = index.to_writer().unwrap();
        let r = index.to_reader().unwrap();

        assert_eq!(w.set(10, 100).unwrap(), None);
        assert_eq!(w.set(10, 101).unwrap(), Some(100));
        assert_eq!(r.get(&10).unwrap(), Some(101));
        assert_eq!(w.delete(&10).unwrap(), Some(101));
        assert_eq!(w.delete(&10).unwrap(), None);
        assert_eq!(r.get(&10).unwrap(), None);
        assert!(index.is_empty());

        let stats = index.validate().unwrap();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.write_locks, Some(4));
        assert_eq!(stats.read_locks, 3);
    }

    #[test]
    fn test_sticky_keeps_tombstones() {
        let index: MemIndex<i32, i32> = MemIndex::new("sticky", opt(false, true, false));
        let mut w = index.to_writer().unwrap();
        w.set(1, 1).unwrap();
        w.delete(&1).unwrap();
        w.delete(&2).unwrap();
        assert_eq!(w.set(1, 2).unwrap(), None);

        let stats = index.validate().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.versions, 2);
    }

    #[test]
    fn test_lsm_versions() {
        let index: MemIndex<u64, u64> = MemIndex::new("lsm", opt(true, false, false));
        let mut w = index.to_writer().unwrap();
        w.set(7, 1).unwrap();
        w.set(7, 2).unwrap();
        w.delete(&7).unwrap();
        w.set(7, 3).unwrap();

        let stats = index.validate().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.versions, 4);
        assert_eq!(stats.key_footprint, 8);
    }

    #[test]
    fn test_ranges_count_live_entries() {
        let index: MemIndex<i64, i64> = MemIndex::new("range", opt(false, true, false));
        let mut w = index.to_writer().unwrap();
        for k in 0..10 {
            w.set(k, k).unwrap();
        }
        w.delete(&5).unwrap();
        let r = index.to_reader().unwrap();

        assert_eq!(r.iter().unwrap(), 9);
        assert_eq!(
            r.range(Bound::Included(2), Bound::Excluded(8)).unwrap(),
            5
        );
        assert_eq!(
            r.reverse(Bound::Unbounded, Bound::Included(3)).unwrap(),
            4
        );
        assert_eq!(
            r.range(Bound::Included(8), Bound::Included(2)).unwrap(),
            0
        );
        assert_eq!(
            r.reverse(Bound::Excluded(4), Bound::Excluded(4)).unwrap(),
            0
        );
    }

    #[test]
    fn test_concurrent_writers_spin() {
        let index: MemIndex<i64, i64> = MemIndex::new("spin", opt(false, false, true));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mut w = index.to_writer().unwrap();
                thread::spawn(move || {
                    for k in 0..1000 {
                        w.set(t * 1000 + k, k).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = index.validate().unwrap();
        assert_eq!(stats.live, 4000);
        assert_eq!(stats.write_locks, Some(4000));
    }
}
