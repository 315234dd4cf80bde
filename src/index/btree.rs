//! Baseline `BTreeMap`, the `btree-map` index.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{range_is_empty, Index, IndexStats, Reader, Writer};
use crate::bench::generator::{RandomKV, RandomKey};
use crate::Result;

/// Plain ordered map behind a mutex. Meant for single threaded runs.
pub struct BtreeIndex<K, V> {
    name: String,
    map: Arc<Mutex<BTreeMap<K, V>>>,
}

impl<K, V> Clone for BtreeIndex<K, V> {
    fn clone(&self) -> Self {
        BtreeIndex {
            name: self.name.clone(),
            map: Arc::clone(&self.map),
        }
    }
}

impl<K, V> BtreeIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    pub fn new(name: &str) -> BtreeIndex<K, V> {
        BtreeIndex {
            name: name.to_string(),
            map: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Writer<K, V> for BtreeIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn set(&mut self, key: K, value: V) -> Result<Option<V>> {
        Ok(self.map.lock().insert(key, value))
    }

    fn delete(&mut self, key: &K) -> Result<Option<V>> {
        Ok(self.map.lock().remove(key))
    }
}

impl<K, V> Reader<K, V> for BtreeIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn range(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        if range_is_empty(&low, &high) {
            return Ok(0);
        }
        Ok(self.map.lock().range((low, high)).count())
    }

    fn reverse(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        if range_is_empty(&low, &high) {
            return Ok(0);
        }
        Ok(self.map.lock().range((low, high)).rev().count())
    }

    fn iter(&self) -> Result<usize> {
        Ok(self.map.lock().iter().count())
    }
}

impl<K, V> Index<K, V> for BtreeIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    type R = BtreeIndex<K, V>;
    type W = BtreeIndex<K, V>;

    fn to_reader(&self) -> Result<Self::R> {
        Ok(self.clone())
    }

    fn to_writer(&self) -> Result<Self::W> {
        Ok(self.clone())
    }

    fn validate(&self) -> Result<IndexStats> {
        let map = self.map.lock();
        let mut stats = IndexStats {
            name: self.name.clone(),
            entries: map.len(),
            live: map.len(),
            versions: map.len() as u64,
            shards: 1,
            ..IndexStats::default()
        };
        for (key, value) in map.iter() {
            stats.key_footprint += key.footprint();
            stats.value_footprint += value.footprint();
        }
        Ok(stats)
    }
}
