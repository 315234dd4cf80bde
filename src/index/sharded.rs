//! Hash partitioned shards of [`MemIndex`], the `rdms/shllrb` backend.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Bound;
use std::sync::Arc;

use tracing::info;

use super::{Index, IndexStats, MemIndex, Reader, Writer};
use crate::bench::generator::{RandomKV, RandomKey};
use crate::config::ShllrbOpt;
use crate::{IxperfError, Result};

/// `max_shards` independent shards, each key owned by exactly one of them.
pub struct ShardedIndex<K, V> {
    name: String,
    shards: Arc<Vec<MemIndex<K, V>>>,
    hasher: RandomState,
}

impl<K, V> Clone for ShardedIndex<K, V> {
    fn clone(&self) -> Self {
        ShardedIndex {
            name: self.name.clone(),
            shards: Arc::clone(&self.shards),
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V> ShardedIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    pub fn new(name: &str, opt: &ShllrbOpt) -> Result<ShardedIndex<K, V>> {
        if opt.max_shards == 0 {
            return Err(IxperfError::IndexError(format!(
                "{}: max_shards must be at least 1",
                name
            )));
        }
        info!(
            target: "ixperf",
            "{}: {} shards, max_entries:{} interval:{:?}",
            name, opt.max_shards, opt.max_entries, opt.interval
        );
        let shards = (0..opt.max_shards)
            .map(|i| MemIndex::new(&format!("{}-shard-{}", name, i), opt.to_llrb()))
            .collect();
        Ok(ShardedIndex {
            name: name.to_string(),
            shards: Arc::new(shards),
            hasher: RandomState::new(),
        })
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard_of(&self, key: &K) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() % (self.shards.len() as u64)) as usize
    }

    fn shard(&self, key: &K) -> &MemIndex<K, V> {
        &self.shards[self.shard_of(key)]
    }
}

impl<K, V> Writer<K, V> for ShardedIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn set(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.shard(&key).insert(key, value)
    }

    fn delete(&mut self, key: &K) -> Result<Option<V>> {
        self.shard(key).remove(key)
    }
}

impl<K, V> Reader<K, V> for ShardedIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.shard(key).get(key)
    }

    fn range(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        let mut n = 0;
        for shard in self.shards.iter() {
            n += shard.range(low.clone(), high.clone())?;
        }
        Ok(n)
    }

    fn reverse(&self, low: Bound<K>, high: Bound<K>) -> Result<usize> {
        let mut n = 0;
        for shard in self.shards.iter().rev() {
            n += shard.reverse(low.clone(), high.clone())?;
        }
        Ok(n)
    }

    fn iter(&self) -> Result<usize> {
        let mut n = 0;
        for shard in self.shards.iter() {
            n += shard.iter()?;
        }
        Ok(n)
    }
}

impl<K, V> Index<K, V> for ShardedIndex<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    type R = ShardedIndex<K, V>;
    type W = ShardedIndex<K, V>;

    fn to_reader(&self) -> Result<Self::R> {
        Ok(self.clone())
    }

    fn to_writer(&self) -> Result<Self::W> {
        Ok(self.clone())
    }

    fn validate(&self) -> Result<IndexStats> {
        let mut stats = IndexStats {
            name: self.name.clone(),
            write_locks: Some(0),
            ..IndexStats::default()
        };
        for shard in self.shards.iter() {
            stats.merge(&shard.validate()?);
        }
        Ok(stats)
    }
}
