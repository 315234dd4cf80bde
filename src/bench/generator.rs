//! Workload generators
//!
//! Turns the `[generator]` section of a profile into deterministic streams
//! of index commands. Commands are produced in batches of `channel_size`.

use std::cmp;
use std::fmt;
use std::hash::Hash;
use std::ops::Bound;
use std::time::{Duration, Instant};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Workload shape, the `[generator]` section of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenOptions {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub key_size: usize,
    #[serde(default, rename = "value_size")]
    pub val_size: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default)]
    pub loads: usize,
    #[serde(default)]
    pub sets: usize,
    #[serde(default)]
    pub deletes: usize,
    #[serde(default)]
    pub gets: usize,
    #[serde(default)]
    pub ranges: usize,
    #[serde(default)]
    pub reverses: usize,
    #[serde(default)]
    pub iters: bool,
    /// Number of initial-load threads, copied from `[rdms] initial`.
    #[serde(skip)]
    pub initial: usize,
}

fn default_channel_size() -> usize {
    10_000
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            key_size: 0,
            val_size: 0,
            channel_size: default_channel_size(),
            loads: 0,
            sets: 0,
            deletes: 0,
            gets: 0,
            ranges: 0,
            reverses: 0,
            iters: false,
            initial: 0,
        }
    }
}

impl GenOptions {
    pub fn read_ops(&self) -> usize {
        self.gets + self.ranges + self.reverses
    }

    pub fn write_ops(&self) -> usize {
        self.sets + self.deletes
    }

    /// Options for worker `id`, whose generator must not replay the same
    /// stream as its siblings.
    pub fn for_worker(&self, id: usize) -> GenOptions {
        let mut g = self.clone();
        g.seed = g.seed.wrapping_add((id as u64) * 100);
        g
    }

    /// Upper bound (exclusive) of the generated key space.
    pub fn key_limit(&self) -> u64 {
        cmp::max(self.loads * cmp::max(self.initial, 1), 1) as u64
    }

    fn to_rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }

    fn batch_size(&self) -> usize {
        cmp::max(self.channel_size, 1)
    }
}

/// Single index command.
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd<K, V> {
    Load { key: K, value: V },
    Set { key: K, value: V },
    Delete { key: K },
    Get { key: K },
    Range { low: Bound<K>, high: Bound<K> },
    Reverse { low: Bound<K>, high: Bound<K> },
}

impl<K, V> Cmd<K, V>
where
    K: RandomKV,
    V: RandomKV,
{
    pub fn gen_load(rng: &mut SmallRng, g: &GenOptions) -> Self {
        Cmd::Load {
            key: K::gen_key(rng, g),
            value: V::gen_val(rng, g),
        }
    }

    pub fn gen_set(rng: &mut SmallRng, g: &GenOptions) -> Self {
        Cmd::Set {
            key: K::gen_key(rng, g),
            value: V::gen_val(rng, g),
        }
    }

    pub fn gen_del(rng: &mut SmallRng, g: &GenOptions) -> Self {
        Cmd::Delete {
            key: K::gen_key(rng, g),
        }
    }

    pub fn gen_get(rng: &mut SmallRng, g: &GenOptions) -> Self {
        Cmd::Get {
            key: K::gen_key(rng, g),
        }
    }

    pub fn gen_range(rng: &mut SmallRng, g: &GenOptions) -> Self {
        let low = bounded_key::<K>(rng, g);
        let high = bounded_key::<K>(rng, g);
        Cmd::Range { low, high }
    }

    pub fn gen_reverse(rng: &mut SmallRng, g: &GenOptions) -> Self {
        let low = bounded_key::<K>(rng, g);
        let high = bounded_key::<K>(rng, g);
        Cmd::Reverse { low, high }
    }
}

fn bounded_key<K: RandomKV>(rng: &mut SmallRng, g: &GenOptions) -> Bound<K> {
    let key = K::gen_key(rng, g);
    match rng.gen_range(0..3) {
        0 => Bound::Included(key),
        1 => Bound::Excluded(key),
        _ => Bound::Unbounded,
    }
}

/// Keys and values that can be generated, measured and journaled.
pub trait RandomKV: 'static + Clone + Default + Send + Sync + fmt::Debug {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> Self;

    fn gen_val(rng: &mut SmallRng, g: &GenOptions) -> Self;

    /// Heap and inline bytes held by this item.
    fn footprint(&self) -> usize;

    /// Append the journal encoding of this item.
    fn encode(&self, buf: &mut Vec<u8>);
}

/// Key types additionally need ordering and hashing.
pub trait RandomKey: RandomKV + Ord + Hash {}

impl<T: RandomKV + Ord + Hash> RandomKey for T {}

impl RandomKV for i32 {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> i32 {
        let limit = cmp::min(g.key_limit(), i32::MAX as u64) as i32;
        rng.gen_range(0..limit)
    }

    fn gen_val(rng: &mut SmallRng, _g: &GenOptions) -> i32 {
        rng.gen_range(0..i32::MAX)
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<i32>()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl RandomKV for i64 {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> i64 {
        let limit = cmp::min(g.key_limit(), i64::MAX as u64) as i64;
        rng.gen_range(0..limit)
    }

    fn gen_val(rng: &mut SmallRng, _g: &GenOptions) -> i64 {
        rng.gen_range(0..i64::MAX)
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<i64>()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl RandomKV for u64 {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> u64 {
        rng.gen_range(0..g.key_limit())
    }

    fn gen_val(rng: &mut SmallRng, _g: &GenOptions) -> u64 {
        rng.gen()
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<u64>()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

pub const ARRAY_SIZE: usize = 20;

impl RandomKV for [u8; ARRAY_SIZE] {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> [u8; ARRAY_SIZE] {
        let num = rng.gen_range(0..g.key_limit());
        let mut arr = [0_u8; ARRAY_SIZE];
        arr.copy_from_slice(format!("{:020}", num).as_bytes());
        arr
    }

    fn gen_val(_rng: &mut SmallRng, _g: &GenOptions) -> [u8; ARRAY_SIZE] {
        [0xAB_u8; ARRAY_SIZE]
    }

    fn footprint(&self) -> usize {
        ARRAY_SIZE
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl RandomKV for Vec<u8> {
    fn gen_key(rng: &mut SmallRng, g: &GenOptions) -> Vec<u8> {
        let num = rng.gen_range(0..g.key_limit());
        format!("{:0width$}", num, width = g.key_size).into_bytes()
    }

    fn gen_val(_rng: &mut SmallRng, g: &GenOptions) -> Vec<u8> {
        vec![0xAB_u8; g.val_size]
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Vec<u8>>() + self.len()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

/// Remaining commands per kind, shared by the generators below.
#[derive(Debug, Clone, Default)]
struct Remaining {
    loads: usize,
    gets: usize,
    ranges: usize,
    reverses: usize,
    sets: usize,
    deletes: usize,
}

impl Remaining {
    fn total(&self) -> usize {
        self.loads + self.gets + self.ranges + self.reverses + self.sets + self.deletes
    }

    // Pick a kind with probability proportional to what is left of it.
    fn next_cmd<K, V>(&mut self, rng: &mut SmallRng, g: &GenOptions) -> Option<Cmd<K, V>>
    where
        K: RandomKV,
        V: RandomKV,
    {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let mut r = rng.gen_range(0..total);

        if r < self.loads {
            self.loads -= 1;
            return Some(Cmd::gen_load(rng, g));
        }
        r -= self.loads;
        if r < self.gets {
            self.gets -= 1;
            return Some(Cmd::gen_get(rng, g));
        }
        r -= self.gets;
        if r < self.ranges {
            self.ranges -= 1;
            return Some(Cmd::gen_range(rng, g));
        }
        r -= self.ranges;
        if r < self.reverses {
            self.reverses -= 1;
            return Some(Cmd::gen_reverse(rng, g));
        }
        r -= self.reverses;
        if r < self.sets {
            self.sets -= 1;
            return Some(Cmd::gen_set(rng, g));
        }
        self.deletes -= 1;
        Some(Cmd::gen_del(rng, g))
    }
}

/// Batching command stream over a [`Remaining`] budget.
pub struct Generator<K, V> {
    label: &'static str,
    g: GenOptions,
    total: usize,
    remaining: Remaining,
    rng: SmallRng,
    items: Vec<Cmd<K, V>>,
    elapsed: Duration,
}

impl<K, V> Generator<K, V>
where
    K: RandomKV,
    V: RandomKV,
{
    fn new(label: &'static str, g: GenOptions, remaining: Remaining) -> Self {
        let rng = g.to_rng();
        Generator {
            label,
            total: remaining.total(),
            g,
            remaining,
            rng,
            items: Vec::default(),
            elapsed: Duration::default(),
        }
    }

    /// Total number of commands this generator yields.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn log(&self) {
        debug!(
            target: "genrtr",
            "{}: generated {} items in {:?}", self.label, self.total, self.elapsed
        );
    }

    fn refill(&mut self) {
        let start = Instant::now();
        let n = cmp::min(self.remaining.total(), self.g.batch_size());
        for _ in 0..n {
            match self.remaining.next_cmd(&mut self.rng, &self.g) {
                Some(cmd) => self.items.push(cmd),
                None => break,
            }
        }
        // consumers pop from the back, keep generation order.
        self.items.reverse();
        self.elapsed += start.elapsed();
    }
}

impl<K, V> Iterator for Generator<K, V>
where
    K: RandomKV,
    V: RandomKV,
{
    type Item = Cmd<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.items.pop() {
            return Some(item);
        }
        if self.remaining.total() == 0 {
            if self.total > 0 {
                self.log();
                self.total = 0;
            }
            return None;
        }
        self.refill();
        self.items.pop()
    }
}

/// `loads` x Load commands.
pub fn initial_load<K: RandomKV, V: RandomKV>(g: GenOptions) -> Generator<K, V> {
    let remaining = Remaining {
        loads: g.loads,
        ..Remaining::default()
    };
    Generator::new("initial_load", g, remaining)
}

/// Gets, ranges and reverses mixed.
pub fn incremental_read<K: RandomKV, V: RandomKV>(g: GenOptions) -> Generator<K, V> {
    let remaining = Remaining {
        gets: g.gets,
        ranges: g.ranges,
        reverses: g.reverses,
        ..Remaining::default()
    };
    Generator::new("incr_read", g, remaining)
}

/// Sets and deletes mixed.
pub fn incremental_write<K: RandomKV, V: RandomKV>(g: GenOptions) -> Generator<K, V> {
    let remaining = Remaining {
        sets: g.sets,
        deletes: g.deletes,
        ..Remaining::default()
    };
    Generator::new("incr_write", g, remaining)
}

/// Every read and write kind mixed, for single threaded runs.
pub fn incremental_load<K: RandomKV, V: RandomKV>(g: GenOptions) -> Generator<K, V> {
    let remaining = Remaining {
        gets: g.gets,
        ranges: g.ranges,
        reverses: g.reverses,
        sets: g.sets,
        deletes: g.deletes,
        ..Remaining::default()
    };
    Generator::new("incr_load", g, remaining)
}
