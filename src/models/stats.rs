//! Per-operation counters and sampled latency histograms.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::models::result::{LatencyStats, OpSummary};
use crate::util::calculate_rate;

/// Histogram resolution.
const BUCKET_NANOS: u64 = 100;

/// Reported percentiles.
pub const PERCENTILES: [u8; 7] = [80, 90, 95, 96, 97, 98, 99];

/// Every n-th operation is timed, along with the first of each kind.
const SAMPLE_RATE: usize = 8;

/// Latency histogram with 100ns buckets.
#[derive(Debug, Clone, Default)]
pub struct Latency {
    samples: u64,
    total_nanos: u128,
    min: u64,
    max: u64,
    buckets: BTreeMap<u64, u64>,
}

impl Latency {
    pub fn record(&mut self, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as u64;
        if self.samples == 0 || nanos < self.min {
            self.min = nanos;
        }
        if nanos > self.max {
            self.max = nanos;
        }
        self.samples += 1;
        self.total_nanos += nanos as u128;
        *self.buckets.entry(nanos / BUCKET_NANOS).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &Latency) {
        if other.samples == 0 {
            return;
        }
        if self.samples == 0 || other.min < self.min {
            self.min = other.min;
        }
        self.max = std::cmp::max(self.max, other.max);
        self.samples += other.samples;
        self.total_nanos += other.total_nanos;
        for (bucket, count) in other.buckets.iter() {
            *self.buckets.entry(*bucket).or_insert(0) += count;
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max)
    }

    pub fn mean(&self) -> Duration {
        match self.samples {
            0 => Duration::default(),
            n => Duration::from_nanos((self.total_nanos / n as u128) as u64),
        }
    }

    /// Lower edge of the bucket holding each of [`PERCENTILES`].
    pub fn percentiles(&self) -> Vec<(u8, Duration)> {
        let mut out = Vec::with_capacity(PERCENTILES.len());
        let mut wanted = PERCENTILES.iter().peekable();
        let mut acc = 0_u64;
        for (bucket, count) in self.buckets.iter() {
            acc += count;
            while let Some(p) = wanted.peek() {
                let threshold = ((self.samples as f64) * (**p as f64) / 100.0) as u64;
                if acc > threshold {
                    out.push((**p, Duration::from_nanos(bucket * BUCKET_NANOS)));
                    wanted.next();
                } else {
                    break;
                }
            }
        }
        for p in wanted {
            out.push((*p, self.max()));
        }
        out
    }

    pub fn to_stats(&self) -> LatencyStats {
        LatencyStats {
            min: self.min(),
            avg: self.mean(),
            max: self.max(),
            percentiles: self.percentiles().into_iter().collect(),
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ps: Vec<String> = self
            .percentiles()
            .into_iter()
            .map(|(p, d)| format!("{}={}", p, d.as_nanos()))
            .collect();
        write!(
            f,
            "{{ samples={}, min={}, mean={}, max={}, percentiles={{ {} }} }}",
            self.samples,
            self.min,
            self.mean().as_nanos(),
            self.max,
            ps.join(", ")
        )
    }
}

/// Counters for one kind of operation.
#[derive(Debug, Clone)]
pub struct Op {
    name: &'static str,
    count: usize,
    items: usize,
    latency: Latency,
    started: Option<Instant>,
}

impl Op {
    pub fn new(name: &'static str) -> Op {
        Op {
            name,
            count: 0,
            items: 0,
            latency: Latency::default(),
            started: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Overwrites for load/set, misses for delete/get, entries visited for
    /// iter/range/reverse.
    pub fn items(&self) -> usize {
        self.items
    }

    pub fn latency(&self) -> &Latency {
        &self.latency
    }

    #[inline]
    pub fn sample_start(&mut self) {
        self.count += 1;
        if self.count == 1 || self.count % SAMPLE_RATE == 0 {
            self.started = Some(Instant::now());
        }
    }

    #[inline]
    pub fn sample_end(&mut self, items: usize) {
        if let Some(start) = self.started.take() {
            self.latency.record(start.elapsed());
        }
        self.items += items;
    }

    pub fn merge(&mut self, other: &Op) {
        self.count += other.count;
        self.items += other.items;
        self.latency.merge(&other.latency);
    }

    pub fn to_summary(&self, elapsed: Duration) -> OpSummary {
        OpSummary {
            name: self.name.to_string(),
            ops: self.count,
            items: self.items,
            ops_per_sec: calculate_rate(self.count as u64, elapsed),
            latency: self.latency.to_stats(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.count == 0 {
            return Ok(());
        }
        let label = match self.name {
            "delete" | "get" => "misses",
            "iter" | "range" | "reverse" => "items",
            _ => "updates",
        };
        write!(
            f,
            "{} = {{ ops={}, {}={}, latency={} }}",
            self.name, self.count, label, self.items, self.latency
        )
    }
}

/// Counters for every kind of operation a worker issues.
#[derive(Debug, Clone)]
pub struct Ops {
    pub load: Op,
    pub set: Op,
    pub delete: Op,
    pub get: Op,
    pub iter: Op,
    pub range: Op,
    pub reverse: Op,
    since: Instant,
}

impl Default for Ops {
    fn default() -> Self {
        Ops::new()
    }
}

impl Ops {
    pub fn new() -> Ops {
        Ops {
            load: Op::new("load"),
            set: Op::new("set"),
            delete: Op::new("delete"),
            get: Op::new("get"),
            iter: Op::new("iter"),
            range: Op::new("range"),
            reverse: Op::new("reverse"),
            since: Instant::now(),
        }
    }

    fn all(&self) -> [&Op; 7] {
        [
            &self.load,
            &self.set,
            &self.delete,
            &self.get,
            &self.iter,
            &self.range,
            &self.reverse,
        ]
    }

    pub fn merge(&mut self, other: &Ops) {
        self.load.merge(&other.load);
        self.set.merge(&other.set);
        self.delete.merge(&other.delete);
        self.get.merge(&other.get);
        self.iter.merge(&other.iter);
        self.range.merge(&other.range);
        self.reverse.merge(&other.reverse);
    }

    pub fn to_total(&self) -> usize {
        self.all().iter().map(|op| op.count).sum()
    }

    pub fn to_total_writes(&self) -> usize {
        self.load.count + self.set.count + self.delete.count
    }

    pub fn to_total_reads(&self) -> usize {
        self.get.count + self.iter.count + self.range.count + self.reverse.count
    }

    /// True once a second has passed since the last call that returned true.
    pub fn is_sec_elapsed(&mut self) -> bool {
        if self.since.elapsed() >= Duration::from_secs(1) {
            self.since = Instant::now();
            true
        } else {
            false
        }
    }

    /// Summaries for the kinds that saw at least one operation.
    pub fn to_summaries(&self, elapsed: Duration) -> Vec<OpSummary> {
        self.all()
            .iter()
            .filter(|op| op.count > 0)
            .map(|op| op.to_summary(elapsed))
            .collect()
    }
}

impl fmt::Display for Ops {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lines: Vec<String> = self
            .all()
            .iter()
            .filter(|op| op.count > 0)
            .map(|op| op.to_string())
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}
