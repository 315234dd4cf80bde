//! Benchmark result data models
//!
//! Contains structures for storing and serializing the outcome of one
//! profile run: per-phase operation summaries, latency statistics, index
//! statistics and the machine it ran on.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProfileSummary;
use crate::index::IndexStats;
use crate::util::calculate_rate;

/// Complete result of one profile run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Timestamp when the run finished
    pub timestamp: DateTime<Utc>,
    /// What was run
    pub profile: ProfileSummary,
    /// Generator seed after resolution
    pub seed: u64,
    /// Phases in execution order
    pub phases: Vec<PhaseResult>,
    /// Index statistics gathered by the final validation
    pub index: Option<IndexStats>,
    /// System information at time of run
    pub system_info: SystemInfo,
}

/// One phase of a run: initial load, full iteration or incremental.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    /// Number of workers that ran the phase
    pub threads: usize,
    pub elapsed: Duration,
    pub ops: Vec<OpSummary>,
    /// Per second breakdown, in order
    #[serde(default)]
    pub timeline: Vec<PeriodicStats>,
}

/// Operations that completed within one second of a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicStats {
    /// Seconds since the phase started
    pub sec: u64,
    pub ops: Vec<OpSummary>,
}

/// Totals for one kind of operation within a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpSummary {
    pub name: String,
    pub ops: usize,
    pub items: usize,
    pub ops_per_sec: f64,
    pub latency: LatencyStats,
}

/// Latency statistics with min/avg/max and percentiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: Duration,
    /// Mean over sampled operations
    pub avg: Duration,
    pub max: Duration,
    /// Keyed by percentile, see [`crate::models::stats::PERCENTILES`]
    pub percentiles: BTreeMap<u8, Duration>,
}

/// System information captured at run time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system and architecture
    pub os: String,
    /// Logical CPUs available to the process
    pub cpus: usize,
    /// Total system memory in bytes, 0 when unknown
    pub memory_total: u64,
    /// Peak resident set size of this process in bytes, 0 when unknown
    pub max_rss: u64,
}

impl RunResult {
    pub fn new(profile: ProfileSummary, seed: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            profile,
            seed,
            phases: Vec::new(),
            index: None,
            system_info: SystemInfo::detect(),
        }
    }

    /// Total wall time across phases.
    pub fn elapsed(&self) -> Duration {
        self.phases.iter().map(|p| p.elapsed).sum()
    }

    /// Get a human-readable one line summary of the run
    pub fn summary(&self) -> String {
        let ops: usize = self.phases.iter().map(|p| p.total_ops()).sum();
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = calculate_rate(ops as u64, elapsed);
        format!(
            "{} - {} {}/{} - {} ops in {:.2}s - {:.0} ops/s",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.profile.index,
            self.profile.key_type,
            self.profile.value_type,
            ops,
            secs,
            rate
        )
    }

    /// Same profile file, index and type pair.
    pub fn same_workload(&self, other: &RunResult) -> bool {
        let (a, b) = (&self.profile, &other.profile);
        a.path == b.path
            && a.index == b.index
            && a.key_type == b.key_type
            && a.value_type == b.value_type
    }

    /// Per operation throughput against `baseline`, for the phases and
    /// operation kinds both runs have.
    pub fn compare(&self, baseline: &RunResult) -> Vec<OpDelta> {
        let mut deltas = Vec::new();
        for phase in self.phases.iter() {
            let base = match baseline.phases.iter().find(|p| p.name == phase.name) {
                Some(base) => base,
                None => continue,
            };
            for op in phase.ops.iter() {
                if let Some(before) = base.op(&op.name) {
                    deltas.push(OpDelta {
                        phase: phase.name.clone(),
                        op: op.name.clone(),
                        before: before.ops_per_sec,
                        after: op.ops_per_sec,
                    });
                }
            }
        }
        deltas
    }
}

/// Throughput of one operation kind in a run against an earlier run of
/// the same workload.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDelta {
    pub phase: String,
    pub op: String,
    pub before: f64,
    pub after: f64,
}

impl OpDelta {
    /// Relative change in percent, zero when the baseline saw no throughput.
    pub fn change(&self) -> f64 {
        if self.before <= 0.0 {
            return 0.0;
        }
        (self.after - self.before) / self.before * 100.0
    }
}

impl fmt::Display for OpDelta {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{}: {:.0} -> {:.0} ops/s ({:+.1}%)",
            self.phase,
            self.op,
            self.before,
            self.after,
            self.change()
        )
    }
}

impl PhaseResult {
    pub fn total_ops(&self) -> usize {
        self.ops.iter().map(|o| o.ops).sum()
    }

    pub fn ops_per_sec(&self) -> f64 {
        calculate_rate(self.total_ops() as u64, self.elapsed)
    }

    pub fn op(&self, name: &str) -> Option<&OpSummary> {
        self.ops.iter().find(|o| o.name == name)
    }
}

impl LatencyStats {
    /// Latency at percentile `p`, falling back to the maximum when `p` was
    /// not recorded.
    pub fn at(&self, p: u8) -> Duration {
        self.percentiles.get(&p).copied().unwrap_or(self.max)
    }

    pub fn p95(&self) -> Duration {
        self.at(95)
    }

    pub fn p99(&self) -> Duration {
        self.at(99)
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: detect_os(),
            cpus: detect_cpus(),
            memory_total: detect_memory_total(),
            max_rss: detect_max_rss(),
        }
    }
}

impl SystemInfo {
    /// Create system info by detecting current system
    pub fn detect() -> Self {
        Self::default()
    }
}

fn detect_os() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

fn detect_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(unix)]
fn detect_memory_total() -> u64 {
    // SAFETY: sysconf only reads system configuration values.
    let (pages, page_size) = unsafe {
        (
            libc::sysconf(libc::_SC_PHYS_PAGES),
            libc::sysconf(libc::_SC_PAGESIZE),
        )
    };
    if pages <= 0 || page_size <= 0 {
        return 0;
    }
    (pages as u64).saturating_mul(page_size as u64)
}

#[cfg(not(unix))]
fn detect_memory_total() -> u64 {
    0
}

#[cfg(unix)]
fn detect_max_rss() -> u64 {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage fills the struct when it returns 0.
    let usage = unsafe {
        if libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) != 0 {
            return 0;
        }
        usage.assume_init()
    };
    let max_rss = usage.ru_maxrss.max(0) as u64;
    // linux reports kilobytes, macos bytes.
    if cfg!(target_os = "macos") {
        max_rss
    } else {
        max_rss * 1024
    }
}

#[cfg(not(unix))]
fn detect_max_rss() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataType;
    use std::path::PathBuf;

    fn create_test_summary() -> ProfileSummary {
        ProfileSummary {
            path: PathBuf::from("profiles/llrb.toml"),
            index: "rdms/llrb".to_string(),
            key_type: DataType::I64,
            value_type: DataType::I64,
            loads: 1000,
            sets: 100,
            deletes: 10,
            gets: 100,
            ranges: 0,
            reverses: 0,
            initial: 1,
            readers: 1,
            writers: 1,
        }
    }

    fn create_test_latency_stats() -> LatencyStats {
        LatencyStats {
            min: Duration::from_nanos(300),
            avg: Duration::from_micros(1),
            max: Duration::from_micros(40),
            percentiles: [
                (80, Duration::from_micros(2)),
                (95, Duration::from_micros(5)),
                (99, Duration::from_micros(9)),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn create_test_phase() -> PhaseResult {
        PhaseResult {
            name: "initial-load".to_string(),
            threads: 1,
            elapsed: Duration::from_secs(2),
            ops: vec![OpSummary {
                name: "load".to_string(),
                ops: 1000,
                items: 12,
                ops_per_sec: 500.0,
                latency: create_test_latency_stats(),
            }],
            timeline: Vec::new(),
        }
    }

    #[test]
    fn test_run_result_summary() {
        let mut result = RunResult::new(create_test_summary(), 7);
        result.phases.push(create_test_phase());

        assert_eq!(result.elapsed(), Duration::from_secs(2));
        let summary = result.summary();
        assert!(summary.contains("rdms/llrb i64/i64"));
        assert!(summary.contains("1000 ops"));
        assert!(summary.contains("500 ops/s"));
    }

    #[test]
    fn test_phase_totals() {
        let phase = create_test_phase();
        assert_eq!(phase.total_ops(), 1000);
        assert_eq!(phase.ops_per_sec(), 500.0);
        assert!(phase.op("load").is_some());
        assert!(phase.op("get").is_none());
    }

    #[test]
    fn test_latency_fallbacks() {
        let latency = create_test_latency_stats();
        assert_eq!(latency.p95(), Duration::from_micros(5));
        assert_eq!(latency.at(90), Duration::from_micros(40));
        assert_eq!(LatencyStats::default().p99(), Duration::default());
    }

    #[test]
    fn test_json_keeps_durations() {
        let mut result = RunResult::new(create_test_summary(), 7);
        result.phases.push(create_test_phase());
        let json = serde_json::to_string(&result).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();

        let latency = &back.phases[0].ops[0].latency;
        assert_eq!(latency.min, Duration::from_nanos(300));
        assert_eq!(latency.p99(), Duration::from_micros(9));
        assert_eq!(back.profile, result.profile);
        assert!(back.phases[0].timeline.is_empty());
    }

    #[test]
    fn test_compare_against_baseline() {
        let mut baseline = RunResult::new(create_test_summary(), 7);
        baseline.phases.push(create_test_phase());

        let mut result = RunResult::new(create_test_summary(), 9);
        let mut phase = create_test_phase();
        phase.ops[0].ops_per_sec = 750.0;
        phase.ops.push(OpSummary {
            name: "set".to_string(),
            ops: 10,
            items: 0,
            ops_per_sec: 5.0,
            latency: LatencyStats::default(),
        });
        result.phases.push(phase);
        assert!(result.same_workload(&baseline));

        let deltas = result.compare(&baseline);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].op, "load");
        assert!((deltas[0].change() - 50.0).abs() < 1e-9);
        assert_eq!(
            deltas[0].to_string(),
            "initial-load/load: 500 -> 750 ops/s (+50.0%)"
        );

        let mut other = create_test_summary();
        other.index = "btree-map".to_string();
        assert!(!result.same_workload(&RunResult::new(other, 7)));
    }

    #[test]
    fn test_system_info_detection() {
        let info = SystemInfo::detect();
        assert!(!info.os.is_empty());
        assert!(info.cpus >= 1);
        #[cfg(target_os = "linux")]
        {
            assert!(info.memory_total > 0);
            assert!(info.max_rss > 0);
        }
    }
}
