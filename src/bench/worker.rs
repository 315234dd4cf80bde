//! Benchmark worker management system
//!
//! Workers run on tokio's blocking pool, one generator stream each, and
//! stream periodic stats over a channel to an aggregator task that drives
//! the progress bar, buckets them into a per second timeline and, when
//! verbose, logs them.

use std::fmt;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bench::generator::{Cmd, RandomKV, RandomKey};
use crate::index::{Reader, WalWriter, Writer};
use crate::models::{Ops, PeriodicStats, PhaseResult};
use crate::{IxperfError, Result};

/// What a worker does within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Loader,
    Writer,
    Reader,
    /// Reads and writes from one stream
    Mixed,
    Iterator,
    Journal,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            WorkerRole::Loader => "loader",
            WorkerRole::Writer => "writer",
            WorkerRole::Reader => "reader",
            WorkerRole::Mixed => "mixed",
            WorkerRole::Iterator => "iter",
            WorkerRole::Journal => "journal",
        };
        write!(f, "{}", s)
    }
}

/// Worker status for tracking individual worker states
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStatus {
    Running,
    Completed,
    Failed(String),
}

/// Individual worker information
#[derive(Debug)]
pub struct WorkerInfo {
    pub id: usize,
    pub role: WorkerRole,
    pub status: WorkerStatus,
    handle: Option<JoinHandle<Result<Ops>>>,
}

/// Periodic stats sent by a worker, covering the ops since its last report.
#[derive(Debug)]
pub struct WorkerEvent {
    pub id: usize,
    pub role: WorkerRole,
    pub ops: Ops,
}

/// Handle passed into each worker.
pub struct WorkerCtx {
    pub id: usize,
    pub role: WorkerRole,
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerCtx {
    fn report(&self, ops: &Ops) {
        if ops.to_total() == 0 {
            return;
        }
        let event = WorkerEvent {
            id: self.id,
            role: self.role,
            ops: ops.clone(),
        };
        // aggregator gone means the phase is being torn down.
        let _ = self.tx.blocking_send(event);
    }

    /// Apply every command through `apply`, reporting once a second.
    pub fn drive<K, V, I, F>(&self, cmds: I, mut apply: F) -> Result<Ops>
    where
        I: Iterator<Item = Cmd<K, V>>,
        F: FnMut(Cmd<K, V>, &mut Ops) -> Result<()>,
    {
        let mut fstats = Ops::new();
        let mut lstats = Ops::new();
        for cmd in cmds {
            apply(cmd, &mut lstats)?;
            if lstats.is_sec_elapsed() {
                self.report(&lstats);
                fstats.merge(&lstats);
                lstats = Ops::new();
            }
        }
        self.report(&lstats);
        fstats.merge(&lstats);
        Ok(fstats)
    }

    /// Report the stats of a worker that ran outside [`WorkerCtx::drive`].
    pub fn finish(&self, ops: Ops) -> Result<Ops> {
        self.report(&ops);
        Ok(ops)
    }
}

/// Apply a load, set or delete.
pub fn apply_write<K, V, W>(w: &mut W, cmd: Cmd<K, V>, ops: &mut Ops) -> Result<()>
where
    K: RandomKV,
    V: RandomKV,
    W: Writer<K, V>,
{
    match cmd {
        Cmd::Load { key, value } => {
            ops.load.sample_start();
            let n = w.set(key, value)?.map_or(0, |_| 1);
            ops.load.sample_end(n);
        }
        Cmd::Set { key, value } => {
            ops.set.sample_start();
            let n = w.set(key, value)?.map_or(0, |_| 1);
            ops.set.sample_end(n);
        }
        Cmd::Delete { key } => {
            ops.delete.sample_start();
            let n = w.delete(&key)?.map_or(1, |_| 0);
            ops.delete.sample_end(n);
        }
        cmd => {
            return Err(IxperfError::WorkerError(format!(
                "writer cannot apply {:?}",
                cmd
            )))
        }
    }
    Ok(())
}

/// Apply a get, range or reverse.
pub fn apply_read<K, V, R>(r: &R, cmd: Cmd<K, V>, ops: &mut Ops) -> Result<()>
where
    K: RandomKV,
    V: RandomKV,
    R: Reader<K, V>,
{
    match cmd {
        Cmd::Get { key } => {
            ops.get.sample_start();
            let n = r.get(&key)?.map_or(1, |_| 0);
            ops.get.sample_end(n);
        }
        Cmd::Range { low, high } => {
            ops.range.sample_start();
            let n = r.range(low, high)?;
            ops.range.sample_end(n);
        }
        Cmd::Reverse { low, high } => {
            ops.reverse.sample_start();
            let n = r.reverse(low, high)?;
            ops.reverse.sample_end(n);
        }
        cmd => {
            return Err(IxperfError::WorkerError(format!(
                "reader cannot apply {:?}",
                cmd
            )))
        }
    }
    Ok(())
}

/// Apply any command, reads through `r` and writes through `w`.
pub fn apply_mixed<K, V, R, W>(r: &R, w: &mut W, cmd: Cmd<K, V>, ops: &mut Ops) -> Result<()>
where
    K: RandomKV,
    V: RandomKV,
    R: Reader<K, V>,
    W: Writer<K, V>,
{
    match cmd {
        cmd @ Cmd::Get { .. } | cmd @ Cmd::Range { .. } | cmd @ Cmd::Reverse { .. } => {
            apply_read(r, cmd, ops)
        }
        cmd => apply_write(w, cmd, ops),
    }
}

/// Journal a set or delete.
pub fn apply_journal<K, V>(w: &mut WalWriter<K, V>, cmd: Cmd<K, V>, ops: &mut Ops) -> Result<()>
where
    K: RandomKey,
    V: RandomKV,
{
    match cmd {
        Cmd::Set { key, value } => {
            ops.set.sample_start();
            w.set(key, value)?;
            ops.set.sample_end(0);
        }
        Cmd::Delete { key } => {
            ops.delete.sample_start();
            w.delete(&key)?;
            ops.delete.sample_end(0);
        }
        cmd => {
            return Err(IxperfError::WorkerError(format!(
                "journal cannot apply {:?}",
                cmd
            )))
        }
    }
    Ok(())
}

/// Full iteration, counted as a single `iter` op.
pub fn iterate<K, V, R>(r: &R, ops: &mut Ops) -> Result<()>
where
    R: Reader<K, V>,
{
    ops.iter.sample_start();
    let n = r.iter()?;
    ops.iter.sample_end(n);
    Ok(())
}

/// Merged outcome of one phase.
#[derive(Debug)]
pub struct PhaseStats {
    pub name: String,
    pub threads: usize,
    pub elapsed: Duration,
    pub ops: Ops,
    /// Ops reported within each second of the phase
    pub timeline: Vec<Ops>,
}

impl PhaseStats {
    pub fn to_result(&self) -> PhaseResult {
        let timeline = self
            .timeline
            .iter()
            .enumerate()
            .map(|(sec, ops)| {
                let sec = sec as u64;
                // the last second is usually partial
                let span = match self.elapsed.saturating_sub(Duration::from_secs(sec)) {
                    span if span.is_zero() => Duration::from_secs(1),
                    span => span.min(Duration::from_secs(1)),
                };
                PeriodicStats {
                    sec,
                    ops: ops.to_summaries(span),
                }
            })
            .collect();
        PhaseResult {
            name: self.name.clone(),
            threads: self.threads,
            elapsed: self.elapsed,
            ops: self.ops.to_summaries(self.elapsed),
            timeline,
        }
    }
}

/// Runs the workers of one phase and collects their stats.
pub struct WorkerManager {
    phase: String,
    workers: Vec<WorkerInfo>,
    events_tx: mpsc::Sender<WorkerEvent>,
    aggregator: JoinHandle<Vec<Ops>>,
    start_time: Instant,
}

impl WorkerManager {
    /// Start a phase expected to issue `total_ops` operations. Must be
    /// called within a tokio runtime.
    pub fn new(phase: &str, total_ops: u64, verbose: bool) -> WorkerManager {
        let (events_tx, events_rx) = mpsc::channel(100);
        let aggregator = tokio::spawn(aggregate(
            phase.to_string(),
            events_rx,
            progress_bar(total_ops),
            verbose,
        ));
        WorkerManager {
            phase: phase.to_string(),
            workers: Vec::new(),
            events_tx,
            aggregator,
            start_time: Instant::now(),
        }
    }

    /// Spawn one worker on the blocking pool.
    pub fn spawn<F>(&mut self, role: WorkerRole, work: F)
    where
        F: FnOnce(WorkerCtx) -> Result<Ops> + Send + 'static,
    {
        let id = self.workers.len();
        let ctx = WorkerCtx {
            id,
            role,
            tx: self.events_tx.clone(),
        };
        debug!(target: "ixperf", "{}: spawning {}-{}", self.phase, role, id);
        let handle = tokio::task::spawn_blocking(move || work(ctx));
        self.workers.push(WorkerInfo {
            id,
            role,
            status: WorkerStatus::Running,
            handle: Some(handle),
        });
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for all workers, merging their stats. The first worker error
    /// fails the phase once every worker has stopped.
    pub async fn wait_for_completion(mut self) -> Result<PhaseStats> {
        let mut ops = Ops::new();
        let mut first_err = None;

        for worker in self.workers.iter_mut() {
            let handle = match worker.handle.take() {
                Some(handle) => handle,
                None => continue,
            };
            match handle.await {
                Ok(Ok(wops)) => {
                    worker.status = WorkerStatus::Completed;
                    info!(
                        target: "ixperf",
                        "{}: {}-{} finished {} ops", self.phase, worker.role, worker.id,
                        wops.to_total()
                    );
                    ops.merge(&wops);
                }
                Ok(Err(e)) => {
                    worker.status = WorkerStatus::Failed(e.to_string());
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    worker.status = WorkerStatus::Failed(format!("Join error: {}", e));
                    first_err.get_or_insert(IxperfError::WorkerError(format!(
                        "{}-{} join failed: {}",
                        worker.role, worker.id, e
                    )));
                }
            }
        }
        let elapsed = self.start_time.elapsed();

        drop(self.events_tx);
        let timeline = match self.aggregator.await {
            Ok(timeline) => timeline,
            Err(e) => {
                debug!(target: "ixperf", "{}: timeline lost: {}", self.phase, e);
                Vec::new()
            }
        };

        if let Some(err) = first_err {
            let failed = self
                .workers
                .iter()
                .filter(|w| matches!(w.status, WorkerStatus::Failed(_)))
                .count();
            error!(
                target: "ixperf",
                "{}: {} of {} workers failed", self.phase, failed, self.workers.len()
            );
            return Err(err);
        }
        Ok(PhaseStats {
            name: self.phase,
            threads: self.workers.len(),
            elapsed,
            ops,
            timeline,
        })
    }
}

fn progress_bar(total_ops: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_ops);
    let style = ProgressStyle::with_template("{spinner} {prefix} {pos}/{len} ops ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

async fn aggregate(
    phase: String,
    mut events_rx: mpsc::Receiver<WorkerEvent>,
    pb: ProgressBar,
    verbose: bool,
) -> Vec<Ops> {
    pb.set_prefix(phase.clone());
    let start = Instant::now();
    let mut done = 0_u64;
    let mut timeline: Vec<Ops> = Vec::new();
    while let Some(event) = events_rx.recv().await {
        let sec = start.elapsed().as_secs() as usize;
        if timeline.len() <= sec {
            timeline.resize_with(sec + 1, Ops::new);
        }
        timeline[sec].merge(&event.ops);

        let n = event.ops.to_total() as u64;
        done += n;
        pb.inc(n);
        let secs = start.elapsed().as_secs_f64();
        if secs > 0.0 {
            pb.set_message(format!("{:.0} ops/s", done as f64 / secs));
        }
        if verbose {
            pb.suspend(|| {
                info!(
                    target: "ixperf",
                    "{}: {}-{} periodic-stats\n{}", phase, event.role, event.id, event.ops
                )
            });
        }
    }
    pb.finish_and_clear();
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::generator::{incremental_load, initial_load, GenOptions};
    use crate::config::LlrbOpt;
    use crate::index::{Index, MemIndex};

    fn gen_opts() -> GenOptions {
        GenOptions {
            seed: 3,
            loads: 500,
            sets: 50,
            deletes: 20,
            gets: 40,
            ranges: 5,
            reverses: 5,
            channel_size: 64,
            ..GenOptions::default()
        }
    }

    #[tokio::test]
    async fn test_loaders_merge_stats() {
        let index: MemIndex<i64, i64> = MemIndex::new("test", LlrbOpt::default());
        let mut manager = WorkerManager::new("initial-load", 1000, false);
        for id in 0..2 {
            let mut w = index.to_writer().unwrap();
            let g = gen_opts().for_worker(id);
            manager.spawn(WorkerRole::Loader, move |ctx| {
                ctx.drive(initial_load::<i64, i64>(g), |cmd, ops| {
                    apply_write(&mut w, cmd, ops)
                })
            });
        }
        assert_eq!(manager.worker_count(), 2);

        let phase = manager.wait_for_completion().await.unwrap();
        assert_eq!(phase.threads, 2);
        assert_eq!(phase.ops.load.count(), 1000);
        assert_eq!(phase.ops.to_total_writes(), 1000);

        let stats = index.validate().unwrap();
        assert_eq!(stats.live, 1000 - phase.ops.load.items());
        let result = phase.to_result();
        assert_eq!(result.op("load").unwrap().ops, 1000);

        let timeline_ops: usize = phase.timeline.iter().map(|ops| ops.load.count()).sum();
        assert_eq!(timeline_ops, 1000);
        assert_eq!(result.timeline.len(), phase.timeline.len());
        assert_eq!(result.timeline[0].sec, 0);
    }

    #[tokio::test]
    async fn test_mixed_worker() {
        let index: MemIndex<u64, u64> = MemIndex::new("test", LlrbOpt::default());
        let mut manager = WorkerManager::new("incremental", 120, true);
        let r = index.to_reader().unwrap();
        let mut w = index.to_writer().unwrap();
        manager.spawn(WorkerRole::Mixed, move |ctx| {
            ctx.drive(incremental_load::<u64, u64>(gen_opts()), |cmd, ops| {
                apply_mixed(&r, &mut w, cmd, ops)
            })
        });
        let phase = manager.wait_for_completion().await.unwrap();
        assert_eq!(phase.ops.to_total(), 120);
        assert_eq!(phase.ops.get.count(), 40);
        assert_eq!(phase.ops.delete.count(), 20);

        let (set, del) = (&phase.ops.set, &phase.ops.delete);
        let live = (set.count() - set.items()) - (del.count() - del.items());
        assert_eq!(index.validate().unwrap().live, live);
    }

    #[tokio::test]
    async fn test_worker_error_fails_phase() {
        let index: MemIndex<i32, i32> = MemIndex::new("test", LlrbOpt::default());
        let mut manager = WorkerManager::new("broken", 10, false);
        let r = index.to_reader().unwrap();
        manager.spawn(WorkerRole::Reader, move |ctx| {
            ctx.drive(initial_load::<i32, i32>(gen_opts()), |cmd, ops| {
                apply_read(&r, cmd, ops)
            })
        });
        let err = manager.wait_for_completion().await.unwrap_err();
        assert!(matches!(err, IxperfError::WorkerError(_)));
    }
}
