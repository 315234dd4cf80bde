//! Runs one profile end to end.
//!
//! Picks the concrete key/value types and index backend, then runs the
//! initial load, the optional full iteration and the incremental phase,
//! and finally checks the index against the operations applied to it.

use tracing::info;

use crate::bench::generator::{
    incremental_load, incremental_read, incremental_write, initial_load, RandomKV, RandomKey,
    ARRAY_SIZE,
};
use crate::bench::worker::{
    apply_journal, apply_mixed, apply_read, apply_write, iterate, PhaseStats, WorkerManager,
    WorkerRole,
};
use crate::config::{DataType, IndexKind, Profile, RdmsIndex};
use crate::index::{wal, BtreeIndex, Index, IndexStats, MemIndex, ShardedIndex, Wal};
use crate::models::{Ops, RunResult};
use crate::{IxperfError, Result};

/// Run a profile whose seed has already been resolved.
pub async fn run(profile: &Profile) -> Result<RunResult> {
    use DataType::*;

    info!(
        target: "ixperf",
        "{}: running {} <{},{}> seed {}",
        profile.name(),
        profile.index_label(),
        profile.ixperf.key_type,
        profile.ixperf.value_type,
        profile.generator.seed
    );
    match (profile.ixperf.key_type, profile.ixperf.value_type) {
        (I32, I32) => run_typed::<i32, i32>(profile).await,
        (I32, I64) => run_typed::<i32, i64>(profile).await,
        (I32, Array) => run_typed::<i32, [u8; ARRAY_SIZE]>(profile).await,
        (I32, Bytes) => run_typed::<i32, Vec<u8>>(profile).await,
        (I64, I64) => run_typed::<i64, i64>(profile).await,
        (I64, Array) => run_typed::<i64, [u8; ARRAY_SIZE]>(profile).await,
        (I64, Bytes) => run_typed::<i64, Vec<u8>>(profile).await,
        (U64, U64) => run_typed::<u64, u64>(profile).await,
        (U64, Bytes) => run_typed::<u64, Vec<u8>>(profile).await,
        (Array, Array) => run_typed::<[u8; ARRAY_SIZE], [u8; ARRAY_SIZE]>(profile).await,
        (Array, Bytes) => run_typed::<[u8; ARRAY_SIZE], Vec<u8>>(profile).await,
        (Bytes, Bytes) => run_typed::<Vec<u8>, Vec<u8>>(profile).await,
        (kt, vt) => Err(IxperfError::ProfileError(format!(
            "unsupported key/value types {}/{}",
            kt, vt
        ))),
    }
}

async fn run_typed<K, V>(p: &Profile) -> Result<RunResult>
where
    K: RandomKey,
    V: RandomKV,
{
    let mut result = RunResult::new(p.summary(), p.generator.seed);
    let name = p.name();

    match p.ixperf.index {
        IndexKind::BtreeMap => {
            let index: BtreeIndex<K, V> = BtreeIndex::new(name);
            run_index(p, index, 1, true, &mut result).await?;
        }
        IndexKind::Rdms => {
            let rdms = p.rdms.as_ref().ok_or_else(|| {
                IxperfError::ProfileError("index = \"rdms\" needs an [rdms] section".to_string())
            })?;
            let initial = rdms.initial_threads();
            match rdms.index {
                RdmsIndex::Llrb => {
                    let index: MemIndex<K, V> = MemIndex::new(name, p.llrb_opt());
                    run_index(p, index, initial, false, &mut result).await?;
                }
                RdmsIndex::Mvcc => {
                    let index: MemIndex<K, V> = MemIndex::new(name, p.mvcc_opt());
                    run_index(p, index, initial, false, &mut result).await?;
                }
                RdmsIndex::Shllrb => {
                    let index: ShardedIndex<K, V> = ShardedIndex::new(name, &p.shllrb_opt())?;
                    run_index(p, index, initial, false, &mut result).await?;
                }
                RdmsIndex::Wal => run_wal::<K, V>(p, &mut result).await?,
                other => {
                    return Err(IxperfError::Unsupported(format!(
                        "rdms index {:?} is not available in this build",
                        other.as_str()
                    )))
                }
            }
        }
    }

    result.system_info = crate::models::SystemInfo::detect();
    Ok(result)
}

fn log_phase(name: &str, phase: &PhaseStats) {
    info!(
        target: "ixperf",
        "{}: {} done, {} ops by {} threads in {:?}",
        name,
        phase.name,
        phase.ops.to_total(),
        phase.threads,
        phase.elapsed
    );
    if phase.ops.to_total() > 0 {
        info!(target: "ixperf", "{}: {} stats\n{}", name, phase.name, phase.ops);
    }
}

async fn run_index<K, V, I>(
    p: &Profile,
    index: I,
    initial: usize,
    sequential: bool,
    result: &mut RunResult,
) -> Result<()>
where
    K: RandomKey,
    V: RandomKV,
    I: Index<K, V>,
{
    let g = &p.generator;
    let name = p.name();
    let mut writes = Ops::new();

    if g.loads > 0 {
        let mut manager =
            WorkerManager::new("initial-load", (g.loads * initial) as u64, p.verbose);
        for id in 0..initial {
            let mut w = index.to_writer()?;
            let gen = initial_load::<K, V>(g.for_worker(id));
            manager.spawn(WorkerRole::Loader, move |ctx| {
                ctx.drive(gen, |cmd, ops| apply_write(&mut w, cmd, ops))
            });
        }
        let phase = manager.wait_for_completion().await?;
        log_phase(name, &phase);
        writes.merge(&phase.ops);
        result.phases.push(phase.to_result());
    }

    if g.iters {
        let mut manager = WorkerManager::new("iterate", 1, p.verbose);
        let r = index.to_reader()?;
        manager.spawn(WorkerRole::Iterator, move |ctx| {
            let mut ops = Ops::new();
            iterate::<K, V, _>(&r, &mut ops)?;
            ctx.finish(ops)
        });
        let phase = manager.wait_for_completion().await?;
        log_phase(name, &phase);
        result.phases.push(phase.to_result());
    }

    let (readers, writers) = match &p.rdms {
        Some(rdms) if !sequential => (rdms.readers, rdms.writers),
        _ => (0, 0),
    };
    if g.read_ops() + g.write_ops() > 0 {
        let phase = if readers + writers == 0 {
            let total = (g.read_ops() + g.write_ops()) as u64;
            let mut manager = WorkerManager::new("incremental", total, p.verbose);
            let r = index.to_reader()?;
            let mut w = index.to_writer()?;
            let gen = incremental_load::<K, V>(g.clone());
            manager.spawn(WorkerRole::Mixed, move |ctx| {
                ctx.drive(gen, |cmd, ops| apply_mixed(&r, &mut w, cmd, ops))
            });
            manager.wait_for_completion().await?
        } else {
            let total = (g.write_ops() * writers + g.read_ops() * readers) as u64;
            let mut manager = WorkerManager::new("incremental", total, p.verbose);
            for id in 0..writers {
                let mut w = index.to_writer()?;
                let gen = incremental_write::<K, V>(g.for_worker(id));
                manager.spawn(WorkerRole::Writer, move |ctx| {
                    ctx.drive(gen, |cmd, ops| apply_write(&mut w, cmd, ops))
                });
            }
            for id in 0..readers {
                let r = index.to_reader()?;
                let gen = incremental_read::<K, V>(g.for_worker(writers + id));
                manager.spawn(WorkerRole::Reader, move |ctx| {
                    ctx.drive(gen, |cmd, ops| apply_read(&r, cmd, ops))
                });
            }
            manager.wait_for_completion().await?
        };
        log_phase(name, &phase);
        writes.merge(&phase.ops);
        result.phases.push(phase.to_result());
    }

    let stats = index.validate()?;
    check_index(&stats, &writes)?;
    info!(
        target: "ixperf",
        "{}: validated entries:{} live:{} tombstones:{} versions:{} conflicts:{}",
        name, stats.entries, stats.live, stats.tombstones, stats.versions, stats.conflicts
    );
    result.index = Some(stats);
    Ok(())
}

/// Check index statistics against the writes that produced them.
pub fn check_index(stats: &IndexStats, writes: &Ops) -> Result<()> {
    let inserts = (writes.load.count() - writes.load.items())
        + (writes.set.count() - writes.set.items());
    let deletes = writes.delete.count() - writes.delete.items();
    let expected = inserts.checked_sub(deletes).ok_or_else(|| {
        IxperfError::ValidationError(format!(
            "{}: {} successful deletes exceed {} inserts",
            stats.name, deletes, inserts
        ))
    })?;
    if stats.live != expected {
        return Err(IxperfError::ValidationError(format!(
            "{}: expected {} live entries, found {}",
            stats.name, expected, stats.live
        )));
    }
    if let Some(write_locks) = stats.write_locks {
        let total = writes.to_total_writes() as u64;
        if write_locks != total {
            return Err(IxperfError::ValidationError(format!(
                "{}: expected {} write latches, found {}",
                stats.name, total, write_locks
            )));
        }
    }
    Ok(())
}

async fn run_wal<K, V>(p: &Profile, result: &mut RunResult) -> Result<()>
where
    K: RandomKey,
    V: RandomKV,
{
    let opt = p.rdms_wal.as_ref().ok_or_else(|| {
        IxperfError::ProfileError("[rdms] index = \"wal\" needs a [rdms-wal] section".to_string())
    })?;
    let g = &p.generator;
    let journal: Wal<K, V> = Wal::create(opt)?;

    let mut writes = Ops::new();
    if g.write_ops() > 0 {
        let total = (g.write_ops() * opt.writers) as u64;
        let mut manager = WorkerManager::new("journal", total, p.verbose);
        for id in 0..opt.writers {
            let mut w = journal.to_writer();
            let gen = incremental_write::<K, V>(g.for_worker(id));
            manager.spawn(WorkerRole::Journal, move |ctx| {
                ctx.drive(gen, |cmd, ops| apply_journal(&mut w, cmd, ops))
            });
        }
        let phase = manager.wait_for_completion().await?;
        log_phase(journal.name(), &phase);
        writes.merge(&phase.ops);
        result.phases.push(phase.to_result());
    }

    let written = journal.close()?;
    let replayed = wal::replay(journal.dir(), journal.name())?;
    let expected = writes.to_total_writes() as u64;
    if written != expected || replayed.records() != expected {
        return Err(IxperfError::ValidationError(format!(
            "{}: {} writes, {} journaled, {} replayed",
            journal.name(),
            expected,
            written,
            replayed.records()
        )));
    }
    info!(
        target: "ixperf",
        "{}: replayed {} records from {} journal files",
        journal.name(), replayed.records(), replayed.files
    );

    result.index = Some(IndexStats {
        name: journal.name().to_string(),
        entries: replayed.records() as usize,
        shards: journal.num_shards(),
        ..IndexStats::default()
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops_with(loads: usize, overwrites: usize, deletes: usize, misses: usize) -> Ops {
        let mut ops = Ops::new();
        for i in 0..loads {
            ops.load.sample_start();
            ops.load.sample_end(if i < overwrites { 1 } else { 0 });
        }
        for i in 0..deletes {
            ops.delete.sample_start();
            ops.delete.sample_end(if i < misses { 1 } else { 0 });
        }
        ops
    }

    #[test]
    fn test_check_index() {
        let writes = ops_with(10, 2, 3, 1);
        let mut stats = IndexStats {
            name: "t".to_string(),
            live: 6,
            write_locks: Some(13),
            ..IndexStats::default()
        };
        assert!(check_index(&stats, &writes).is_ok());

        stats.live = 7;
        assert!(matches!(
            check_index(&stats, &writes),
            Err(IxperfError::ValidationError(_))
        ));

        stats.live = 6;
        stats.write_locks = Some(12);
        assert!(check_index(&stats, &writes).is_err());

        stats.write_locks = None;
        assert!(check_index(&stats, &writes).is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_backend() {
        let p = Profile::from_toml_str(
            r#"
[ixperf]
index = "rdms"
key_type = "i64"
value_type = "i64"

[generator]
seed = 1
loads = 10

[rdms]
index = "robt"

[rdms-robt]
z_blocksize = 4096
"#,
        )
        .unwrap();
        let err = run(&p).await.unwrap_err();
        assert!(matches!(err, IxperfError::Unsupported(_)));
        assert!(err.to_string().contains("robt"));
    }
}
