//! Sharded write-ahead journal, the `rdms/wal` backend.
//!
//! Each shard appends records to `<name>-shard-<n>-journal-<seq>.wal` under
//! the journal directory. Records are buffered `batch_size` at a time, then
//! flushed and, unless `nosync` is set, synced to disk. A journal file is
//! closed and the next one opened once it grows past `journal_limit` bytes.
//!
//! Record layout: `op:u8 | klen:u32le | key | vlen:u32le | value`.

use std::collections::hash_map::RandomState;
use std::fs::{self, File, OpenOptions};
use std::hash::{BuildHasher, Hash, Hasher};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bench::generator::{RandomKV, RandomKey};
use crate::config::WalOpt;
use crate::{IxperfError, Result};

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

struct Journal {
    dir: PathBuf,
    name: String,
    shard: usize,
    seq: usize,
    file: Option<BufWriter<File>>,
    size: usize,
    pending: usize,
    records: u64,
    batch_size: usize,
    journal_limit: usize,
    nosync: bool,
}

impl Journal {
    fn file_path(&self) -> PathBuf {
        self.dir.join(journal_file_name(&self.name, self.shard, self.seq))
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        if self.file.is_none() {
            let path = self.file_path();
            debug!(target: "ixperf", "{}: opening journal {}", self.name, path.display());
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.file = Some(BufWriter::new(file));
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(record)?;
        }
        self.size += record.len();
        self.pending += 1;
        self.records += 1;

        if self.pending >= self.batch_size {
            self.flush()?;
        }
        if self.size >= self.journal_limit {
            self.rotate()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            if !self.nosync {
                file.get_ref().sync_data()?;
            }
        }
        self.pending = 0;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.file = None;
        self.seq += 1;
        self.size = 0;
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

fn journal_file_name(name: &str, shard: usize, seq: usize) -> String {
    format!("{}-shard-{}-journal-{}.wal", name, shard, seq)
}

fn is_journal_file(name: &str, file_name: &str) -> bool {
    file_name.starts_with(&format!("{}-shard-", name)) && file_name.ends_with(".wal")
}

/// Write-ahead journal sharded by key hash.
pub struct Wal<K, V> {
    name: String,
    dir: PathBuf,
    shards: Arc<Vec<Mutex<Journal>>>,
    hasher: RandomState,
    seqno: Arc<AtomicU64>,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for Wal<K, V> {
    fn clone(&self) -> Self {
        Wal {
            name: self.name.clone(),
            dir: self.dir.clone(),
            shards: Arc::clone(&self.shards),
            hasher: self.hasher.clone(),
            seqno: Arc::clone(&self.seqno),
            _kv: PhantomData,
        }
    }
}

impl<K, V> Wal<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    /// Create a fresh journal under `opt.dir`, purging journal files an
    /// earlier run left under the same name.
    pub fn create(opt: &WalOpt) -> Result<Wal<K, V>> {
        opt.validate()?;
        fs::create_dir_all(&opt.dir)?;
        let mut purged = 0;
        for item in fs::read_dir(&opt.dir)? {
            let item = item?;
            let file_name = item.file_name();
            if is_journal_file(&opt.name, &file_name.to_string_lossy()) {
                fs::remove_file(item.path())?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(target: "ixperf", "{}: purged {} old journal files", opt.name, purged);
        }

        let shards = (0..opt.nshards)
            .map(|shard| {
                Mutex::new(Journal {
                    dir: opt.dir.clone(),
                    name: opt.name.clone(),
                    shard,
                    seq: 1,
                    file: None,
                    size: 0,
                    pending: 0,
                    records: 0,
                    batch_size: opt.batch_size,
                    journal_limit: opt.journal_limit,
                    nosync: opt.nosync,
                })
            })
            .collect();

        Ok(Wal {
            name: opt.name.clone(),
            dir: opt.dir.clone(),
            shards: Arc::new(shards),
            hasher: RandomState::new(),
            seqno: Arc::new(AtomicU64::new(0)),
            _kv: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn to_writer(&self) -> WalWriter<K, V> {
        WalWriter {
            wal: self.clone(),
            buf: Vec::default(),
        }
    }

    /// Flush and sync every shard, returning the number of records written.
    pub fn close(&self) -> Result<u64> {
        let mut records = 0;
        for shard in self.shards.iter() {
            let mut journal = shard.lock();
            journal.flush()?;
            journal.file = None;
            records += journal.records;
        }
        Ok(records)
    }

    fn shard_of(&self, key: &K) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() % (self.shards.len() as u64)) as usize
    }
}

/// Handle that journals mutations, one per writer thread.
pub struct WalWriter<K, V> {
    wal: Wal<K, V>,
    buf: Vec<u8>,
}

impl<K, V> WalWriter<K, V>
where
    K: RandomKey,
    V: RandomKV,
{
    /// Journal a set, returning its sequence number.
    pub fn set(&mut self, key: K, value: V) -> Result<u64> {
        self.append(OP_SET, &key, Some(&value))
    }

    /// Journal a delete, returning its sequence number.
    pub fn delete(&mut self, key: &K) -> Result<u64> {
        self.append(OP_DELETE, key, None)
    }

    fn append(&mut self, op: u8, key: &K, value: Option<&V>) -> Result<u64> {
        self.buf.clear();
        self.buf.push(op);
        put_item(&mut self.buf, |buf| key.encode(buf))?;
        put_item(&mut self.buf, |buf| {
            if let Some(value) = value {
                value.encode(buf)
            }
        })?;

        let shard = self.wal.shard_of(key);
        let seqno = {
            let mut journal = self.wal.shards[shard].lock();
            journal.append(&self.buf)?;
            self.wal.seqno.fetch_add(1, Ordering::SeqCst) + 1
        };
        Ok(seqno)
    }
}

// length prefixed item, the length patched in once the item is encoded.
fn put_item<F>(buf: &mut Vec<u8>, encode: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>),
{
    let at = buf.len();
    buf.extend_from_slice(&[0_u8; 4]);
    encode(buf);
    let n = buf.len() - at - 4;
    let n = u32::try_from(n)
        .map_err(|_| IxperfError::IndexError(format!("journal item too large: {} bytes", n)))?;
    buf[at..at + 4].copy_from_slice(&n.to_le_bytes());
    Ok(())
}

/// What [`replay`] found on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayStats {
    pub files: usize,
    pub sets: u64,
    pub deletes: u64,
}

impl ReplayStats {
    pub fn records(&self) -> u64 {
        self.sets + self.deletes
    }
}

/// Read back every journal file of `name` under `dir`, counting records.
pub fn replay(dir: &Path, name: &str) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut paths = vec![];
    for item in fs::read_dir(dir)? {
        let item = item?;
        if is_journal_file(name, &item.file_name().to_string_lossy()) {
            paths.push(item.path());
        }
    }
    paths.sort();

    for path in paths.iter() {
        let data = fs::read(path)?;
        let mut off = 0;
        while off < data.len() {
            let op = data[off];
            off += 1;
            off = skip_item(&data, off, path)?;
            off = skip_item(&data, off, path)?;
            match op {
                OP_SET => stats.sets += 1,
                OP_DELETE => stats.deletes += 1,
                op => {
                    return Err(IxperfError::IndexError(format!(
                        "{}: invalid journal op {}",
                        path.display(),
                        op
                    )))
                }
            }
        }
        stats.files += 1;
    }
    debug!(target: "ixperf", "{}: replayed {:?}", name, stats);
    Ok(stats)
}

fn skip_item(data: &[u8], off: usize, path: &Path) -> Result<usize> {
    let truncated = || IxperfError::IndexError(format!("{}: truncated record", path.display()));
    let len_bytes: [u8; 4] = data
        .get(off..off + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(truncated)?;
    let end = off + 4 + u32::from_le_bytes(len_bytes) as usize;
    if end > data.len() {
        return Err(truncated());
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn wal_opt(dir: &Path) -> WalOpt {
        WalOpt {
            nshards: 2,
            batch_size: 4,
            nosync: true,
            ..WalOpt::new(dir.to_path_buf())
        }
    }

    #[test]
    fn test_write_close_replay() {
        let temp_dir = TempDir::new().unwrap();
        let wal: Wal<i64, Vec<u8>> = Wal::create(&wal_opt(temp_dir.path())).unwrap();
        let mut w = wal.to_writer();
        for k in 0..100 {
            w.set(k, vec![0xAB; 10]).unwrap();
        }
        for k in 0..10 {
            w.delete(&k).unwrap();
        }
        assert_eq!(wal.close().unwrap(), 110);

        let stats = replay(temp_dir.path(), "ixperf").unwrap();
        assert_eq!(stats.sets, 100);
        assert_eq!(stats.deletes, 10);
        assert_eq!(stats.records(), 110);
        assert_eq!(stats.files, 2);
    }

    #[test]
    fn test_journal_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let opt = WalOpt {
            nshards: 1,
            journal_limit: 100,
            ..wal_opt(temp_dir.path())
        };
        let wal: Wal<u64, u64> = Wal::create(&opt).unwrap();
        let mut w = wal.to_writer();
        // 1 + 4 + 8 + 4 + 8 bytes per record
        for k in 0..20 {
            w.set(k, k).unwrap();
        }
        wal.close().unwrap();

        let first = temp_dir.path().join("ixperf-shard-0-journal-1.wal");
        assert_eq!(fs::metadata(&first).unwrap().len(), 100);
        let stats = replay(temp_dir.path(), "ixperf").unwrap();
        assert_eq!(stats.files, 5);
        assert_eq!(stats.records(), 20);
    }

    #[test]
    fn test_create_purges_old_journals() {
        let temp_dir = TempDir::new().unwrap();
        let other = temp_dir.path().join("notes.txt");
        fs::write(&other, "keep").unwrap();
        {
            let wal: Wal<i32, i32> = Wal::create(&wal_opt(temp_dir.path())).unwrap();
            wal.to_writer().set(1, 1).unwrap();
            wal.close().unwrap();
        }
        let wal: Wal<i32, i32> = Wal::create(&wal_opt(temp_dir.path())).unwrap();
        wal.close().unwrap();
        assert_eq!(replay(temp_dir.path(), "ixperf").unwrap().records(), 0);
        assert!(other.exists());
    }

    #[test]
    fn test_concurrent_writers() {
        let temp_dir = TempDir::new().unwrap();
        let opt = WalOpt {
            nshards: 3,
            ..wal_opt(temp_dir.path())
        };
        let wal: Wal<i64, i64> = Wal::create(&opt).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mut w = wal.to_writer();
                thread::spawn(move || {
                    for k in 0..250 {
                        w.set(t * 1000 + k, k).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wal.close().unwrap(), 1000);
        assert_eq!(replay(temp_dir.path(), "ixperf").unwrap().sets, 1000);
    }

    #[test]
    fn test_truncated_journal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(journal_file_name("ixperf", 0, 1));
        fs::write(&path, [OP_SET, 8, 0, 0, 0, 1, 2]).unwrap();
        assert!(matches!(
            replay(temp_dir.path(), "ixperf"),
            Err(IxperfError::IndexError(_))
        ));
    }
}
