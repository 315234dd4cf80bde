//! Backend sections of a profile: `[rdms]` and every `[rdms-<variant>]`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{IxperfError, Result};

/// Backend selected by `[rdms] index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RdmsIndex {
    Llrb,
    Mvcc,
    Robt,
    Shllrb,
    Shrobt,
    Dgm,
    Wal,
}

impl RdmsIndex {
    pub fn as_str(&self) -> &'static str {
        match self {
            RdmsIndex::Llrb => "llrb",
            RdmsIndex::Mvcc => "mvcc",
            RdmsIndex::Robt => "robt",
            RdmsIndex::Shllrb => "shllrb",
            RdmsIndex::Shrobt => "shrobt",
            RdmsIndex::Dgm => "dgm",
            RdmsIndex::Wal => "wal",
        }
    }
}

/// `[rdms]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RdmsOpt {
    #[serde(default = "default_name")]
    pub name: String,
    pub index: RdmsIndex,
    /// Number of initial-load threads.
    #[serde(default)]
    pub initial: usize,
    #[serde(default)]
    pub readers: usize,
    #[serde(default)]
    pub writers: usize,
}

fn default_name() -> String {
    crate::APP_NAME.to_string()
}

impl RdmsOpt {
    pub fn initial_threads(&self) -> usize {
        std::cmp::max(self.initial, 1)
    }
}

/// `[rdms-llrb]`, also used for `[rdms-mvcc]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlrbOpt {
    #[serde(default)]
    pub lsm: bool,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub spin: bool,
}

/// `[rdms-shllrb]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShllrbOpt {
    #[serde(default)]
    pub lsm: bool,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub spin: bool,
    #[serde(default, deserialize_with = "de_interval", serialize_with = "ser_interval")]
    pub interval: Duration,
    #[serde(default = "default_max_shards")]
    pub max_shards: usize,
    #[serde(default)]
    pub max_entries: usize,
}

fn default_max_shards() -> usize {
    1
}

impl Default for ShllrbOpt {
    fn default() -> Self {
        Self {
            lsm: false,
            sticky: false,
            spin: false,
            interval: Duration::default(),
            max_shards: default_max_shards(),
            max_entries: 0,
        }
    }
}

impl ShllrbOpt {
    /// Options applied to every shard.
    pub fn to_llrb(&self) -> LlrbOpt {
        LlrbOpt {
            lsm: self.lsm,
            sticky: self.sticky,
            spin: self.spin,
        }
    }
}

/// `[rdms-robt]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobtOpt {
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub z_blocksize: usize,
    #[serde(default)]
    pub m_blocksize: usize,
    #[serde(default)]
    pub v_blocksize: usize,
    #[serde(default)]
    pub delta_ok: bool,
    #[serde(default, deserialize_with = "de_vlog_file")]
    pub vlog_file: Option<PathBuf>,
    #[serde(default)]
    pub value_in_vlog: bool,
    #[serde(default)]
    pub flush_queue_size: usize,
    #[serde(default)]
    pub mmap: bool,
    #[serde(default)]
    pub bitmap: String,
}

impl RobtOpt {
    pub fn validate(&self, section: &str) -> Result<()> {
        let blocks = [
            ("z_blocksize", self.z_blocksize),
            ("m_blocksize", self.m_blocksize),
            ("v_blocksize", self.v_blocksize),
        ];
        for (key, size) in blocks.iter() {
            if *size != 0 && !size.is_power_of_two() {
                return Err(IxperfError::ProfileError(format!(
                    "[{}] {} must be a power of 2, got {}",
                    section, key, size
                )));
            }
        }
        Ok(())
    }
}

/// `[rdms-shrobt]`, robt keys plus `num_shards`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShrobtOpt {
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub z_blocksize: usize,
    #[serde(default)]
    pub m_blocksize: usize,
    #[serde(default)]
    pub v_blocksize: usize,
    #[serde(default)]
    pub delta_ok: bool,
    #[serde(default, deserialize_with = "de_vlog_file")]
    pub vlog_file: Option<PathBuf>,
    #[serde(default)]
    pub value_in_vlog: bool,
    #[serde(default)]
    pub flush_queue_size: usize,
    #[serde(default)]
    pub mmap: bool,
    #[serde(default)]
    pub bitmap: String,
}

fn default_num_shards() -> usize {
    1
}

impl Default for ShrobtOpt {
    fn default() -> Self {
        let robt = RobtOpt::default();
        Self {
            num_shards: default_num_shards(),
            dir: robt.dir,
            z_blocksize: robt.z_blocksize,
            m_blocksize: robt.m_blocksize,
            v_blocksize: robt.v_blocksize,
            delta_ok: robt.delta_ok,
            vlog_file: robt.vlog_file,
            value_in_vlog: robt.value_in_vlog,
            flush_queue_size: robt.flush_queue_size,
            mmap: robt.mmap,
            bitmap: robt.bitmap,
        }
    }
}

impl ShrobtOpt {
    /// Options shared by every shard.
    pub fn to_robt(&self) -> RobtOpt {
        RobtOpt {
            dir: self.dir.clone(),
            z_blocksize: self.z_blocksize,
            m_blocksize: self.m_blocksize,
            v_blocksize: self.v_blocksize,
            delta_ok: self.delta_ok,
            vlog_file: self.vlog_file.clone(),
            value_in_vlog: self.value_in_vlog,
            flush_queue_size: self.flush_queue_size,
            mmap: self.mmap,
            bitmap: self.bitmap.clone(),
        }
    }
}

/// `[rdms-dgm]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DgmOpt {
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default = "default_mem_index")]
    pub mem_index: String,
    #[serde(default = "default_disk_index")]
    pub disk_index: String,
    #[serde(default)]
    pub lsm: bool,
    #[serde(default)]
    pub m0_limit: Option<usize>,
    #[serde(default)]
    pub mem_ratio: f64,
    #[serde(default)]
    pub disk_ratio: f64,
    #[serde(
        default,
        deserialize_with = "de_opt_interval",
        serialize_with = "ser_opt_interval"
    )]
    pub commit_interval: Option<Duration>,
    #[serde(
        default,
        deserialize_with = "de_opt_interval",
        serialize_with = "ser_opt_interval"
    )]
    pub compact_interval: Option<Duration>,
}

fn default_mem_index() -> String {
    "llrb".to_string()
}

fn default_disk_index() -> String {
    "robt".to_string()
}

impl Default for DgmOpt {
    fn default() -> Self {
        Self {
            dir: PathBuf::default(),
            mem_index: default_mem_index(),
            disk_index: default_disk_index(),
            lsm: false,
            m0_limit: None,
            mem_ratio: 0.0,
            disk_ratio: 0.0,
            commit_interval: None,
            compact_interval: None,
        }
    }
}

/// `[rdms-wal]`, or `[wal]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalOpt {
    pub dir: PathBuf,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_wal_writers")]
    pub writers: usize,
    #[serde(default = "default_wal_nshards")]
    pub nshards: usize,
    #[serde(default = "default_journal_limit")]
    pub journal_limit: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub nosync: bool,
    #[serde(default = "default_build_hasher")]
    pub build_hasher: String,
}

fn default_wal_writers() -> usize {
    1
}

fn default_wal_nshards() -> usize {
    1
}

fn default_journal_limit() -> usize {
    1024 * 1024 * 1024
}

fn default_batch_size() -> usize {
    1
}

fn default_build_hasher() -> String {
    "random_state".to_string()
}

/// Hashers a wal can route keys with.
pub const BUILD_HASHERS: &[&str] = &["random_state"];

impl WalOpt {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            name: default_name(),
            writers: default_wal_writers(),
            nshards: default_wal_nshards(),
            journal_limit: default_journal_limit(),
            batch_size: default_batch_size(),
            nosync: false,
            build_hasher: default_build_hasher(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nshards == 0 {
            return Err(IxperfError::ProfileError(
                "[rdms-wal] nshards must be greater than 0".to_string(),
            ));
        }
        if self.journal_limit == 0 {
            return Err(IxperfError::ProfileError(
                "[rdms-wal] journal_limit must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IxperfError::ProfileError(
                "[rdms-wal] batch_size must be greater than 0".to_string(),
            ));
        }
        if self.writers == 0 {
            return Err(IxperfError::ProfileError(
                "[rdms-wal] writers must be greater than 0".to_string(),
            ));
        }
        if !BUILD_HASHERS.contains(&self.build_hasher.as_str()) {
            return Err(IxperfError::ProfileError(format!(
                "[rdms-wal] unknown build_hasher {:?} (expected one of {:?})",
                self.build_hasher, BUILD_HASHERS
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Secs(u64),
    Text(String),
}

impl RawInterval {
    fn into_duration<E: serde::de::Error>(self) -> std::result::Result<Duration, E> {
        match self {
            RawInterval::Secs(secs) => Ok(Duration::from_secs(secs)),
            RawInterval::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| E::custom(format!("invalid interval {:?}: {}", text, e))),
        }
    }
}

/// Interval given as whole seconds (`30`) or a human duration (`"30s"`).
pub fn de_interval<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawInterval::deserialize(deserializer)?.into_duration()
}

fn de_opt_interval<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    de_interval(deserializer).map(Some)
}

fn ser_interval<S>(interval: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(interval.as_secs())
}

fn ser_opt_interval<S>(
    interval: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match interval {
        Some(interval) => serializer.serialize_some(&interval.as_secs()),
        None => serializer.serialize_none(),
    }
}

// An empty `vlog_file` means no value log.
fn de_vlog_file<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    Ok(if text.is_empty() {
        None
    } else {
        Some(PathBuf::from(text))
    })
}
