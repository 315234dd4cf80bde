//! Profile management module
//!
//! Loads and validates the TOML profiles that describe one benchmark run:
//! the index under test, its key/value types, the workload shape and the
//! backend tuning sections.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bench::generator::GenOptions;
use crate::{IxperfError, Result};

pub mod backend;
pub mod persistence;

pub use backend::{
    DgmOpt, LlrbOpt, RdmsIndex, RdmsOpt, RobtOpt, ShllrbOpt, ShrobtOpt, WalOpt,
};
pub use persistence::{HistoryFilter, ResultHistory};

/// Index kind selected by `[ixperf] index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// Baseline ordered map
    BtreeMap,
    /// One of the `[rdms]` backends
    Rdms,
}

/// Key and value types a profile can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    I32,
    I64,
    U64,
    /// 20 byte fixed array
    Array,
    /// Variable length byte vector
    Bytes,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
            DataType::Array => "array",
            DataType::Bytes => "bytes",
        };
        write!(f, "{}", s)
    }
}

/// Key/value type pairs the runner is instantiated for.
pub const SUPPORTED_TYPES: &[(DataType, DataType)] = &[
    (DataType::I32, DataType::I32),
    (DataType::I32, DataType::I64),
    (DataType::I32, DataType::Array),
    (DataType::I32, DataType::Bytes),
    (DataType::I64, DataType::I64),
    (DataType::I64, DataType::Array),
    (DataType::I64, DataType::Bytes),
    (DataType::U64, DataType::U64),
    (DataType::U64, DataType::Bytes),
    (DataType::Array, DataType::Array),
    (DataType::Array, DataType::Bytes),
    (DataType::Bytes, DataType::Bytes),
];

/// `[ixperf]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IxperfOpt {
    pub index: IndexKind,
    pub key_type: DataType,
    pub value_type: DataType,
}

/// One benchmark profile, read once at process start.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub ixperf: IxperfOpt,
    #[serde(default)]
    pub generator: GenOptions,
    #[serde(default)]
    pub rdms: Option<RdmsOpt>,
    #[serde(default, rename = "rdms-llrb")]
    pub rdms_llrb: Option<LlrbOpt>,
    #[serde(default, rename = "rdms-mvcc")]
    pub rdms_mvcc: Option<LlrbOpt>,
    #[serde(default, rename = "rdms-robt")]
    pub rdms_robt: Option<RobtOpt>,
    #[serde(default, rename = "rdms-shllrb")]
    pub rdms_shllrb: Option<ShllrbOpt>,
    #[serde(default, rename = "rdms-shrobt")]
    pub rdms_shrobt: Option<ShrobtOpt>,
    #[serde(default, rename = "rdms-dgm")]
    pub rdms_dgm: Option<DgmOpt>,
    #[serde(default, rename = "rdms-wal", alias = "wal")]
    pub rdms_wal: Option<WalOpt>,

    /// File the profile was loaded from, empty for in-memory profiles.
    #[serde(skip)]
    pub path: PathBuf,
    /// Log periodic stats while running.
    #[serde(skip)]
    pub verbose: bool,
}

impl Profile {
    /// Load and validate a profile file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => IxperfError::from(e),
            _ => IxperfError::ProfileError(format!(
                "Failed to read profile {}: {}",
                path.display(),
                e
            )),
        })?;
        let mut profile = Self::from_toml_str(&text).map_err(|e| match e {
            IxperfError::ProfileError(msg) => {
                IxperfError::ProfileError(format!("{}: {}", path.display(), msg))
            }
            e => e,
        })?;
        profile.path = path.to_path_buf();
        Ok(profile)
    }

    /// Parse and validate a profile from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut profile: Profile = toml::from_str(text)?;
        if let Some(rdms) = &profile.rdms {
            profile.generator.initial = rdms.initial;
        }
        profile.validate()?;
        Ok(profile)
    }

    /// Validate the profile parameters
    pub fn validate(&self) -> Result<()> {
        let (kt, vt) = (self.ixperf.key_type, self.ixperf.value_type);
        if !SUPPORTED_TYPES.contains(&(kt, vt)) {
            return Err(IxperfError::ProfileError(format!(
                "unsupported key/value types {}/{}",
                kt, vt
            )));
        }

        if self.generator.channel_size == 0 {
            return Err(IxperfError::ProfileError(
                "[generator] channel_size must be greater than 0".to_string(),
            ));
        }

        if matches!(kt, DataType::Bytes) && self.generator.key_size == 0 {
            return Err(IxperfError::ProfileError(
                "[generator] key_size must be greater than 0 for bytes keys".to_string(),
            ));
        }

        match self.ixperf.index {
            IndexKind::BtreeMap => Ok(()),
            IndexKind::Rdms => self.validate_rdms(),
        }
    }

    fn validate_rdms(&self) -> Result<()> {
        let rdms = self.rdms.as_ref().ok_or_else(|| {
            IxperfError::ProfileError("index = \"rdms\" needs an [rdms] section".to_string())
        })?;

        if let Some(opt) = &self.rdms_shllrb {
            if opt.max_shards < 1 {
                return Err(IxperfError::ProfileError(
                    "[rdms-shllrb] max_shards must be at least 1".to_string(),
                ));
            }
        }
        if let Some(opt) = &self.rdms_robt {
            opt.validate("rdms-robt")?;
        }
        if let Some(opt) = &self.rdms_shrobt {
            if opt.num_shards < 1 {
                return Err(IxperfError::ProfileError(
                    "[rdms-shrobt] num_shards must be at least 1".to_string(),
                ));
            }
            opt.to_robt().validate("rdms-shrobt")?;
        }
        if let Some(opt) = &self.rdms_dgm {
            for (key, ratio) in [("mem_ratio", opt.mem_ratio), ("disk_ratio", opt.disk_ratio)] {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(IxperfError::ProfileError(format!(
                        "[rdms-dgm] {} must be between 0.0 and 1.0, got {}",
                        key, ratio
                    )));
                }
            }
        }

        if rdms.index == RdmsIndex::Wal {
            let wal = self.rdms_wal.as_ref().ok_or_else(|| {
                IxperfError::ProfileError(
                    "[rdms] index = \"wal\" needs a [rdms-wal] section".to_string(),
                )
            })?;
            wal.validate()?;
        } else if let Some(wal) = &self.rdms_wal {
            wal.validate()?;
        }
        Ok(())
    }

    /// Settle the generator seed against the one given on the command line.
    ///
    /// The larger of the two wins and zero draws a random seed. Returns the
    /// seed the run will use.
    pub fn resolve_seed(&mut self, cli_seed: u64) -> u64 {
        let seed = std::cmp::max(self.generator.seed, cli_seed);
        self.generator.seed = match seed {
            0 => rand::random::<u64>() | 1,
            n => n,
        };
        self.generator.seed
    }

    /// Index name used for logs and journal files.
    pub fn name(&self) -> &str {
        match &self.rdms {
            Some(rdms) if self.ixperf.index == IndexKind::Rdms => rdms.name.as_str(),
            _ => crate::APP_NAME,
        }
    }

    /// Short label of the index under test, `btree-map` or `rdms/<backend>`.
    pub fn index_label(&self) -> String {
        match (self.ixperf.index, &self.rdms) {
            (IndexKind::Rdms, Some(rdms)) => format!("rdms/{}", rdms.index.as_str()),
            (IndexKind::Rdms, None) => "rdms".to_string(),
            (IndexKind::BtreeMap, _) => "btree-map".to_string(),
        }
    }

    pub fn llrb_opt(&self) -> LlrbOpt {
        self.rdms_llrb.clone().unwrap_or_default()
    }

    pub fn mvcc_opt(&self) -> LlrbOpt {
        self.rdms_mvcc.clone().unwrap_or_default()
    }

    pub fn shllrb_opt(&self) -> ShllrbOpt {
        self.rdms_shllrb.clone().unwrap_or_default()
    }

    /// Summary stored with saved results.
    pub fn summary(&self) -> ProfileSummary {
        let rdms = self.rdms.as_ref();
        ProfileSummary {
            path: self.path.clone(),
            index: self.index_label(),
            key_type: self.ixperf.key_type,
            value_type: self.ixperf.value_type,
            loads: self.generator.loads,
            sets: self.generator.sets,
            deletes: self.generator.deletes,
            gets: self.generator.gets,
            ranges: self.generator.ranges,
            reverses: self.generator.reverses,
            initial: rdms.map(|r| r.initial).unwrap_or(0),
            readers: rdms.map(|r| r.readers).unwrap_or(0),
            writers: rdms.map(|r| r.writers).unwrap_or(0),
        }
    }
}

/// What was run, as recorded in the result history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub path: PathBuf,
    pub index: String,
    pub key_type: DataType,
    pub value_type: DataType,
    pub loads: usize,
    pub sets: usize,
    pub deletes: usize,
    pub gets: usize,
    pub ranges: usize,
    pub reverses: usize,
    pub initial: usize,
    pub readers: usize,
    pub writers: usize,
}
