//! Batch driver
//!
//! Runs the benchmark binary once per profile in a directory, in lexical
//! order, and stops at the first run that exits non-zero.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use tracing::{error, info};

use crate::{IxperfError, Result};

/// Runs one profile and reports its exit code.
pub trait Launcher {
    fn launch(&mut self, profile: &Path) -> Result<i32>;
}

/// Launches `<bin> -v --profile <file>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    bin: PathBuf,
}

impl ProcessLauncher {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    /// Launcher for the running executable.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, profile: &Path) -> Result<i32> {
        let status = Command::new(&self.bin)
            .arg("-v")
            .arg("--profile")
            .arg(profile)
            .status()
            .map_err(|e| {
                IxperfError::BenchmarkError(format!(
                    "failed to launch {}: {}",
                    self.bin.display(),
                    e
                ))
            })?;
        Ok(exit_code(status))
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Regular, non-hidden files of `dir` in lexical order.
pub fn list_profiles(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IxperfError::BenchmarkError(format!(
            "profiles directory {} does not exist",
            dir.display()
        )));
    }
    let mut profiles = vec![];
    for item in fs::read_dir(dir)? {
        let item = item?;
        let hidden = item.file_name().to_string_lossy().starts_with('.');
        if !hidden && item.file_type()?.is_file() {
            profiles.push(item.path());
        }
    }
    profiles.sort();
    Ok(profiles)
}

/// Run every profile under `dir`, returning the profiles that ran.
///
/// Stops at the first non-zero exit with [`IxperfError::BatchError`]
/// carrying the profile and its code.
pub fn run_batch<L: Launcher>(dir: &Path, launcher: &mut L) -> Result<Vec<PathBuf>> {
    let profiles = list_profiles(dir)?;
    info!(
        target: "driver",
        "{} profiles under {}", profiles.len(), dir.display()
    );

    let mut done = Vec::with_capacity(profiles.len());
    for profile in profiles.into_iter() {
        info!(target: "driver", "running {}", profile.display());
        let code = launcher.launch(&profile)?;
        if code != 0 {
            error!(
                target: "driver",
                "{} exited with code {}", profile.display(), code
            );
            return Err(IxperfError::BatchError { profile, code });
        }
        done.push(profile);
    }
    Ok(done)
}
