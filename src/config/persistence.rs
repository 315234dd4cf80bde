//! Run history
//!
//! Every saved [`RunResult`] is one JSON line appended to
//! `$DATA_HOME/ixperf/results.jsonl`. Appends never rewrite earlier runs;
//! once the file holds more than [`MAX_RESULTS_HISTORY`] runs it is
//! compacted down to the newest ones.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::models::result::RunResult;
use crate::{IxperfError, Result, APP_NAME, MAX_RESULTS_HISTORY, RESULTS_FILE};

/// Selects saved runs by profile file and index label.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Matches runs whose profile path ends with this path
    pub profile: Option<PathBuf>,
    /// Matches runs of this index label, e.g. `rdms/llrb`
    pub index: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, result: &RunResult) -> bool {
        let profile = match &self.profile {
            Some(p) => result.profile.path.ends_with(p),
            None => true,
        };
        let index = match &self.index {
            Some(ix) => &result.profile.index == ix,
            None => true,
        };
        profile && index
    }
}

/// Append-only store of saved runs.
#[derive(Debug)]
pub struct ResultHistory {
    path: PathBuf,
}

impl ResultHistory {
    /// History under the user data directory.
    pub fn open_default() -> Result<ResultHistory> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            IxperfError::PersistenceError("no data directory for this user".to_string())
        })?;
        Ok(ResultHistory::at(data_dir.join(APP_NAME).join(RESULTS_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> ResultHistory {
        ResultHistory { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence_err(&self, what: &str, err: impl std::fmt::Display) -> IxperfError {
        IxperfError::PersistenceError(format!("{} {}: {}", what, self.path.display(), err))
    }

    /// Append one run, compacting the file when it outgrows the history
    /// limit.
    pub fn append(&self, result: &RunResult) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.persistence_err("creating", e))?;
        }
        let line = serde_json::to_string(result)?;
        let mut fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.persistence_err("opening", e))?;
        writeln!(fd, "{}", line).map_err(|e| self.persistence_err("appending to", e))?;
        drop(fd);

        let lines = self.raw_lines()?;
        if lines.len() > MAX_RESULTS_HISTORY {
            self.rewrite(&lines[lines.len() - MAX_RESULTS_HISTORY..])?;
        }
        Ok(())
    }

    fn raw_lines(&self) -> Result<Vec<String>> {
        let fd = match File::open(&self.path) {
            Ok(fd) => fd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.persistence_err("opening", e)),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(fd).lines() {
            let line = line.map_err(|e| self.persistence_err("reading", e))?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn rewrite(&self, lines: &[String]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&tmp, content).map_err(|e| self.persistence_err("compacting", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.persistence_err("compacting", e))?;
        debug!(
            target: "ixperf",
            "{}: compacted to {} runs", self.path.display(), lines.len()
        );
        Ok(())
    }

    /// Every saved run, oldest first. A line that does not parse fails the
    /// load, unless `ignore_errors` is set, in which case it is skipped with
    /// a warning.
    pub fn load(&self, ignore_errors: bool) -> Result<Vec<RunResult>> {
        let mut results = Vec::new();
        for (n, line) in self.raw_lines()?.iter().enumerate() {
            match serde_json::from_str::<RunResult>(line) {
                Ok(result) => results.push(result),
                Err(e) if ignore_errors => {
                    warn!(target: "ixperf", "{}:{}: skipped, {}", self.path.display(), n + 1, e);
                }
                Err(e) => {
                    return Err(IxperfError::PersistenceError(format!(
                        "{}:{}: {}",
                        self.path.display(),
                        n + 1,
                        e
                    )))
                }
            }
        }
        Ok(results)
    }

    /// Up to `limit` runs matching `filter`, newest first.
    pub fn query(
        &self,
        filter: &HistoryFilter,
        limit: usize,
        ignore_errors: bool,
    ) -> Result<Vec<RunResult>> {
        let mut results = self.load(ignore_errors)?;
        results.retain(|r| filter.matches(r));
        results.reverse();
        results.truncate(limit);
        Ok(results)
    }

    /// Newest saved run of the same workload as `result`.
    pub fn baseline(&self, result: &RunResult) -> Result<Option<RunResult>> {
        let results = self.load(true)?;
        Ok(results.into_iter().rev().find(|r| r.same_workload(result)))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.raw_lines()?.len())
    }

    /// Remove the history file, returning the number of runs it held.
    pub fn clear(&self) -> Result<usize> {
        let count = self.count()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.persistence_err("removing", e)),
        }
    }
}
