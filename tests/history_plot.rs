use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use ixperf::bench;
use ixperf::config::{HistoryFilter, Profile, ResultHistory};
use ixperf::plot::{self, PlotOptions};
use ixperf::IxperfError;
use tempfile::TempDir;

const LLRB_PROFILE: &str = r#"
[ixperf]
index = "rdms"
key_type = "i64"
value_type = "i64"

[generator]
seed = 11
loads = 1500
sets = 300
deletes = 100
gets = 300
iters = true

[rdms]
index = "llrb"
initial = 1
readers = 1
writers = 1
"#;

async fn saved_runs(history: &ResultHistory, n: usize) {
    let mut profile = Profile::from_toml_str(LLRB_PROFILE).unwrap();
    profile.path = PathBuf::from("profiles/rdms-llrb.toml");
    for _ in 0..n {
        let result = bench::run(&profile).await.unwrap();
        history.append(&result).unwrap();
    }
}

#[tokio::test]
async fn test_saved_runs_chart_per_phase_and_trend() {
    let dir = TempDir::new().unwrap();
    let history = ResultHistory::at(dir.path().join("results.jsonl"));
    saved_runs(&history, 2).await;

    let mut runs = history
        .query(&HistoryFilter::default(), 10, false)
        .unwrap();
    runs.reverse();
    assert_eq!(runs.len(), 2);
    assert!(!runs[1].phases[0].timeline.is_empty());

    let opts = PlotOptions {
        out_dir: dir.path().join("plot"),
        percentile: 98,
    };
    let files = plot::render(&runs, &opts).unwrap();
    for name in [
        "initial-load-throughput.svg",
        "initial-load-latency.svg",
        "iterate-latency.svg",
        "incremental-throughput.svg",
        "trend-incremental-latency.svg",
    ] {
        let path = opts.out_dir.join(name);
        assert!(files.contains(&path), "{} not rendered", name);
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }

    let deltas = runs[1].compare(&runs[0]);
    assert!(deltas.iter().any(|d| d.phase == "incremental" && d.op == "get"));
}

#[tokio::test]
async fn test_damaged_history_needs_ignore_error() {
    let dir = TempDir::new().unwrap();
    let history = ResultHistory::at(dir.path().join("results.jsonl"));
    saved_runs(&history, 1).await;
    let mut fd = OpenOptions::new().append(true).open(history.path()).unwrap();
    writeln!(fd, "not a run").unwrap();
    drop(fd);

    let filter = HistoryFilter {
        profile: Some(PathBuf::from("rdms-llrb.toml")),
        index: Some("rdms/llrb".to_string()),
    };
    let err = history.query(&filter, 10, false).unwrap_err();
    assert!(matches!(err, IxperfError::PersistenceError(_)));
    assert!(ixperf::error::user_friendly_message(&err).contains("--ignore-error"));

    let runs = history.query(&filter, 10, true).unwrap();
    assert_eq!(runs.len(), 1);
    let opts = PlotOptions {
        out_dir: dir.path().join("plot"),
        percentile: 99,
    };
    let files = plot::render(&runs, &opts).unwrap();
    assert!(!files.is_empty());
    let trends = files
        .iter()
        .filter_map(|f| f.file_name())
        .filter(|name| name.to_string_lossy().starts_with("trend-"))
        .count();
    assert_eq!(trends, 0);
}
