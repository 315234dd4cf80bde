use ixperf::bench;
use ixperf::config::Profile;
use ixperf::models::RunResult;
use tempfile::TempDir;

const WORKLOAD: &str = r#"
[generator]
seed = 42
channel_size = 64
loads = 2000
sets = 500
deletes = 200
gets = 500
ranges = 10
reverses = 10
iters = true
"#;

fn profile(ixperf: &str, rest: &str) -> Profile {
    Profile::from_toml_str(&format!("{}\n{}\n{}", ixperf, WORKLOAD, rest)).unwrap()
}

fn phase_names(result: &RunResult) -> Vec<&str> {
    result.phases.iter().map(|p| p.name.as_str()).collect()
}

#[tokio::test]
async fn test_btree_map_profile() {
    let p = profile(
        "[ixperf]\nindex = \"btree-map\"\nkey_type = \"i32\"\nvalue_type = \"i64\"",
        "",
    );
    let result = bench::run(&p).await.unwrap();

    assert_eq!(phase_names(&result), vec!["initial-load", "iterate", "incremental"]);
    assert_eq!(result.seed, 42);
    let stats = result.index.as_ref().unwrap();
    assert_eq!(stats.tombstones, 0);
    assert_eq!(stats.write_locks, None);
    assert!(stats.live > 0);

    let load = result.phases[0].op("load").unwrap();
    assert_eq!(load.ops, 2000);

    let iter = result.phases[1].op("iter").unwrap();
    assert_eq!(iter.ops, 1);
    assert_eq!(iter.items, load.ops - load.items);
    assert!(iter.latency.max > std::time::Duration::ZERO);
    assert_eq!(iter.latency.min, iter.latency.max);
}

#[tokio::test]
async fn test_llrb_concurrent_profile() {
    let p = profile(
        "[ixperf]\nindex = \"rdms\"\nkey_type = \"i64\"\nvalue_type = \"array\"",
        r#"
[rdms]
index = "llrb"
initial = 2
readers = 2
writers = 2

[rdms-llrb]
spin = true
"#,
    );
    let result = bench::run(&p).await.unwrap();

    assert_eq!(result.phases[0].threads, 2);
    assert_eq!(result.phases[0].op("load").unwrap().ops, 4000);
    let incremental = &result.phases[2];
    assert_eq!(incremental.threads, 4);
    assert_eq!(incremental.op("set").unwrap().ops, 1000);
    assert_eq!(incremental.op("get").unwrap().ops, 1000);
    assert_eq!(result.index.as_ref().unwrap().tombstones, 0);
}

#[tokio::test]
async fn test_llrb_lsm_bytes_profile() {
    let p = Profile::from_toml_str(
        r#"
[ixperf]
index = "rdms"
key_type = "bytes"
value_type = "bytes"

[generator]
seed = 7
key_size = 8
value_size = 16
loads = 1000
sets = 400
deletes = 300
gets = 200

[rdms]
index = "llrb"
initial = 1

[rdms-llrb]
lsm = true
"#,
    )
    .unwrap();
    let result = bench::run(&p).await.unwrap();

    let stats = result.index.as_ref().unwrap();
    assert!(stats.versions >= stats.entries as u64);
    assert_eq!(stats.entries, stats.live + stats.tombstones);
    assert!(stats.value_footprint > 0);
}

#[tokio::test]
async fn test_mvcc_profile() {
    let p = profile(
        "[ixperf]\nindex = \"rdms\"\nkey_type = \"i64\"\nvalue_type = \"i64\"",
        r#"
[rdms]
name = "ixperf-mvcc"
index = "mvcc"
initial = 1
readers = 1
writers = 1

[rdms-mvcc]
lsm = true
"#,
    );
    let result = bench::run(&p).await.unwrap();

    assert_eq!(result.profile.index, "rdms/mvcc");
    let stats = result.index.as_ref().unwrap();
    assert_eq!(stats.name, "ixperf-mvcc");
    assert_eq!(stats.entries, stats.live + stats.tombstones);
    assert!(stats.versions >= stats.entries as u64);

    let incremental = result.phases.last().unwrap();
    let range = incremental.op("range").unwrap();
    assert_eq!(range.ops, 10);
    assert!(range.latency.max > std::time::Duration::ZERO);
}

#[tokio::test]
async fn test_shllrb_profile() {
    let p = profile(
        "[ixperf]\nindex = \"rdms\"\nkey_type = \"u64\"\nvalue_type = \"u64\"",
        r#"
[rdms]
index = "shllrb"
initial = 2
readers = 1
writers = 1

[rdms-shllrb]
max_shards = 4
interval = "5s"
"#,
    );
    let result = bench::run(&p).await.unwrap();
    assert_eq!(result.index.as_ref().unwrap().shards, 4);
}

#[tokio::test]
async fn test_wal_profile_replays_every_write() {
    let dir = TempDir::new().unwrap();
    let p = profile(
        "[ixperf]\nindex = \"rdms\"\nkey_type = \"i64\"\nvalue_type = \"bytes\"",
        &format!(
            r#"
[rdms]
index = "wal"

[wal]
dir = {:?}
name = "journal-test"
writers = 3
nshards = 2
journal_limit = 4096
batch_size = 8
nosync = true
"#,
            dir.path().display().to_string()
        ),
    );
    let result = bench::run(&p).await.unwrap();

    assert_eq!(phase_names(&result), vec!["journal"]);
    let stats = result.index.as_ref().unwrap();
    assert_eq!(stats.entries, 3 * (500 + 200));
    assert_eq!(stats.shards, 2);
    assert!(std::fs::read_dir(dir.path()).unwrap().count() > 2);
}
