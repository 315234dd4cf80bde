use std::fs;
use std::path::PathBuf;

use ixperf::config::Profile;
use ixperf::error;
use ixperf::IxperfError;
use tempfile::TempDir;

const ROBT_PROFILE: &str = r#"
[ixperf]
index = "rdms"
key_type = "i64"
value_type = "i64"

[generator]
seed = 3
loads = 100

[rdms]
index = "robt"
"#;

#[test]
fn test_missing_profile_names_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");
    let err = Profile::from_file(&path).unwrap_err();
    assert!(matches!(err, IxperfError::ProfileError(_)));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_bad_profile_message() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    fs::write(
        &path,
        "[ixperf]\nindex = \"btree-map\"\nkey_type = \"i64\"\nvalue_type = \"i64\"\nbogus = 1\n",
    )
    .unwrap();

    let err = Profile::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("bad.toml"));
    let msg = error::user_friendly_message(&err);
    assert!(msg.starts_with("Invalid profile"));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_unsupported_backend_message() {
    let profile = Profile::from_toml_str(ROBT_PROFILE).unwrap();
    let err = ixperf::bench::run(&profile).await.unwrap_err();
    assert!(matches!(err, IxperfError::Unsupported(_)));
    assert!(error::user_friendly_message(&err).contains("Pick a different index"));
}

#[test]
fn test_batch_error_keeps_child_code() {
    let err = IxperfError::BatchError {
        profile: PathBuf::from("profiles/rdms-wal.toml"),
        code: 137,
    };
    assert_eq!(err.exit_code(), 137);
    assert!(error::user_friendly_message(&err).contains("rdms-wal.toml"));
}
