//! Integration tests for lock release, including a holder killed mid-flight.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tempfile::TempDir;

use device_arbiter::{DeviceIdentity, LockError, LockStore, RetryPolicy};

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

#[test]
fn test_round_trip_between_processes() {
    let tmp = TempDir::new().unwrap();
    let identity = DeviceIdentity::new(0, 0, "NVIDIA CUDA", "GeForce GTX 1070");

    let first = LockStore::new(tmp.path(), "rt_", fast_policy());
    let second = LockStore::new(tmp.path(), "rt_", fast_policy());
    let path = first.path_for(&identity);
    assert_eq!(path, second.path_for(&identity));

    let mut token = first.try_lock(&path).unwrap();
    assert!(second.try_lock(&path).unwrap_err().is_busy());

    first.unlock(&mut token);
    let token = second.try_lock(&path).unwrap();
    assert!(token.is_held());
}

#[test]
fn test_lock_file_survives_release() {
    let tmp = TempDir::new().unwrap();
    let store = LockStore::new(tmp.path(), "rt_", fast_policy());
    let path = store.path_for(&DeviceIdentity::new(1, 3, "AMD", "Tahiti"));

    drop(store.try_lock(&path).unwrap());
    assert!(path.exists());
    assert!(store.try_lock(&path).is_ok());
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = serde_json::json!({
        "lock": {
            "dir": dir,
            "prefix": "crash_",
            "max_attempts": 3,
            "backoff_min_ms": 1,
            "backoff_max_ms": 5
        },
        "context": { "max_attempts": 2, "backoff_min_ms": 1, "backoff_max_ms": 5 },
        "inventory": {
            "platforms": [{
                "name": "Test Platform",
                "vendor": "NVIDIA Corporation",
                "devices": [{ "name": "Test GPU", "class": "gpu", "compute_units": 4 }]
            }]
        }
    });
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn test_killed_holder_does_not_leave_device_locked() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_device-arbiter"))
        .arg("--config")
        .arg(&config)
        .arg("acquire")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert_eq!(line.trim(), "acquired nvidia 0 Test GPU");

    let store = LockStore::new(tmp.path(), "crash_", RetryPolicy::single());
    let path = store.path_for(&DeviceIdentity::new(0, 0, "Test Platform", "Test GPU"));
    match store.try_lock(&path) {
        Err(LockError::Busy { .. }) => {}
        other => panic!("expected the child to hold the lock, got {other:?}"),
    }

    // SIGKILL: no destructor or cleanup code runs in the child.
    child.kill().unwrap();
    child.wait().unwrap();

    let token = store.try_lock(&path).unwrap();
    assert!(token.is_held());
}

#[cfg(unix)]
#[test]
fn test_run_holds_device_for_child_and_forwards_exit_code() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let status = Command::new(env!("CARGO_BIN_EXE_device-arbiter"))
        .arg("--config")
        .arg(&config)
        .args(["run", "--", "sh", "-c"])
        .arg(r#"test "$DEVICE_ARBITER_PLATFORM" = nvidia && test "$DEVICE_ARBITER_DEVICE_NAME" = "Test GPU" && exit 3"#)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));

    let store = LockStore::new(tmp.path(), "crash_", RetryPolicy::single());
    let path = store.path_for(&DeviceIdentity::new(0, 0, "Test Platform", "Test GPU"));
    assert!(store.try_lock(&path).is_ok());
}
