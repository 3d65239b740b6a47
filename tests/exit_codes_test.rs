use assert_cmd::Command;
use blobmux::{LocalStore, LockConfig, LockManager, Multiplexer, MuxOptions};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn blobmux(root: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_blobmux"));
    cmd.arg("--root").arg(root.path());
    cmd
}

#[test]
fn test_exit_code_0_on_success() {
    let root = TempDir::new().unwrap();
    blobmux(&root)
        .args(["new", "jobs/ok"])
        .write_stdin("a\n")
        .assert()
        .code(0);
}

#[test]
fn test_exit_code_1_on_general_error() {
    let root = TempDir::new().unwrap();
    blobmux(&root)
        .args(["session", "jobs/missing"])
        .assert()
        .code(1);
}

#[test]
fn test_exit_code_1_on_invalid_location() {
    let root = TempDir::new().unwrap();
    blobmux(&root)
        .args(["new", "../outside"])
        .write_stdin("a\n")
        .assert()
        .code(1);
}

#[test]
fn test_exit_code_2_on_lock_timeout() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(root.path()));
    let mux = Multiplexer::new(store.clone(), ["a"], "jobs/busy", &MuxOptions::default()).unwrap();

    // Another worker holds the session lock for a long time
    let locks = LockManager::new(
        store,
        LockConfig::default().with_ttl(Duration::from_secs(600)),
    );
    let _held = locks.lock("jobs/busy/lock").unwrap();

    blobmux(&root)
        .args(["--acquire-timeout", "1s", "drain"])
        .arg(mux.session_id().to_string())
        .assert()
        .code(2);
}
