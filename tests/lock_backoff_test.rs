use blobmux::{BlobmuxError, LockConfig, LockManager, MemoryStore, ObjectStore, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(attempts)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
        .with_jitter(Duration::ZERO)
}

#[test]
fn test_acquire_survives_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::new(
        store.clone(),
        LockConfig::default().with_retry(fast_retry(5)),
    );

    store.fail_next(3);
    let handle = locks.acquire("a/lock").unwrap();
    assert!(store.exists("a/lock").unwrap());
    locks.release(handle).unwrap();
}

#[test]
fn test_acquire_gives_up_after_max_attempts() {
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::new(
        store.clone(),
        LockConfig::default().with_retry(fast_retry(2)),
    );

    store.fail_next(2);
    let err = locks.acquire("a/lock").unwrap_err();
    assert!(err.is_transient(), "{:?}", err);
    assert_eq!(store.operation_count(), 2);
}

#[test]
fn test_release_retries_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::new(
        store.clone(),
        LockConfig::default().with_release_retry(fast_retry(5)),
    );

    let handle = locks.acquire("a/lock").unwrap();
    store.fail_next(2);
    locks.release(handle).unwrap();
    assert!(!store.exists("a/lock").unwrap());
}

#[test]
fn test_permanent_errors_are_not_retried() {
    let policy = fast_retry(5);
    let mut attempts = 0;
    let result: blobmux::Result<()> = policy.run("read", "missing", || {
        attempts += 1;
        Err(BlobmuxError::NotFound("missing".to_string()))
    });
    assert!(matches!(result, Err(BlobmuxError::NotFound(_))));
    assert_eq!(attempts, 1);
}

#[test]
fn test_backoff_is_capped() {
    let policy = RetryPolicy::default()
        .with_base_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(300));
    assert_eq!(policy.backoff(0), Duration::from_millis(50));
    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(300));
    assert_eq!(policy.backoff(40), Duration::from_millis(300));
}
