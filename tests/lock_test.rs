use blobmux::{
    BlobmuxError, LockConfig, LockManager, LockRecord, MemoryStore, ObjectStore, WriteMode,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const KEY: &str = "jobs/nightly/lock";

fn quick_config() -> LockConfig {
    LockConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_poll_jitter(Duration::from_millis(10))
}

fn manager(store: &Arc<MemoryStore>, config: LockConfig) -> LockManager {
    LockManager::new(store.clone(), config)
}

#[test]
fn test_acquire_and_release() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    let handle = locks.acquire(KEY).unwrap();
    assert_eq!(handle.key(), KEY);
    assert!(store.exists(KEY).unwrap());

    let record = LockRecord::decode(KEY, &store.read(KEY).unwrap()).unwrap();
    assert_eq!(record.holder_id, handle.holder_id());
    assert_eq!(record.ttl(), locks.config().ttl);

    locks.release(handle).unwrap();
    assert!(!store.exists(KEY).unwrap());
}

#[test]
fn test_reacquire_after_release() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    for _ in 0..3 {
        let handle = locks.acquire(KEY).unwrap();
        locks.release(handle).unwrap();
    }
    assert!(!store.exists(KEY).unwrap());
}

#[test]
fn test_timeout_while_held() {
    let store = Arc::new(MemoryStore::new());
    let holder = manager(&store, quick_config().with_ttl(Duration::from_secs(5)));
    let _held = holder.acquire(KEY).unwrap();

    let waiter = manager(
        &store,
        LockConfig::default()
            .with_ttl(Duration::from_secs(5))
            .with_acquire_timeout(Duration::from_secs(1))
            .with_poll_interval(Duration::from_millis(100)),
    );

    let start = Instant::now();
    let result = waiter.acquire(KEY);
    let elapsed = start.elapsed();

    match result {
        Err(BlobmuxError::LockAcquire { key, waited }) => {
            assert_eq!(key, KEY);
            assert!(waited >= Duration::from_secs(1));
        }
        other => panic!("expected LockAcquire, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "waited {:?}", elapsed);
}

#[test]
fn test_takeover_after_ttl_expiry() {
    let store = Arc::new(MemoryStore::new());
    let ttl = Duration::from_millis(500);
    let crashed = manager(&store, quick_config().with_ttl(ttl));
    let acquired = Instant::now();
    let abandoned = crashed.acquire(KEY).unwrap();

    let successor = manager(
        &store,
        quick_config().with_acquire_timeout(Duration::from_secs(5)),
    );

    // Before the ttl runs out the record is still live
    let impatient = quick_config().with_acquire_timeout(Duration::from_millis(50));
    let early = successor.acquire_with(KEY, &impatient);
    assert!(acquired.elapsed() < ttl, "early attempt ran past the ttl");
    assert!(
        matches!(early, Err(BlobmuxError::LockAcquire { .. })),
        "{:?}",
        early
    );

    let handle = successor.acquire(KEY).unwrap();
    assert!(acquired.elapsed() >= ttl);

    let record = LockRecord::decode(KEY, &store.read(KEY).unwrap()).unwrap();
    assert_eq!(record.holder_id, handle.holder_id());
    assert_ne!(handle.holder_id(), abandoned.holder_id());

    successor.release(handle).unwrap();
}

#[test]
fn test_release_after_takeover_fails() {
    let store = Arc::new(MemoryStore::new());
    let slow = manager(&store, quick_config().with_ttl(Duration::from_millis(50)));
    let stale = slow.acquire(KEY).unwrap();

    thread::sleep(Duration::from_millis(100));
    let other = manager(&store, quick_config());
    let current = other.acquire(KEY).unwrap();

    let err = slow.release(stale).unwrap_err();
    assert!(matches!(err, BlobmuxError::LockRelease { .. }), "{:?}", err);
    assert_eq!(err.exit_code(), 2);

    // The new holder's record is untouched
    let record = LockRecord::decode(KEY, &store.read(KEY).unwrap()).unwrap();
    assert_eq!(record.holder_id, current.holder_id());
    other.release(current).unwrap();
}

#[test]
fn test_release_of_missing_record_fails() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());
    let handle = locks.acquire(KEY).unwrap();

    store.delete(KEY).unwrap();

    let err = locks.release(handle).unwrap_err();
    assert!(matches!(err, BlobmuxError::LockRelease { .. }));
}

#[test]
fn test_release_of_expired_own_lock_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config().with_ttl(Duration::from_millis(10)));
    let handle = locks.acquire(KEY).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(handle.is_expired());

    locks.release(handle).unwrap();
    assert!(!store.exists(KEY).unwrap());
}

#[test]
fn test_unreadable_record_ages_out() {
    let store = Arc::new(MemoryStore::new());
    store
        .write(KEY, b"{not a lock record", WriteMode::CreateNew)
        .unwrap();

    let locks = manager(
        &store,
        quick_config()
            .with_ttl(Duration::from_millis(150))
            .with_acquire_timeout(Duration::from_secs(5)),
    );
    let start = Instant::now();
    let handle = locks.acquire(KEY).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));

    locks.release(handle).unwrap();
}

#[test]
fn test_guard_releases_on_drop() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    {
        let guard = locks.lock(KEY).unwrap();
        assert_eq!(guard.handle().key(), KEY);
        assert!(store.exists(KEY).unwrap());
    }
    assert!(!store.exists(KEY).unwrap());
}

#[test]
fn test_with_lock_returns_body_error_and_releases() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    let result: blobmux::Result<()> = locks.with_lock(KEY, |handle| {
        assert_eq!(handle.key(), KEY);
        Err(BlobmuxError::Other("body failed".to_string()))
    });

    match result {
        Err(BlobmuxError::Other(message)) => assert_eq!(message, "body failed"),
        other => panic!("expected body error, got {:?}", other),
    }
    assert!(!store.exists(KEY).unwrap());
}

#[test]
fn test_with_lock_prefers_body_error_over_release_error() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    let result: blobmux::Result<()> = locks.with_lock(KEY, |_| {
        // Lose the lock while holding it
        store.delete(KEY)?;
        Err(BlobmuxError::Other("body failed".to_string()))
    });

    assert!(matches!(result, Err(BlobmuxError::Other(_))));
}

#[test]
fn test_with_lock_surfaces_release_error_after_success() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    let result = locks.with_lock(KEY, |_| {
        store.delete(KEY)?;
        Ok(42)
    });

    assert!(matches!(result, Err(BlobmuxError::LockRelease { .. })));
}

#[test]
fn test_invalid_key_rejected() {
    let store = Arc::new(MemoryStore::new());
    let locks = manager(&store, quick_config());

    assert!(matches!(
        locks.acquire("../escape/lock"),
        Err(BlobmuxError::InvalidKey { .. })
    ));
    assert!(matches!(locks.acquire(""), Err(BlobmuxError::InvalidKey { .. })));
}
