use blobmux::{LocalStore, LockConfig, MemoryStore, Multiplexer, MuxConfig, MuxOptions, ObjectStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn config() -> MuxConfig {
    MuxConfig::default().with_lock(
        LockConfig::default()
            .with_acquire_timeout(Duration::from_secs(120))
            .with_poll_interval(Duration::from_millis(2))
            .with_poll_jitter(Duration::from_millis(3)),
    )
}

/// Every element is delivered to exactly one of the workers.
fn drain_with_workers(store: Arc<dyn ObjectStore>, elements: u32, workers: usize) {
    let mux = Multiplexer::new(
        store.clone(),
        0..elements,
        "jobs/parallel",
        &MuxOptions::default().with_config(config()),
    )
    .unwrap();
    let session = mux.session_id().to_string();

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let store = store.clone();
            let session = session.clone();
            thread::spawn(move || {
                let session = session.parse().unwrap();
                let mux = Multiplexer::from_session(store, &session, config()).unwrap();
                mux.consumer::<u32>(&session)
                    .with_worker_id(format!("worker-{}", worker))
                    .collect::<blobmux::Result<Vec<_>>>()
                    .unwrap()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut delivered = 0;
    for handle in handles {
        for element in handle.join().unwrap() {
            assert!(seen.insert(element), "element {} delivered twice", element);
            delivered += 1;
        }
    }

    assert_eq!(delivered, elements as usize);
    assert_eq!(seen, (0..elements).collect::<HashSet<_>>());
    assert!(mux.done(&mux.session_id()).unwrap());
}

#[test]
fn test_parallel_drain_memory_store() {
    drain_with_workers(Arc::new(MemoryStore::new()), 200, 8);
}

#[test]
fn test_parallel_drain_local_store() {
    let temp = TempDir::new().unwrap();
    drain_with_workers(Arc::new(LocalStore::new(temp.path())), 60, 4);
}

#[test]
fn test_more_workers_than_elements() {
    drain_with_workers(Arc::new(MemoryStore::new()), 3, 8);
}
