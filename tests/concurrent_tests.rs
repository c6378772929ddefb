mod common;

use anyhow::Result;
use chrono::Utc;
use common::TestEnv;
use modsync::engine::{ChangeEvent, ChangeQueue, SyncWorker};
use modsync::storage::MetadataStore;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_upserts_no_data_loss() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(MetadataStore::open(&dir.path().join("meta.bin"))?);
    let barrier = Arc::new(Barrier::new(8));
    let mut handles = vec![];

    for thread_id in 0..8 {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            // Synchronize start to maximize contention
            barrier.wait();
            for i in 0..50u64 {
                let path = PathBuf::from(format!("/data/t{thread_id}/f{i}"));
                store.upsert(&path, Utc::now(), i)?;
                if i % 10 == 0 {
                    store.remove(&path)?;
                }
            }
            Ok(())
        }));
    }

    for handle in handles {
        handle.join().expect("thread panicked")?;
    }

    // 5 of every 50 paths were removed again
    assert_eq!(store.len(), 8 * 45);

    let reopened = MetadataStore::open(&dir.path().join("meta.bin"))?;
    assert_eq!(reopened.len(), 8 * 45);
    Ok(())
}

#[test]
fn test_stale_scan_alongside_writers() -> Result<()> {
    let store = Arc::new(MetadataStore::in_memory());
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let writers: Vec<_> = (0..4)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for i in 0..500u64 {
                    let path = PathBuf::from(format!("/missing/t{thread_id}/f{}", i % 20));
                    store.upsert(&path, Utc::now(), i)?;
                    if i % 3 == 0 {
                        store.remove(&path)?;
                    }
                }
                Ok(())
            })
        })
        .collect();

    let scanner = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..200 {
                // None of the paths exist, so every tracked record is stale
                let stale = store.stale_paths();
                assert!(stale.windows(2).all(|pair| pair[0] < pair[1]));
            }
            let _ = done_tx.send(());
        })
    };

    assert!(
        done_rx.recv_timeout(Duration::from_secs(30)).is_ok(),
        "stale scan stalled against concurrent writers"
    );
    scanner.join().expect("scanner panicked");
    for writer in writers {
        writer.join().expect("writer panicked")?;
    }
    assert_eq!(store.stale_paths().len(), store.len());
    Ok(())
}

#[test]
fn test_worker_and_full_sync_run_together() -> Result<()> {
    let env = TestEnv::new(&[])?;
    for i in 0..50 {
        env.write(&format!("bulk/f{i}.txt"), format!("bulk {i}").as_bytes())?;
    }

    let reconciler = Arc::new(env.persistent_reconciler()?);
    let (tx, rx) = ChangeQueue::unbounded();
    let worker = SyncWorker::spawn(Arc::clone(&reconciler), rx)?;

    let full = {
        let reconciler = Arc::clone(&reconciler);
        thread::spawn(move || reconciler.full_sync_with(&AtomicBool::new(false)))
    };

    let mut live = Vec::new();
    for i in 0..20 {
        let path = env.write(&format!("live/e{i}.txt"), format!("event {i}").as_bytes())?;
        tx.enqueue(ChangeEvent::Created(path.clone()));
        live.push(path);
    }
    drop(tx);

    let report = full.join().expect("full sync panicked");
    worker.finish();

    assert_eq!(report.failed, 0);
    for i in 0..50 {
        assert_eq!(
            fs::read(env.remote_proj().join(format!("bulk/f{i}.txt")))?,
            format!("bulk {i}").as_bytes()
        );
    }
    for path in &live {
        assert!(reconciler.store().get(path).is_some());
    }
    assert!(reconciler.store().len() >= 70);
    Ok(())
}

#[test]
fn test_stop_drops_queued_events_within_grace() -> Result<()> {
    let env = TestEnv::new(&[])?;
    let reconciler = Arc::new(env.reconciler());
    let (tx, rx) = ChangeQueue::unbounded();

    for i in 0..200 {
        let path = env.write(&format!("q/f{i}.txt"), b"x")?;
        tx.enqueue(ChangeEvent::Created(path));
    }

    let worker = SyncWorker::spawn(Arc::clone(&reconciler), rx)?;
    let stats = worker.stats();
    assert!(worker.stop(Duration::from_secs(10)));
    assert!(stats.processed() <= 200);

    // Senders outlive the worker without blocking
    assert!(!tx.enqueue(ChangeEvent::Created(env.proj().join("late.txt"))));
    Ok(())
}
