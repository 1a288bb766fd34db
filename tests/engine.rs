//! End-to-end engine behavior: round trips, snapshot isolation, atomic
//! visibility, size limits, savepoints, range scans under concurrent
//! copy-on-write churn, and page reuse gating.

use std::sync::Arc;

use tempfile::tempdir;
use vellum::{Database, DatabaseConfig, Error, Range};

#[test]
fn test_create_commit_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basic.vlm");

    {
        let db = Database::create(&path).unwrap();
        let mut txn = db.begin_write().unwrap();
        txn.put(b"k1", b"v1").unwrap();
        txn.put(b"k2", b"v2").unwrap();
        txn.commit().unwrap();
    }

    let db = Database::open(&path).unwrap();
    let txn = db.begin_read().unwrap();
    assert_eq!(txn.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(txn.get(b"k2").unwrap(), Some(b"v2".to_vec()));

    // Creation commits txn 1; the user commit is txn 2.
    assert_eq!(db.stats().unwrap().txn_id, 2);
}

#[test]
fn test_round_trip_ten_thousand_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bulk.vlm");

    {
        let db = Database::create(&path).unwrap();
        let mut txn = db.begin_write().unwrap();
        for i in 0..10_000u32 {
            txn.put(format!("k{i:05}").as_bytes(), b"x").unwrap();
        }
        txn.commit().unwrap();
    }

    let db = Database::open(&path).unwrap();

    let reader = db.begin_read().unwrap();
    assert_eq!(reader.get(b"k05000").unwrap(), Some(b"x".to_vec()));

    // Delete one key under the live reader.
    let mut writer = db.begin_write().unwrap();
    assert!(writer.delete(b"k05000").unwrap());
    writer.commit().unwrap();

    // The old snapshot still has it; a fresh one does not.
    assert_eq!(reader.get(b"k05000").unwrap(), Some(b"x".to_vec()));
    let fresh = db.begin_read().unwrap();
    assert_eq!(fresh.get(b"k05000").unwrap(), None);
}

#[test]
fn test_value_too_large_leaves_database_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("toolarge.vlm");
    let db = Database::create(&path).unwrap();

    let mut txn = db.begin_write().unwrap();
    txn.put(b"before", b"ok").unwrap();
    txn.commit().unwrap();
    let txn_before = db.stats().unwrap().txn_id;

    let mut txn = db.begin_write().unwrap();
    let err = txn.put(b"big", &vec![0u8; 5000]).unwrap_err();
    assert!(matches!(err, Error::ValueTooLarge { .. }));
    txn.abort();

    assert_eq!(db.stats().unwrap().txn_id, txn_before);
    assert_eq!(db.begin_read().unwrap().get(b"big").unwrap(), None);
    assert_eq!(db.begin_read().unwrap().get(b"before").unwrap(), Some(b"ok".to_vec()));
}

#[test]
fn test_nested_rollback_keeps_outer_write() {
    let db = Database::open_in_memory().unwrap();

    let mut txn = db.begin_write().unwrap();
    txn.put(b"a", b"1").unwrap();
    txn.savepoint().unwrap();
    txn.put(b"a", b"2").unwrap();
    txn.rollback_savepoint().unwrap();
    txn.commit().unwrap();

    assert_eq!(db.begin_read().unwrap().get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_nested_savepoints_stack() {
    let db = Database::open_in_memory().unwrap();

    let mut txn = db.begin_write().unwrap();
    txn.put(b"x", b"outer").unwrap();
    txn.savepoint().unwrap();
    txn.put(b"x", b"mid").unwrap();
    txn.savepoint().unwrap();
    txn.put(b"x", b"inner").unwrap();
    txn.release_savepoint().unwrap(); // keep "inner"
    txn.rollback_savepoint().unwrap(); // back to "outer"
    txn.commit().unwrap();

    assert_eq!(db.begin_read().unwrap().get(b"x").unwrap(), Some(b"outer".to_vec()));
}

#[test]
fn test_range_monotonic_and_bounded() {
    let db = Database::open_in_memory().unwrap();

    let mut txn = db.begin_write().unwrap();
    // Insert shuffled so the on-disk order is earned, not inherited.
    for i in (0..2000u32).rev().step_by(3) {
        txn.put(format!("k{i:05}").as_bytes(), format!("{i}").as_bytes()).unwrap();
    }
    for i in (0..2000u32).filter(|i| i % 3 != 0) {
        txn.put(format!("k{i:05}").as_bytes(), format!("{i}").as_bytes()).unwrap();
    }
    txn.commit().unwrap();

    let reader = db.begin_read().unwrap();
    let entries: Vec<_> = reader
        .range(Range::new(b"k00100", b"k01900"))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(entries.len(), 1800);
    assert_eq!(entries[0].0, b"k00100".to_vec());
    assert!(entries.last().unwrap().0 < b"k01900".to_vec());
    for window in entries.windows(2) {
        assert!(window[0].0 < window[1].0, "range keys must be strictly ascending");
    }
}

/// Cursor-stack scan against a fixed snapshot while a writer rewrites a
/// band of keys: the scan must return the original values in order.
#[test]
fn test_range_scan_stable_under_cow_rewrites() {
    let db = Database::open_in_memory().unwrap();

    let mut txn = db.begin_write().unwrap();
    for i in 1..=1000u32 {
        txn.put(format!("k{i:04}").as_bytes(), format!("orig{i}").as_bytes()).unwrap();
    }
    txn.commit().unwrap();

    let reader = db.begin_read().unwrap();

    // Rewrite keys 500..600 behind the reader's back.
    let mut writer = db.begin_write().unwrap();
    for i in 500..600u32 {
        writer.put(format!("k{i:04}").as_bytes(), format!("new{i}").as_bytes()).unwrap();
    }
    writer.commit().unwrap();

    // Start the scan after the commit, and interleave further commits
    // while it runs; the snapshot must not care.
    let mut scan = reader.range(Range::all()).unwrap();
    let mut seen = 0u32;
    while let Some(entry) = scan.next_entry().unwrap() {
        seen += 1;
        let (key, value) = entry;
        assert_eq!(key, format!("k{seen:04}").into_bytes());
        assert_eq!(value, format!("orig{seen}").into_bytes());

        if seen % 250 == 0 {
            let mut churn = db.begin_write().unwrap();
            for i in 0..50u32 {
                churn.put(format!("churn{i}").as_bytes(), &[seen as u8; 100]).unwrap();
            }
            churn.commit().unwrap();
        }
    }
    assert_eq!(seen, 1000);
}

#[test]
fn test_commits_are_atomic_across_keys() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    const KEYS: u32 = 100;
    const ROUNDS: u32 = 30;

    std::thread::scope(|scope| {
        let writer_db = Arc::clone(&db);
        scope.spawn(move || {
            for round in 0..ROUNDS {
                let mut txn = writer_db.begin_write().unwrap();
                for i in 0..KEYS {
                    txn.put(
                        format!("batch{i:03}").as_bytes(),
                        format!("round{round}").as_bytes(),
                    )
                    .unwrap();
                }
                txn.commit().unwrap();
            }
        });

        for _ in 0..4 {
            let reader_db = Arc::clone(&db);
            scope.spawn(move || {
                for _ in 0..50 {
                    let txn = reader_db.begin_read().unwrap();
                    let mut values = std::collections::HashSet::new();
                    let mut present = 0u32;
                    for i in 0..KEYS {
                        if let Some(v) = txn.get(format!("batch{i:03}").as_bytes()).unwrap() {
                            present += 1;
                            values.insert(v);
                        }
                    }
                    // Either the batch is entirely absent (pre-first-commit
                    // snapshot) or entirely present from a single round.
                    assert!(
                        present == 0 || (present == KEYS && values.len() == 1),
                        "partial commit visible: {present} keys, {} distinct rounds",
                        values.len()
                    );
                }
            });
        }
    });
}

#[test]
fn test_long_lived_reader_grows_file_then_space_recycles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("growth.vlm");
    let db = Database::create(&path).unwrap();

    let mut txn = db.begin_write().unwrap();
    for i in 0..5000u32 {
        txn.put(format!("k{i:05}").as_bytes(), &[9u8; 16]).unwrap();
    }
    txn.commit().unwrap();

    let reader = db.begin_read().unwrap();
    let pages_before = db.stats().unwrap().total_pages;

    // Delete every other key across several commits under the reader.
    for chunk in 0..5u32 {
        let mut txn = db.begin_write().unwrap();
        for i in (chunk * 1000..(chunk + 1) * 1000).step_by(2) {
            txn.delete(format!("k{i:05}").as_bytes()).unwrap();
        }
        txn.commit().unwrap();
    }

    let pages_during = db.stats().unwrap().total_pages;
    assert!(pages_during > pages_before, "pinned snapshot must grow the file");

    // The reader's snapshot is still complete.
    assert_eq!(reader.get(b"k00000").unwrap(), Some(vec![9u8; 16]));
    assert_eq!(reader.get(b"k04999").unwrap(), Some(vec![9u8; 16]));
    drop(reader);

    // One further commit, then the released pages report as reusable and
    // later commits stop growing the file.
    let mut txn = db.begin_write().unwrap();
    txn.put(b"tick", b"x").unwrap();
    txn.commit().unwrap();
    assert!(db.stats().unwrap().reusable_pages > 0);

    let stable = db.stats().unwrap().total_pages;
    for round in 0..5u32 {
        let mut txn = db.begin_write().unwrap();
        for i in 0..200u32 {
            txn.put(format!("r{i:03}").as_bytes(), &[round as u8; 16]).unwrap();
        }
        txn.commit().unwrap();
    }
    assert_eq!(
        db.stats().unwrap().total_pages,
        stable,
        "recycled pages should satisfy steady-state commits"
    );
}

#[test]
fn test_read_only_open_blocks_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.vlm");

    {
        let db = Database::create(&path).unwrap();
        let mut txn = db.begin_write().unwrap();
        txn.put(b"k", b"v").unwrap();
        txn.commit().unwrap();
    }

    let config = DatabaseConfig { read_only: true, ..Default::default() };
    let db = Database::open_with_config(&path, config).unwrap();
    assert_eq!(db.begin_read().unwrap().get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(matches!(db.begin_write(), Err(Error::ReadOnly)));
}

#[test]
fn test_custom_page_size_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.vlm");

    {
        let config = DatabaseConfig { page_size: 512, ..Default::default() };
        let db = Database::create_with_config(&path, config).unwrap();
        let mut txn = db.begin_write().unwrap();
        for i in 0..500u32 {
            txn.put(format!("k{i:03}").as_bytes(), &[7u8; 20]).unwrap();
        }
        txn.commit().unwrap();
    }

    // Reopen with default config: the file dictates its page size.
    let db = Database::open(&path).unwrap();
    assert_eq!(db.stats().unwrap().page_size, 512);
    assert_eq!(db.begin_read().unwrap().get(b"k123").unwrap(), Some(vec![7u8; 20]));
    assert!(db.check_integrity().unwrap().is_clean());
}

#[test]
fn test_values_may_be_empty() {
    let db = Database::open_in_memory().unwrap();
    let mut txn = db.begin_write().unwrap();
    txn.put(b"empty", b"").unwrap();
    txn.commit().unwrap();

    assert_eq!(db.begin_read().unwrap().get(b"empty").unwrap(), Some(Vec::new()));
}

#[test]
fn test_overwrites_and_deletes_round_trip() {
    let db = Database::open_in_memory().unwrap();

    let mut txn = db.begin_write().unwrap();
    txn.put(b"k", b"v1").unwrap();
    txn.commit().unwrap();

    let mut txn = db.begin_write().unwrap();
    txn.put(b"k", b"v2").unwrap();
    txn.commit().unwrap();

    assert_eq!(db.begin_read().unwrap().get(b"k").unwrap(), Some(b"v2".to_vec()));

    let mut txn = db.begin_write().unwrap();
    assert!(txn.delete(b"k").unwrap());
    assert!(!txn.delete(b"k").unwrap());
    txn.commit().unwrap();

    assert_eq!(db.begin_read().unwrap().get(b"k").unwrap(), None);
}

#[test]
fn test_integrity_clean_after_heavy_churn() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("churn.vlm");
    let db = Database::create(&path).unwrap();

    for round in 0..10u32 {
        let mut txn = db.begin_write().unwrap();
        for i in 0..300u32 {
            let key = format!("k{:04}", (i * 7 + round * 13) % 1000);
            if (i + round) % 4 == 0 {
                txn.delete(key.as_bytes()).unwrap();
            } else {
                txn.put(key.as_bytes(), &vec![round as u8; (i % 200) as usize]).unwrap();
            }
        }
        txn.commit().unwrap();
    }

    let report = db.check_integrity().unwrap();
    assert!(report.is_clean(), "violations: {:?}", report.errors);
}
