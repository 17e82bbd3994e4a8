// tests/ledger_file.rs
//
// JSON ledger persistence: survives restarts, tolerates missing/empty files,
// reads the older tracking layout, and never loses concurrent writers' records.

use std::fs;
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use tempfile::tempdir;

use video_autopilot::dispatch::{JsonFileLedgerStore, LedgerStore, QuotaLedger};

fn at(h: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 14)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

#[test]
fn missing_and_empty_files_load_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data/quota.json");
    let store = JsonFileLedgerStore::new(&path);
    assert_eq!(store.load().unwrap(), QuotaLedger::default());

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "  \n").unwrap();
    assert_eq!(store.load().unwrap(), QuotaLedger::default());
}

#[test]
fn marks_survive_a_new_store_instance() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quota.json");

    JsonFileLedgerStore::new(&path)
        .update(&mut |l| {
            l.mark_exhausted("2026-01-14", 2, at(9));
            l.record_error("2026-01-14", 3, "socket closed", at(10));
        })
        .unwrap();

    let reloaded = JsonFileLedgerStore::new(&path).load().unwrap();
    assert!(reloaded.is_exhausted("2026-01-14", 2));
    assert_eq!(reloaded.error_count("2026-01-14", 3), 1);
    assert!(!reloaded.is_exhausted("2026-01-15", 2));
}

#[test]
fn reads_the_older_tracking_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("youtube_quota_tracking.json");
    fs::write(
        &path,
        r#"{"2026-01-14": {"1": {"exhausted": true, "exhausted_at": "2026-01-14T10:22:01.123456"}}}"#,
    )
    .unwrap();
    let l = JsonFileLedgerStore::new(&path).load().unwrap();
    assert!(l.is_exhausted("2026-01-14", 1));
    assert!(!l.is_exhausted("2026-01-14", 2));
}

#[test]
fn corrupt_file_is_an_error_not_a_reset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quota.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(JsonFileLedgerStore::new(&path).load().is_err());
    // untouched
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn stale_snapshot_save_does_not_erase_newer_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quota.json");
    let a = JsonFileLedgerStore::new(&path);
    let b = JsonFileLedgerStore::new(&path);

    let mut stale = a.load().unwrap();
    b.update(&mut |l| {
        l.mark_exhausted("2026-01-14", 1, at(8));
    })
    .unwrap();

    stale.mark_exhausted("2026-01-14", 2, at(9));
    a.save(&stale).unwrap();

    let l = a.load().unwrap();
    assert!(l.is_exhausted("2026-01-14", 1));
    assert!(l.is_exhausted("2026-01-14", 2));
}

#[test]
fn concurrent_updates_are_all_kept() {
    let dir = tempdir().unwrap();
    let path = Arc::new(dir.path().join("quota.json"));

    let handles: Vec<_> = (1..=8u32)
        .map(|id| {
            let path = path.clone();
            thread::spawn(move || {
                JsonFileLedgerStore::new(path.as_path())
                    .update(&mut |l| {
                        l.mark_exhausted("2026-01-14", id, at(12));
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let l = JsonFileLedgerStore::new(path.as_path()).load().unwrap();
    for id in 1..=8 {
        assert!(l.is_exhausted("2026-01-14", id), "identity {id} lost");
    }
}
