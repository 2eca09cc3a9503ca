// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rd_core::JobId;
use std::io::Write as _;
use tempfile::TempDir;

fn record(id: &str) -> Record {
    Record::JobDeleted {
        id: JobId::new(id),
    }
}

fn record_id(record: &Record) -> &str {
    match record {
        Record::JobDeleted { id } => id.as_str(),
        _ => panic!("unexpected record"),
    }
}

#[test]
fn append_assigns_increasing_seqs() {
    let dir = TempDir::new().unwrap();
    let mut journal = Journal::open(&dir.path().join("store.wal")).unwrap();

    assert_eq!(journal.append(&record("a")).unwrap(), 1);
    assert_eq!(journal.append(&record("b")).unwrap(), 2);
    assert_eq!(journal.seq(), 2);
}

#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    {
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&record("a")).unwrap();
        journal.append(&record("b")).unwrap();
        journal.flush().unwrap();
    }

    let mut journal = Journal::open(&path).unwrap();
    assert_eq!(journal.seq(), 2);
    let entries = journal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(record_id(&entries[0].record), "a");
    assert_eq!(record_id(&entries[1].record), "b");
}

#[test]
fn entries_after_skips_already_seen() {
    let dir = TempDir::new().unwrap();
    let mut journal = Journal::open(&dir.path().join("store.wal")).unwrap();
    journal.append(&record("a")).unwrap();
    journal.append(&record("b")).unwrap();
    journal.append(&record("c")).unwrap();

    let entries = journal.entries_after(2).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 3);
}

#[test]
fn needs_flush_after_threshold() {
    let dir = TempDir::new().unwrap();
    let mut journal = Journal::open(&dir.path().join("store.wal")).unwrap();
    for i in 0..100 {
        journal.append(&record(&format!("job-{i}"))).unwrap();
    }
    assert!(journal.needs_flush());
    journal.flush().unwrap();
    assert!(!journal.needs_flush());
}

#[test]
fn corrupt_tail_is_rotated_and_valid_prefix_kept() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    {
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&record("a")).unwrap();
        journal.flush().unwrap();
    }

    // Simulate a torn write
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"seq\":2,\"record\":{\"type\":\"job:del").unwrap();
    }

    let mut journal = Journal::open(&path).unwrap();
    assert_eq!(journal.seq(), 1);
    let entries = journal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(path.with_extension("bak").exists());
}

#[test]
fn truncate_before_drops_old_entries() {
    let dir = TempDir::new().unwrap();
    let mut journal = Journal::open(&dir.path().join("store.wal")).unwrap();
    journal.append(&record("a")).unwrap();
    journal.append(&record("b")).unwrap();
    journal.append(&record("c")).unwrap();

    journal.truncate_before(3).unwrap();

    let entries = journal.entries_after(0).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 3);
    // New appends continue the old numbering
    assert_eq!(journal.append(&record("d")).unwrap(), 4);
}
