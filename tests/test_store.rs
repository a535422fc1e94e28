// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Binary record store: append, positional reads and overwrites, ordinal
// checks and the on-disk layout.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use wsdb::{Error, LockSet, Record, RecordStore, LOCKS_PER_SET, RECORD_SIZE};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("wsdb_{prefix}_{}_{n}", std::process::id())
}

struct Fixture {
    _dir: tempfile::TempDir,
    locks: Arc<LockSet>,
    store: RecordStore,
}

impl Fixture {
    fn new(prefix: &str) -> Self {
        let name = unique_name(prefix);
        LockSet::clear_storage(&name);
        let locks = Arc::new(LockSet::open(&name, LOCKS_PER_SET).expect("lock set"));
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path().join("wsdb.bin"), Arc::clone(&locks)).expect("store");
        Self {
            _dir: dir,
            locks,
            store,
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.locks.destroy();
    }
}

fn rec(year: i32, base: i32) -> Record {
    Record::new([year, base, base + 1, base + 2, base + 3, base + 4, base + 5, base + 6, base + 7])
}

#[test]
fn empty_store_has_no_records() {
    let f = Fixture::new("store_empty");
    assert_eq!(f.store.count().unwrap(), 0);
    assert!(f.store.read_all().unwrap().is_empty());
    assert!(matches!(
        f.store.read_at(1),
        Err(Error::OrdinalOutOfRange { ordinal: 1, count: 0 })
    ));
}

#[test]
fn append_then_read_back() {
    let f = Fixture::new("store_roundtrip");
    let written: Vec<Record> = (0..5).map(|i| rec(2000 + i, i * 10)).collect();
    for (i, r) in written.iter().enumerate() {
        assert_eq!(f.store.append(r).unwrap(), i as u32 + 1);
    }
    for (i, r) in written.iter().enumerate() {
        assert_eq!(f.store.read_at(i as i64 + 1).unwrap(), *r);
    }
    assert_eq!(f.store.read_all().unwrap(), written);
}

#[test]
fn count_grows_by_one_per_append() {
    let f = Fixture::new("store_count");
    let mut last = f.store.count().unwrap();
    for i in 0..20 {
        f.store.append(&rec(1990 + i, i)).unwrap();
        let now = f.store.count().unwrap();
        assert_eq!(now, last + 1);
        last = now;
    }
}

#[test]
fn overwrite_changes_only_that_record() {
    let f = Fixture::new("store_overwrite");
    for i in 0..5 {
        f.store.append(&rec(2010 + i, i)).unwrap();
    }
    let changed = f.store.read_at(3).unwrap().with_field(4, -77).unwrap();
    f.store.overwrite_at(3, &changed).unwrap();

    let all = f.store.read_all().unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[2], changed);
    assert_eq!(all[2].field(4).unwrap(), -77);
    assert_eq!(all[1], rec(2011, 1));
    assert_eq!(all[3], rec(2013, 3));
}

#[test]
fn out_of_range_ordinals_rejected() {
    let f = Fixture::new("store_range");
    f.store.append(&rec(2018, 1)).unwrap();
    f.store.append(&rec(2019, 2)).unwrap();

    for bad in [0, -1, 3, -999, i64::MAX] {
        assert!(matches!(
            f.store.read_at(bad),
            Err(Error::OrdinalOutOfRange { ordinal, count: 2 }) if ordinal == bad
        ));
        assert!(f.store.overwrite_at(bad, &rec(0, 0)).is_err());
    }
    assert_eq!(f.store.count().unwrap(), 2);
}

#[test]
fn file_layout_is_headerless_le() {
    let f = Fixture::new("store_layout");
    f.store.append(&rec(2018, 1)).unwrap();
    f.store.append(&rec(2019, 100)).unwrap();
    f.store.sync().unwrap();

    let bytes = std::fs::read(f.store.path()).unwrap();
    assert_eq!(bytes.len(), 2 * RECORD_SIZE);
    assert_eq!(&bytes[0..4], &2018i32.to_le_bytes());
    assert_eq!(&bytes[RECORD_SIZE..RECORD_SIZE + 4], &2019i32.to_le_bytes());
    assert_eq!(&bytes[RECORD_SIZE + 4..RECORD_SIZE + 8], &100i32.to_le_bytes());
}

#[test]
fn torn_tail_is_ignored_then_overwritten() {
    let f = Fixture::new("store_torn");
    f.store.append(&rec(2018, 1)).unwrap();
    {
        let mut raw = OpenOptions::new().append(true).open(f.store.path()).unwrap();
        raw.write_all(&[0xAB; 10]).unwrap();
    }
    assert_eq!(f.store.count().unwrap(), 1);

    assert_eq!(f.store.append(&rec(2019, 2)).unwrap(), 2);
    assert_eq!(f.store.read_at(2).unwrap(), rec(2019, 2));
    let len = std::fs::metadata(f.store.path()).unwrap().len();
    assert_eq!(len, 2 * RECORD_SIZE as u64);
}

#[test]
fn reopen_sees_existing_records() {
    let f = Fixture::new("store_reopen");
    f.store.append(&rec(2001, 5)).unwrap();
    let again = RecordStore::open(f.store.path(), Arc::clone(&f.locks)).unwrap();
    assert_eq!(again.count().unwrap(), 1);
    assert_eq!(again.read_at(1).unwrap(), rec(2001, 5));
}

#[test]
fn concurrent_appends_are_totally_ordered() {
    let f = Fixture::new("store_concurrent");
    let store = Arc::new(f);
    let threads = 4;
    let per_thread = 50;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let f = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread)
                    .map(|i| f.store.append(&rec(t as i32, i)).unwrap())
                    .collect::<Vec<u32>>()
            })
        })
        .collect();
    let mut ordinals: Vec<u32> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ordinals.sort_unstable();

    let expected: Vec<u32> = (1..=(threads * per_thread as usize) as u32).collect();
    assert_eq!(ordinals, expected);
    assert_eq!(store.store.count().unwrap(), (threads * per_thread as usize) as u32);
}
