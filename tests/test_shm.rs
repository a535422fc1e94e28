// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed shared segments: open modes, visibility across mappings and the
// mapping counter.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use wsdb::SharedSegment;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("wsdb_{prefix}_{}_{n}", std::process::id())
}

fn fresh(prefix: &str) -> String {
    let name = unique_name(prefix);
    SharedSegment::<Table>::unlink_by_name(&name);
    name
}

#[repr(C)]
struct Table {
    live: i32,
    rows: [i64; 8],
}

#[test]
fn create_is_exclusive() {
    let name = fresh("seg_excl");
    let first = SharedSegment::<Table>::create(&name).expect("create");
    assert!(first.created());
    assert!(first.name().starts_with('/'));

    let second = SharedSegment::<Table>::create(&name);
    assert_eq!(
        second.err().map(|e| e.kind()),
        Some(io::ErrorKind::AlreadyExists)
    );
    first.unlink();
}

#[test]
fn open_missing_fails() {
    let name = fresh("seg_missing");
    assert!(SharedSegment::<Table>::open(&name).is_err());
}

#[test]
fn zero_sized_table_rejected() {
    let name = fresh("seg_zero");
    let r = SharedSegment::<()>::create(&name);
    assert_eq!(r.err().map(|e| e.kind()), Some(io::ErrorKind::InvalidInput));
}

#[test]
fn create_or_open_attaches_second_time() {
    let name = fresh("seg_both");
    let a = SharedSegment::<Table>::create_or_open(&name).expect("first");
    let b = SharedSegment::<Table>::create_or_open(&name).expect("second");
    assert!(a.created());
    assert!(!b.created());
    a.unlink();
}

#[test]
fn fresh_table_is_zeroed_and_shared() {
    let name = fresh("seg_shared");
    let a = SharedSegment::<Table>::create(&name).expect("create");
    let b = SharedSegment::<Table>::open(&name).expect("open");

    let ta = unsafe { &mut *a.as_ptr() };
    assert_eq!(ta.live, 0);
    assert_eq!(ta.rows, [0; 8]);

    ta.live = 3;
    ta.rows[7] = -42;
    let tb = unsafe { &*b.as_ptr() };
    assert_eq!(tb.live, 3);
    assert_eq!(tb.rows[7], -42);
    a.unlink();
}

#[test]
fn mappings_follow_handles() {
    let name = fresh("seg_refs");
    let a = SharedSegment::<Table>::create(&name).expect("create");
    assert_eq!(a.mappings(), 1);
    let b = SharedSegment::<Table>::open(&name).expect("open");
    assert_eq!(a.mappings(), 2);
    drop(b);
    assert_eq!(a.mappings(), 1);
    a.unlink();
}

#[test]
fn unlink_frees_name_but_keeps_mapping() {
    let name = fresh("seg_unlink");
    let a = SharedSegment::<Table>::create(&name).expect("create");
    unsafe { (*a.as_ptr()).live = 42 };
    a.unlink();

    assert_eq!(unsafe { (*a.as_ptr()).live }, 42);
    let again = SharedSegment::<Table>::create(&name).expect("recreate");
    assert!(again.created());
    assert_eq!(unsafe { (*again.as_ptr()).live }, 0);
    again.unlink();
}
