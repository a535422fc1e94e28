// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host client registry: create-or-attach, slot assignment, live count and
// teardown by the last client out. Threads stand in for client processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use wsdb::shm_name::{lock_set_name, registry_name};
use wsdb::{ClientRegistry, Detach, Error, LockSet, SharedSegment, MAX_CLIENTS};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("wsdb_{prefix}_{}_{n}", std::process::id())
}

fn fresh_key(prefix: &str) -> String {
    let key = unique_name(prefix);
    LockSet::clear_storage(&lock_set_name(&key));
    SharedSegment::<u64>::unlink_by_name(&registry_name(&key));
    key
}

/// Check with an exclusive create so an existing table is never mapped.
fn registry_exists(key: &str) -> bool {
    match SharedSegment::<u64>::create(&registry_name(key)) {
        Ok(scratch) => {
            scratch.unlink();
            false
        }
        Err(_) => true,
    }
}

#[test]
fn first_client_creates_second_attaches() {
    let key = fresh_key("reg_first");
    let a = ClientRegistry::attach_as(&key, 100).expect("attach a");
    let b = ClientRegistry::attach_as(&key, 101).expect("attach b");

    assert!(a.created());
    assert!(!b.created());
    assert_eq!(a.slot(), 0);
    assert_eq!(b.slot(), 1);
    assert_eq!(a.live_count().unwrap(), 2);

    let pids: Vec<i32> = b.snapshot().unwrap().iter().map(|e| e.pid).collect();
    assert_eq!(pids, vec![100, 101]);
    // Both attachments map the same table.
    assert_eq!(a.mappings(), 2);

    assert_eq!(a.detach().unwrap(), Detach::Remaining(1));
    assert_eq!(b.mappings(), 1);
    assert_eq!(b.detach().unwrap(), Detach::Destroyed);
    assert!(!registry_exists(&key));
}

#[test]
fn racing_attach_has_one_creator_and_distinct_slots() {
    let key = fresh_key("reg_race");
    let n = 8;
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let key = key.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ClientRegistry::attach_as(&key, 1000 + i as i32).expect("attach")
            })
        })
        .collect();
    let clients: Vec<ClientRegistry> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(clients.iter().filter(|c| c.created()).count(), 1);
    let mut slots: Vec<usize> = clients.iter().map(|c| c.slot()).collect();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), n);
    assert_eq!(clients[0].live_count().unwrap(), n);

    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = clients
        .into_iter()
        .map(|c| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                c.detach().expect("detach")
            })
        })
        .collect();
    let outcomes: Vec<Detach> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|d| **d == Detach::Destroyed).count(), 1);
    assert!(!registry_exists(&key));
}

#[test]
fn live_count_tracks_attach_and_detach() {
    let key = fresh_key("reg_live");
    let a = ClientRegistry::attach_as(&key, 1).unwrap();
    let b = ClientRegistry::attach_as(&key, 2).unwrap();
    let c = ClientRegistry::attach_as(&key, 3).unwrap();
    assert_eq!(a.live_count().unwrap(), 3);

    assert_eq!(b.detach().unwrap(), Detach::Remaining(2));
    assert_eq!(a.live_count().unwrap(), 2);
    assert_eq!(c.snapshot().unwrap().len(), 2);

    // The freed slot is the first free one, so it is handed out again.
    let d = ClientRegistry::attach_as(&key, 4).unwrap();
    assert_eq!(d.slot(), 1);
    assert_eq!(a.live_count().unwrap(), 3);

    a.detach().unwrap();
    c.detach().unwrap();
    assert_eq!(d.detach().unwrap(), Detach::Destroyed);
}

#[test]
fn full_registry_refuses_attach() {
    let key = fresh_key("reg_full");
    let clients: Vec<ClientRegistry> = (0..MAX_CLIENTS)
        .map(|i| ClientRegistry::attach_as(&key, i as i32 + 1).expect("attach"))
        .collect();

    let over = ClientRegistry::attach_as(&key, 9999);
    assert!(matches!(
        over,
        Err(Error::RegistryFull { capacity }) if capacity == MAX_CLIENTS
    ));
    assert_eq!(clients[0].live_count().unwrap(), MAX_CLIENTS);

    for c in clients {
        c.detach().unwrap();
    }
    assert!(!registry_exists(&key));
}

#[test]
fn activity_is_counted_per_slot() {
    let key = fresh_key("reg_activity");
    let a = ClientRegistry::attach_as(&key, 10).unwrap();
    let b = ClientRegistry::attach_as(&key, 11).unwrap();

    for _ in 0..3 {
        a.record_activity().unwrap();
    }
    b.record_activity().unwrap();

    let entry = a.entry().unwrap();
    assert_eq!(entry.commands, 3);
    assert_eq!(entry.pid, 10);
    assert!(entry.last_active_at >= entry.connected_at);
    assert_eq!(b.entry().unwrap().commands, 1);

    a.detach().unwrap();
    b.detach().unwrap();
}

#[test]
fn drop_detaches_and_next_client_recreates() {
    let key = fresh_key("reg_drop");
    {
        let a = ClientRegistry::attach_as(&key, 1).unwrap();
        assert!(a.created());
    }
    assert!(!registry_exists(&key));

    let b = ClientRegistry::attach_as(&key, 2).unwrap();
    assert!(b.created());
    assert_eq!(b.slot(), 0);
    assert_eq!(b.live_count().unwrap(), 1);
    assert_eq!(b.detach().unwrap(), Detach::Destroyed);
}
