// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host-shared table of the client processes connected from this host.
//
// The first client to arrive creates the segment (exclusive create) and the
// last one to leave destroys it together with the lock set. Every read and
// write of the table, including the creator's initialisation, happens under
// the registry write lock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lock_set::{ClientLock, LockSet, LOCKS_PER_SET};
use crate::shm_name::{lock_set_name, registry_name};
use crate::SharedSegment;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Concurrent clients per host.
pub const MAX_CLIENTS: usize = 30;

/// Slot id of an entry nobody owns.
pub const UNUSED_SLOT: i32 = -1;

// ---------------------------------------------------------------------------
// Shared memory layout
// ---------------------------------------------------------------------------

/// One connected client, as seen by every client on the host.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientEntry {
    /// Index into the table, or [`UNUSED_SLOT`].
    pub slot: i32,
    pub pid: i32,
    /// Unix seconds at attach.
    pub connected_at: i64,
    /// Unix seconds at the last frame sent or received.
    pub last_active_at: i64,
    /// Frames sent and received so far.
    pub commands: u64,
}

impl ClientEntry {
    const fn unused() -> Self {
        Self {
            slot: UNUSED_SLOT,
            pid: 0,
            connected_at: 0,
            last_active_at: 0,
            commands: 0,
        }
    }

    pub fn in_use(&self) -> bool {
        self.slot != UNUSED_SLOT
    }
}

#[repr(C)]
struct RegistryData {
    live: i32,
    _reserved: i32,
    entries: [ClientEntry; MAX_CLIENTS],
}

/// What a detach left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// Other clients are still attached.
    Remaining(usize),
    /// This was the last client; registry and lock set are gone.
    Destroyed,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn current_pid() -> i32 {
    std::process::id() as i32
}

// ---------------------------------------------------------------------------
// ClientRegistry
// ---------------------------------------------------------------------------

/// This process's attachment to the host registry. Owns exactly one slot.
///
/// Dropping an attachment without [`ClientRegistry::detach`] detaches it.
pub struct ClientRegistry {
    locks: Arc<LockSet>,
    shm: SharedSegment<RegistryData>,
    data: *mut RegistryData,
    slot: usize,
    created: bool,
    detached: bool,
}

// Safety: `data` points into `shm`, and all access goes through the lock set.
unsafe impl Send for ClientRegistry {}
unsafe impl Sync for ClientRegistry {}

impl ClientRegistry {
    /// Attach the calling process to the registry under `key`.
    pub fn attach(key: &str) -> Result<Self> {
        Self::attach_as(key, current_pid())
    }

    /// Attach with an explicit pid (several "processes" per test process).
    pub fn attach_as(key: &str, pid: i32) -> Result<Self> {
        let locks_name = lock_set_name(key);
        loop {
            let locks = Arc::new(LockSet::open(&locks_name, LOCKS_PER_SET)?);
            match Self::attach_locked(key, &locks, pid) {
                Ok((shm, slot, created)) => {
                    let data = shm.as_ptr();
                    return Ok(Self {
                        locks,
                        shm,
                        data,
                        slot,
                        created,
                        detached: false,
                    });
                }
                // The last client left while we waited: start over on a fresh set.
                Err(Error::LockSetRemoved { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn attach_locked(
        key: &str,
        locks: &LockSet,
        pid: i32,
    ) -> Result<(SharedSegment<RegistryData>, usize, bool)> {
        let _guard = locks.lock(ClientLock::RegistryWrite)?;

        let shm = SharedSegment::<RegistryData>::create_or_open(&registry_name(key))?;
        let created = shm.created();
        let reg = unsafe { &mut *shm.as_ptr() };

        if created {
            reg.live = 0;
            reg.entries = [ClientEntry::unused(); MAX_CLIENTS];
        }

        let slot = match reg.entries.iter().position(|e| !e.in_use()) {
            Some(slot) => slot,
            None => {
                return Err(Error::RegistryFull {
                    capacity: MAX_CLIENTS,
                })
            }
        };

        let now = now_secs();
        reg.entries[slot] = ClientEntry {
            slot: slot as i32,
            pid,
            connected_at: now,
            last_active_at: now,
            commands: 0,
        };
        reg.live += 1;

        if created {
            info!(key, pid, "created client registry");
        } else {
            debug!(key, pid, slot, live = reg.live, "attached to client registry");
        }
        Ok((shm, slot, created))
    }

    /// Run `f` on the table with the registry write lock held.
    fn with_data<T>(&self, f: impl FnOnce(&mut RegistryData) -> T) -> Result<T> {
        let _guard = self.locks.lock(ClientLock::RegistryWrite)?;
        Ok(f(unsafe { &mut *self.data }))
    }

    /// This process's slot id.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether this process created the registry.
    pub fn created(&self) -> bool {
        self.created
    }

    /// The host's client lock set, shared with the client log.
    pub fn locks(&self) -> &Arc<LockSet> {
        &self.locks
    }

    /// Count one frame exchanged with the server.
    pub fn record_activity(&self) -> Result<()> {
        let slot = self.slot;
        self.with_data(|reg| {
            let e = &mut reg.entries[slot];
            e.commands += 1;
            e.last_active_at = now_secs();
        })
    }

    /// Copy of this process's own entry.
    pub fn entry(&self) -> Result<ClientEntry> {
        let slot = self.slot;
        self.with_data(|reg| reg.entries[slot])
    }

    /// Every in-use entry in slot order.
    pub fn snapshot(&self) -> Result<Vec<ClientEntry>> {
        self.with_data(|reg| reg.entries.iter().filter(|e| e.in_use()).copied().collect())
    }

    /// Number of attached clients.
    pub fn live_count(&self) -> Result<usize> {
        self.with_data(|reg| reg.live.max(0) as usize)
    }

    /// Number of attachments currently mapping the registry segment.
    pub fn mappings(&self) -> i32 {
        self.shm.mappings()
    }

    /// Release this process's slot. The last client out destroys the
    /// registry and the lock set.
    pub fn detach(mut self) -> Result<Detach> {
        self.detach_inner()
    }

    fn detach_inner(&mut self) -> Result<Detach> {
        if self.detached {
            return Ok(Detach::Remaining(0));
        }
        let guard = self.locks.lock(ClientLock::RegistryWrite)?;
        self.detached = true;
        let reg = unsafe { &mut *self.data };
        reg.entries[self.slot] = ClientEntry::unused();
        reg.live -= 1;
        if reg.live <= 0 {
            self.shm.unlink();
            self.locks.destroy();
            drop(guard);
            info!(slot = self.slot, "last client out; removed registry and lock set");
            return Ok(Detach::Destroyed);
        }
        let remaining = reg.live as usize;
        drop(guard);
        debug!(slot = self.slot, remaining, "detached from client registry");
        Ok(Detach::Remaining(remaining))
    }
}

impl Drop for ClientRegistry {
    fn drop(&mut self) {
        if !self.detached {
            if let Err(e) = self.detach_inner() {
                warn!(slot = self.slot, error = %e, "detach on drop failed");
            }
        }
    }
}
