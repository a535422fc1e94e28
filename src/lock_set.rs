// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named set of binary locks shared between processes.
//
// One shm segment per set: a small header followed by N robust pthread
// mutexes. Whoever wins the exclusive create initialises every mutex and
// only then publishes the set as ready; attachers wait for that. A process
// dying while holding a lock hands it to the next waiter (robust mutex).

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::platform::adaptive_yield;
use crate::platform::posix::{
    cached_shm_acquire, cached_shm_purge, cached_shm_release, lock_set_cache, Acquired,
    CachedShm, PlatformMutex, PlatformShm,
};
use crate::scoped_access::ScopedAccess;

/// Locks per set, on both the client and the server side.
pub const LOCKS_PER_SET: usize = 4;

const STATE_UNINIT: u32 = 0;
const STATE_READY: u32 = 1;
const STATE_REMOVED: u32 = 2;

/// How long an attacher waits for the creator to publish the set.
const READY_WAIT: Duration = Duration::from_secs(2);
const OPEN_ATTEMPTS: usize = 8;

#[repr(C)]
struct Header {
    state: AtomicU32,
    locks: u32,
}

fn locks_offset() -> usize {
    let h = std::mem::size_of::<Header>();
    h.div_ceil(PlatformMutex::ALIGN) * PlatformMutex::ALIGN
}

fn segment_size(locks: usize) -> usize {
    locks_offset() + locks * PlatformMutex::SIZE
}

/// # Safety
/// `base` must point at a mapped lock-set segment.
unsafe fn header<'a>(base: *mut u8) -> &'a Header {
    &*(base as *const Header)
}

// ---------------------------------------------------------------------------
// Lock identifiers
// ---------------------------------------------------------------------------

/// Anything that names one lock of a set.
pub trait LockId: Copy + fmt::Debug {
    fn index(self) -> usize;
}

impl LockId for usize {
    fn index(self) -> usize {
        self
    }
}

/// The client host's lock set.
///
/// The read locks exist in the naming scheme only; every access to the
/// registry or the client log takes the matching write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLock {
    RegistryRead = 0,
    RegistryWrite = 1,
    LogRead = 2,
    LogWrite = 3,
}

impl LockId for ClientLock {
    fn index(self) -> usize {
        self as usize
    }
}

/// The server's lock set. As on the client, only the writer locks are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLock {
    StoreReader = 0,
    StoreWriter = 1,
    LogReader = 2,
    LogWriter = 3,
}

impl LockId for ServerLock {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// LockSet
// ---------------------------------------------------------------------------

/// A set of independently acquirable binary locks identified by one key.
///
/// Any process that knows the key reaches the same locks. Opening is
/// idempotent: the first opener creates and initialises, later ones attach.
pub struct LockSet {
    cached: Arc<CachedShm>,
    name: String,
    locks: Vec<PlatformMutex>,
}

impl LockSet {
    /// Create the set named `name` with `count` locks, or attach to it.
    pub fn open(name: &str, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lock set needs at least one lock",
            )
            .into());
        }
        for _ in 0..OPEN_ATTEMPTS {
            let acquired = cached_shm_acquire(
                lock_set_cache(),
                name,
                segment_size(count),
                |base| {
                    let head = unsafe { header(base) };
                    head.state.load(Ordering::Acquire) == STATE_REMOVED
                },
                |base, created| {
                    if created {
                        Self::initialise(name, base, count)
                    } else {
                        Self::wait_ready(base)
                    }
                },
            );
            let cached = match acquired {
                Ok(cached) => cached,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    // The creator died before publishing the set: retire the
                    // half-built segment and race for the name again.
                    warn!(lock_set = name, "lock set never became ready; recreating");
                    PlatformShm::unlink_by_name(name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let base = cached.shm.as_mut_ptr();
            let head = unsafe { header(base) };
            if head.state.load(Ordering::Acquire) == STATE_REMOVED {
                // Retired between our shm_open and now: the name is free again.
                cached_shm_release(lock_set_cache(), name, &cached);
                cached_shm_purge(lock_set_cache(), name);
                continue;
            }
            if head.locks as usize != count {
                cached_shm_release(lock_set_cache(), name, &cached);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("lock set '{name}' has {} locks, expected {count}", head.locks),
                )
                .into());
            }

            let locks = (0..count)
                .map(|i| unsafe {
                    PlatformMutex::from_raw(base.add(locks_offset() + i * PlatformMutex::SIZE))
                })
                .collect();
            return Ok(Self {
                cached,
                name: name.to_string(),
                locks,
            });
        }
        Err(Error::LockSetRemoved {
            name: name.to_string(),
        })
    }

    fn initialise(name: &str, base: *mut u8, count: usize) -> io::Result<()> {
        for i in 0..count {
            let at = unsafe { base.add(locks_offset() + i * PlatformMutex::SIZE) };
            if let Err(e) = unsafe { PlatformMutex::init(at) } {
                PlatformShm::unlink_by_name(name);
                return Err(e);
            }
        }
        unsafe {
            (*(base as *mut Header)).locks = count as u32;
            header(base).state.store(STATE_READY, Ordering::Release);
        }
        debug!(lock_set = name, locks = count, "created lock set");
        Ok(())
    }

    fn wait_ready(base: *mut u8) -> io::Result<()> {
        let head = unsafe { header(base) };
        let deadline = Instant::now() + READY_WAIT;
        let mut k = 0u32;
        while head.state.load(Ordering::Acquire) == STATE_UNINIT {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "lock set creator never finished initialising",
                ));
            }
            adaptive_yield(&mut k);
        }
        Ok(())
    }

    fn mutex(&self, index: usize) -> Result<&PlatformMutex> {
        self.locks.get(index).ok_or(Error::LockIndex {
            index,
            len: self.locks.len(),
        })
    }

    fn state(&self) -> u32 {
        let head = unsafe { header(self.cached.shm.as_mut_ptr()) };
        head.state.load(Ordering::Acquire)
    }

    /// Block until `lock` is free, then hold it.
    ///
    /// Fails with [`Error::LockSetRemoved`] if the set was destroyed while
    /// we waited; the caller should reopen it by name.
    pub fn acquire(&self, lock: impl LockId) -> Result<()> {
        let index = lock.index();
        let m = self.mutex(index)?;
        if m.lock()? == Acquired::Recovered {
            warn!(lock_set = %self.name, ?lock, "previous holder died; lock recovered");
        }
        self.check_live(m)
    }

    /// Take `lock` if it is free right now.
    pub fn try_acquire(&self, lock: impl LockId) -> Result<bool> {
        let index = lock.index();
        let m = self.mutex(index)?;
        match m.try_lock()? {
            None => Ok(false),
            Some(how) => {
                if how == Acquired::Recovered {
                    warn!(lock_set = %self.name, ?lock, "previous holder died; lock recovered");
                }
                self.check_live(m)?;
                Ok(true)
            }
        }
    }

    fn check_live(&self, m: &PlatformMutex) -> Result<()> {
        if self.state() == STATE_REMOVED {
            if let Err(e) = m.unlock() {
                warn!(lock_set = %self.name, error = %e, "release after removal failed");
            }
            return Err(Error::LockSetRemoved {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Make `lock` available to the next waiter.
    pub fn release(&self, lock: impl LockId) -> Result<()> {
        self.mutex(lock.index())?.unlock()?;
        Ok(())
    }

    /// Acquire `lock` and release it when the returned guard drops.
    pub fn lock(&self, lock: impl LockId) -> Result<ScopedAccess<'_>> {
        self.acquire(lock)?;
        Ok(ScopedAccess::new(self, lock.index()))
    }

    /// Non-blocking [`LockSet::lock`].
    pub fn try_lock(&self, lock: impl LockId) -> Result<Option<ScopedAccess<'_>>> {
        if self.try_acquire(lock)? {
            Ok(Some(ScopedAccess::new(self, lock.index())))
        } else {
            Ok(None)
        }
    }

    /// Retire the set: waiters wake with [`Error::LockSetRemoved`] and the
    /// name becomes free for a fresh set.
    pub fn destroy(&self) {
        let head = unsafe { header(self.cached.shm.as_mut_ptr()) };
        head.state.store(STATE_REMOVED, Ordering::Release);
        self.cached.shm.unlink();
        cached_shm_purge(lock_set_cache(), &self.name);
        debug!(lock_set = %self.name, "destroyed lock set");
    }

    pub fn is_removed(&self) -> bool {
        self.state() == STATE_REMOVED
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Remove the backing storage of a named set without opening it.
    pub fn clear_storage(name: &str) {
        cached_shm_purge(lock_set_cache(), name);
        PlatformShm::unlink_by_name(name);
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        cached_shm_release(lock_set_cache(), &self.name, &self.cached);
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSet")
            .field("name", &self.name)
            .field("locks", &self.locks.len())
            .finish()
    }
}
