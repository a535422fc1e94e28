// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory segments and robust process-shared pthread mutexes.
// These are the only places the crate talks to libc directly.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::shm_name;

use super::adaptive_yield;

/// How long an attacher waits for a creator to size a fresh segment.
const SIZE_WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Process-local shm cache.
// All threads within one process that open the same lock set MUST use the
// same mmap: macOS pthread stores internal pointers relative to the virtual
// address used for pthread_mutex_init, so a second mapping of the same page
// at another address makes pthread_mutex_lock fail with EINVAL.
// ---------------------------------------------------------------------------

pub(crate) struct CachedShm {
    pub(crate) shm: PlatformShm,
    pub(crate) local_ref: AtomicUsize,
}

pub(crate) struct ShmCache {
    map: HashMap<String, Arc<CachedShm>>,
}

impl ShmCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

pub(crate) fn lock_set_cache() -> &'static Mutex<ShmCache> {
    static CACHE: OnceLock<Mutex<ShmCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(ShmCache::new()))
}

fn lock_cache(cache: &Mutex<ShmCache>) -> std::sync::MutexGuard<'_, ShmCache> {
    // The map stays consistent even if a holder panicked.
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Acquire or reuse a cached shm handle.
///
/// On the first local open for `name`, `init_fn` runs with the segment
/// pointer and whether this call created the segment, **while the cache
/// lock is still held**, so no other local thread sees the handle before
/// `init_fn` returns. `is_stale` lets the caller reject a cached mapping
/// whose segment has since been retired by another process.
pub(crate) fn cached_shm_acquire<F, S>(
    cache: &Mutex<ShmCache>,
    name: &str,
    size: usize,
    is_stale: S,
    init_fn: F,
) -> io::Result<Arc<CachedShm>>
where
    F: FnOnce(*mut u8, bool) -> io::Result<()>,
    S: Fn(*mut u8) -> bool,
{
    let mut c = lock_cache(cache);
    if let Some(entry) = c.map.get(name) {
        if !is_stale(entry.shm.as_mut_ptr()) {
            entry.local_ref.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(entry));
        }
        c.map.remove(name);
    }
    let shm = PlatformShm::acquire(name, size, ShmMode::CreateOrOpen)?;
    init_fn(shm.as_mut_ptr(), shm.created())?;
    let entry = Arc::new(CachedShm {
        shm,
        local_ref: AtomicUsize::new(1),
    });
    c.map.insert(name.to_string(), Arc::clone(&entry));
    Ok(entry)
}

/// Release one local reference. When the last local ref drops, remove from cache.
pub(crate) fn cached_shm_release(cache: &Mutex<ShmCache>, name: &str, entry: &Arc<CachedShm>) {
    let mut c = lock_cache(cache);
    let prev = entry.local_ref.fetch_sub(1, Ordering::AcqRel);
    if prev <= 1 {
        if let Some(current) = c.map.get(name) {
            // A purge followed by a fresh open may have replaced the entry.
            if Arc::ptr_eq(current, entry) {
                c.map.remove(name);
            }
        }
    }
}

/// Forcibly remove a cache entry after the underlying shm has been unlinked.
pub(crate) fn cached_shm_purge(cache: &Mutex<ShmCache>, name: &str) {
    lock_cache(cache).map.remove(name);
}

// ---------------------------------------------------------------------------
// Robust mutex symbols: not exposed by `libc` on every target.
// macOS has no robust mutexes; a holder that dies there leaves the lock held.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// Layout helpers: user region rounded up to 4 bytes, then a trailing
// atomic<int32_t> counting the mappings of the segment.
// ---------------------------------------------------------------------------

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// Returns a reference to the trailing `AtomicI32` ref-counter inside a mapped
/// region of `total_size` bytes starting at `mem`.
///
/// # Safety
/// `mem` must point to a valid mapped region of at least `total_size` bytes.
unsafe fn acc_of(mem: *mut u8, total_size: usize) -> &'static AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,      // total mapped size (including ref counter)
    name: String,     // POSIX name (with leading '/')
    created: bool,    // this handle won the O_EXCL race
}

// Safety: the region is shared between processes anyway; every
// access to its contents is bracketed by a lock set.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

/// Open mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

impl PlatformShm {
    /// Acquire a named shared memory region of `user_size` usable bytes.
    ///
    /// A freshly created segment is zero-filled by `ftruncate`. An attacher
    /// that races the creator waits until the segment reaches its full size
    /// before mapping it.
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o600;
        let total_size = calc_size(user_size);

        let (fd, created) = match mode {
            ShmMode::Create => (Self::open_exclusive(&c_name, perms)?, true),
            ShmMode::Open => (Self::open_existing(&c_name, perms)?, false),
            ShmMode::CreateOrOpen => match Self::open_exclusive(&c_name, perms) {
                Ok(fd) => (fd, true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    (Self::open_existing(&c_name, perms)?, false)
                }
                Err(e) => return Err(e),
            },
        };

        if created {
            // Only the creator sizes the object: on macOS ftruncate of an
            // already-sized object can zero it before failing with EINVAL.
            let ret = unsafe { libc::ftruncate(fd, total_size as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        } else if let Err(e) = Self::wait_for_size(fd, total_size) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        Self::mmap_and_finish(fd, total_size, posix_name, created)
    }

    fn open_exclusive(c_name: &CString, perms: libc::mode_t) -> io::Result<i32> {
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    fn open_existing(c_name: &CString, perms: libc::mode_t) -> io::Result<i32> {
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    /// Block until the creator's `ftruncate` is visible.
    fn wait_for_size(fd: i32, total_size: usize) -> io::Result<()> {
        let deadline = Instant::now() + SIZE_WAIT;
        let mut k = 0u32;
        loop {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                return Err(io::Error::last_os_error());
            }
            let current = st.st_size as usize;
            if current >= total_size {
                return Ok(());
            }
            if current != 0 || Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("shared segment is {current} bytes, expected {total_size}"),
                ));
            }
            adaptive_yield(&mut k);
        }
    }

    fn mmap_and_finish(
        fd: i32,
        total_size: usize,
        posix_name: String,
        created: bool,
    ) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        unsafe { acc_of(mem as *mut u8, total_size).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem: mem as *mut u8,
            size: total_size,
            name: posix_name,
            created,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the segment.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Number of live mappings of the segment, across processes.
    pub fn ref_count(&self) -> i32 {
        if self.mem.is_null() || self.size == 0 {
            return 0;
        }
        unsafe { acc_of(self.mem, self.size).load(Ordering::Acquire) }
    }

    /// Remove the name (shm_unlink). Existing mappings stay valid.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    /// Unlink a named shm segment by name (static helper).
    pub fn unlink_by_name(name: &str) {
        let posix_name = shm_name::make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        // Teardown of the name is explicit: a later process may already have
        // re-created a segment under it.
        unsafe {
            acc_of(self.mem, self.size).fetch_sub(1, Ordering::AcqRel);
            libc::munmap(self.mem as *mut libc::c_void, self.size);
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex: robust process-shared pthread mutex living in shared memory
// ---------------------------------------------------------------------------

/// How a blocking lock call obtained the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The mutex was free or released normally.
    Clean,
    /// The previous owner died holding it; the mutex was made consistent.
    Recovered,
}

/// A view onto a `pthread_mutex_t` inside a mapped segment. It does not own
/// the memory; the segment must outlive it.
pub struct PlatformMutex {
    ptr: *mut libc::pthread_mutex_t,
}

unsafe impl Send for PlatformMutex {}
unsafe impl Sync for PlatformMutex {}

impl PlatformMutex {
    /// Size of the in-memory mutex.
    pub const SIZE: usize = std::mem::size_of::<libc::pthread_mutex_t>();
    /// Required alignment of the in-memory mutex.
    pub const ALIGN: usize = std::mem::align_of::<libc::pthread_mutex_t>();

    /// Initialise a mutex in place with `PTHREAD_PROCESS_SHARED` and, where
    /// available, `PTHREAD_MUTEX_ROBUST`, so that a lock held by a process
    /// that dies is handed to the next waiter.
    ///
    /// # Safety
    /// `ptr` must be valid, suitably aligned, and not in use by any other
    /// thread or process while this runs.
    pub unsafe fn init(ptr: *mut u8) -> io::Result<Self> {
        let mtx_ptr = ptr as *mut libc::pthread_mutex_t;
        ptr::write_bytes(mtx_ptr, 0, 1);

        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let mut eno = libc::pthread_mutexattr_init(&mut attr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }

        eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if eno != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(eno));
        }

        #[cfg(not(target_os = "macos"))]
        {
            eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
            if eno != 0 {
                libc::pthread_mutexattr_destroy(&mut attr);
                return Err(io::Error::from_raw_os_error(eno));
            }
        }

        eno = libc::pthread_mutex_init(mtx_ptr, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(Self { ptr: mtx_ptr })
    }

    /// Attach to a mutex that some process already initialised.
    ///
    /// # Safety
    /// `ptr` must point to a mutex set up by [`PlatformMutex::init`].
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        Self {
            ptr: ptr as *mut libc::pthread_mutex_t,
        }
    }

    /// Lock the mutex (blocking, no timeout).
    pub fn lock(&self) -> io::Result<Acquired> {
        loop {
            let eno = unsafe { libc::pthread_mutex_lock(self.ptr) };
            match eno {
                0 => return Ok(Acquired::Clean),
                #[cfg(not(target_os = "macos"))]
                EOWNERDEAD => {
                    self.make_consistent()?;
                    return Ok(Acquired::Recovered);
                }
                libc::EINTR => continue,
                _ => return Err(io::Error::from_raw_os_error(eno)),
            }
        }
    }

    /// Try to lock the mutex without blocking. `Ok(None)` when contended.
    pub fn try_lock(&self) -> io::Result<Option<Acquired>> {
        let eno = unsafe { libc::pthread_mutex_trylock(self.ptr) };
        match eno {
            0 => Ok(Some(Acquired::Clean)),
            libc::EBUSY => Ok(None),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                self.make_consistent()?;
                Ok(Some(Acquired::Recovered))
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.ptr) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn make_consistent(&self) -> io::Result<()> {
        let eno = unsafe { pthread_mutex_consistent(self.ptr) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }
}
