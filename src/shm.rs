// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed view of one named shared memory segment holding a single `T`.

use std::io;
use std::marker::PhantomData;

use crate::platform::{PlatformShm, ShmMode};

/// A named segment sized for one `T`, mapped into this process.
///
/// `T` must be a `#[repr(C)]` plain-data table for which all-zero bytes are
/// a valid value: a freshly created segment is zero-filled, and every
/// process mapping the name sees the same bytes. The segment does no
/// locking of its own.
pub struct SharedSegment<T> {
    inner: PlatformShm,
    _table: PhantomData<*mut T>,
}

// Safety: the segment only hands out raw pointers; callers serialise access.
unsafe impl<T> Send for SharedSegment<T> {}
unsafe impl<T> Sync for SharedSegment<T> {}

impl<T> SharedSegment<T> {
    fn acquire(name: &str, mode: ShmMode) -> io::Result<Self> {
        let inner = PlatformShm::acquire(name, std::mem::size_of::<T>(), mode)?;
        Ok(Self {
            inner,
            _table: PhantomData,
        })
    }

    /// Create the segment, failing with `AlreadyExists` if the name is taken.
    pub fn create(name: &str) -> io::Result<Self> {
        Self::acquire(name, ShmMode::Create)
    }

    /// Map an existing segment.
    pub fn open(name: &str) -> io::Result<Self> {
        Self::acquire(name, ShmMode::Open)
    }

    /// Create the segment, or map it when someone else already has.
    /// [`SharedSegment::created`] tells the two apart.
    pub fn create_or_open(name: &str) -> io::Result<Self> {
        match Self::create(name) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::open(name),
            other => other,
        }
    }

    /// The shared table.
    pub fn as_ptr(&self) -> *mut T {
        self.inner.as_mut_ptr() as *mut T
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether this mapping won the exclusive create.
    pub fn created(&self) -> bool {
        self.inner.created()
    }

    /// Mappings of the segment across all processes, this one included.
    pub fn mappings(&self) -> i32 {
        self.inner.ref_count()
    }

    /// Remove the name. Existing mappings stay usable.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    pub fn unlink_by_name(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}
