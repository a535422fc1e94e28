// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard over one lock of a LockSet: held from construction, released
// on drop, so every acquire is matched by a release on every exit path.

use tracing::warn;

use crate::LockSet;

/// Holds one lock of a [`LockSet`] for its lifetime.
pub struct ScopedAccess<'a> {
    set: &'a LockSet,
    index: usize,
}

impl<'a> ScopedAccess<'a> {
    /// Wrap a lock the caller already holds.
    pub(crate) fn new(set: &'a LockSet, index: usize) -> Self {
        Self { set, index }
    }

    /// Index of the held lock inside its set.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<'a> Drop for ScopedAccess<'a> {
    fn drop(&mut self) {
        if let Err(e) = self.set.release(self.index) {
            warn!(lock_set = self.set.name(), index = self.index, error = %e, "release failed");
        }
    }
}
