// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A sleepable mutex with an interrupt-safe fast path.
//!
//! The fast path is a single compare-and-swap; while contended,
//! [`Mutex::lock`] yields through the scheduler (or spins, before
//! the scheduler is running), so it eventually succeeds provided
//! the holder eventually releases.
//!
//! The mutex remembers where it was last acquired. The lock word
//! only ever transitions `false → true → false`; if a double lock
//! or double unlock is suspected, the recorded origin names the
//! site that took the lock last.

use crate::multitasking::scheduler;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam::atomic::AtomicCell;

/// A mutual exclusion primitive.
///
/// Unlike a spin lock, waiting is polite: the scheduler gets the
/// CPU back between attempts.
///
pub struct Mutex {
    locked: AtomicBool,

    // Where the lock was last acquired, for diagnosing double
    // locks.
    lock_origin: AtomicCell<Option<&'static Location<'static>>>,
}

impl Mutex {
    /// Returns a new, unlocked mutex.
    ///
    pub const fn new() -> Mutex {
        Mutex {
            locked: AtomicBool::new(false),
            lock_origin: AtomicCell::new(None),
        }
    }

    /// Attempts to acquire the mutex without waiting, returning
    /// whether it succeeded.
    ///
    #[track_caller]
    pub fn try_lock(&self) -> bool {
        self.try_lock_from(Location::caller())
    }

    /// Acquires the mutex, yielding through the scheduler while it
    /// is contended.
    ///
    #[track_caller]
    pub fn lock(&self) {
        let origin = Location::caller();
        while !self.try_lock_from(origin) {
            if scheduler::ready() {
                scheduler::switch();
            } else {
                core::hint::spin_loop();
            }
        }
    }

    /// Releases the mutex.
    ///
    pub fn unlock(&self) {
        debug_assert!(
            self.locked.load(Ordering::Relaxed),
            "mutex unlocked while not locked (last locked at {:?})",
            self.lock_origin.load()
        );
        self.locked.store(false, Ordering::Release);
    }

    /// Returns where the mutex was last acquired, or `None` if it
    /// never has been.
    ///
    pub fn last_lock_origin(&self) -> Option<&'static Location<'static>> {
        self.lock_origin.load()
    }

    fn try_lock_from(&self, origin: &'static Location<'static>) -> bool {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.lock_origin.store(Some(origin));
        }

        acquired
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}
