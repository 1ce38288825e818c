// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Thread creation and lifecycle.
//!
//! A [`Thread`] pairs the architecture's saved context with the
//! scheduling metadata the kernel needs: a unique id, a priority,
//! and a state. All living threads are tracked in a global table;
//! the one exception is the idle thread, which never enters the
//! scheduler and always has thread id 0.

use crate::arch::interrupts::without_interrupts;
use crate::arch::thread::ArchThread;
use crate::multitasking::scheduler;
use crate::status::Result;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam::atomic::AtomicCell;

/// A thread's scheduling priority.
///
/// Works like a UNIX niceness value: lower numbers are served
/// first.
///
pub type Priority = i8;

/// THREADS stores all living threads, referencing them by their
/// thread id. Note that THREADS does not contain the idle thread,
/// which never enters the scheduler.
///
pub(super) static THREADS: spin::Mutex<BTreeMap<ThreadId, Arc<Thread>>> =
    spin::Mutex::new(BTreeMap::new());

/// Uniquely identifies a thread.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// The unique thread id of the idle thread.
    ///
    pub const IDLE: Self = ThreadId(0);

    /// Allocates and returns the next available ThreadId.
    ///
    pub(super) fn new() -> Self {
        static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns a numerical representation for the thread id.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Resumes the referenced thread.
    ///
    pub fn resume(&self) -> bool {
        scheduler::resume(*self)
    }
}

/// Describes the scheduling state of a thread.
///
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    /// The thread is being created and not yet runnable.
    BeingCreated,

    /// The thread is runnable.
    Runnable,

    /// The thread is sleeping.
    Sleeping,

    /// The thread is in the process of exiting.
    Exiting,
}

/// Contains the metadata for a thread of execution.
///
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    priority: Priority,
    state: AtomicCell<ThreadState>,
    arch: ArchThread,
}

impl Thread {
    /// The stack size given to threads whose creator expresses no
    /// preference.
    ///
    pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

    /// Creates a new kernel thread that will enter `entry_point`
    /// when first scheduled, and marks it as not runnable.
    ///
    /// The new thread will not start until it is resumed, either
    /// via [`ThreadId::resume`] or [`scheduler::resume`].
    ///
    pub fn create(
        priority: Priority,
        min_stack_size: usize,
        entry_point: fn() -> !,
    ) -> Result<ThreadId> {
        let arch = ArchThread::new(min_stack_size, entry_point as usize)?;
        let id = ThreadId::new();
        let thread = Arc::new(Thread {
            id,
            priority,
            state: AtomicCell::new(ThreadState::BeingCreated),
            arch,
        });

        without_interrupts(|| {
            THREADS.lock().insert(id, thread);
        });

        Ok(id)
    }

    /// Creates a new kernel thread and immediately adds it to the
    /// scheduler.
    ///
    pub fn start(
        priority: Priority,
        min_stack_size: usize,
        entry_point: fn() -> !,
    ) -> Result<ThreadId> {
        let id = Thread::create(priority, min_stack_size, entry_point)?;
        id.resume();

        Ok(id)
    }

    // The idle thread's context slot. Its primed stack is never
    // entered through: the first switch away from the boot flow
    // overwrites the saved stack pointer, so the idle thread
    // inherits the kernel's initial stack.
    //
    pub(super) fn new_idle() -> Arc<Thread> {
        let arch = ArchThread::new(0, 0).expect("idle thread context allocation failed");

        Arc::new(Thread {
            id: ThreadId::IDLE,
            priority: Priority::MAX,
            state: AtomicCell::new(ThreadState::Runnable),
            arch,
        })
    }

    /// Returns the thread's unique id.
    ///
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the thread's priority.
    ///
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the thread's current scheduling state.
    ///
    pub fn state(&self) -> ThreadState {
        self.state.load()
    }

    /// Updates the thread's scheduling state.
    ///
    /// Moving to `Sleeping` or `Exiting` removes the thread from
    /// the scheduler's queues.
    ///
    /// # Panics
    ///
    /// Panics if changed to `BeingCreated`.
    ///
    pub fn set_state(&self, new_state: ThreadState) {
        self.state.store(new_state);
        match new_state {
            ThreadState::BeingCreated => panic!("thread state set to BeingCreated"),
            ThreadState::Runnable => {}
            ThreadState::Sleeping | ThreadState::Exiting => scheduler::remove(self.id),
        }
    }

    pub(super) fn arch_thread(&self) -> &ArchThread {
        &self.arch
    }
}

/// Puts the current thread to sleep indefinitely and switches to
/// the next runnable thread. The thread can be awoken later by
/// resuming it.
///
/// # Panics
///
/// Panics if called by the idle thread, which must execute
/// indefinitely to manage the CPU.
///
pub fn suspend() {
    let current = scheduler::current_thread().expect("suspend called outside any thread");
    if current.id == ThreadId::IDLE {
        panic!("idle thread tried to suspend");
    }

    current.set_state(ThreadState::Sleeping);
    drop(current);

    scheduler::switch();
}

/// Terminates the current thread and switches to the next runnable
/// thread.
///
/// # Panics
///
/// Panics if called by the idle thread, which must execute
/// indefinitely to manage the CPU.
///
pub fn exit() -> ! {
    let current = scheduler::current_thread().expect("exit called outside any thread");
    if current.id == ThreadId::IDLE {
        panic!("idle thread tried to exit");
    }

    // Leave no window between unscheduling and unpublishing: if we
    // were preempted in between, the thread's table entry would
    // leak.
    without_interrupts(|| {
        current.set_state(ThreadState::Exiting);
        THREADS.lock().remove(&current.id);
        drop(current);
    });

    scheduler::switch();
    unreachable!("exited thread was re-scheduled somehow");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_body() -> ! {
        panic!("test thread bodies never run on the host");
    }

    #[test]
    fn creation_and_state() {
        let id = Thread::create(3, 8192, thread_body).unwrap();
        let thread = THREADS.lock().get(&id).cloned().unwrap();
        assert_eq!(thread.id(), id);
        assert_eq!(thread.priority(), 3);
        assert_eq!(thread.state(), ThreadState::BeingCreated);
        assert!(thread.arch_thread().stack_contains_saved_pointer());

        // Ids are unique and monotonic.
        let other = Thread::create(0, 8192, thread_body).unwrap();
        assert!(id < other);

        thread.set_state(ThreadState::Runnable);
        assert_eq!(thread.state(), ThreadState::Runnable);

        THREADS.lock().remove(&id);
        THREADS.lock().remove(&other);
    }
}
