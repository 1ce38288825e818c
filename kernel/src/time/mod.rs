// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Tracks the passage of time in timer ticks.
//!
//! The timer interrupt advances a monotonic tick counter and, once
//! the scheduler owns the flow of execution, preempts the running
//! thread. Timeouts elsewhere in the kernel are expressed in these
//! ticks.

use crate::arch::TrapFrame;
use crate::multitasking::scheduler;
use crate::status::Result;
use core::sync::atomic::{AtomicU64, Ordering};

/// A duration or instant measured in timer ticks.
///
pub type Ticks = u64;

/// TICKER counts timer interrupts since boot.
///
static TICKER: AtomicU64 = AtomicU64::new(0);

/// Returns the number of ticks since boot.
///
pub fn current_ticks() -> Ticks {
    TICKER.load(Ordering::Acquire)
}

/// Advances the tick counter by one, returning the new count.
///
/// Called from the timer interrupt handler; callable elsewhere only
/// to simulate time.
///
pub fn tick() -> Ticks {
    TICKER.fetch_add(1, Ordering::AcqRel) + 1
}

/// Registers the timer handler on the given trap vector.
///
/// Every firing advances the tick counter; once the scheduler has
/// been started, it also preempts the running thread.
///
pub fn init(vector: usize) -> Result<()> {
    crate::interrupts::register(vector, timer_interrupt, 0)
}

fn timer_interrupt(_trapnum: usize, _frame: *mut TrapFrame, _data: usize) {
    tick();
    if scheduler::ready() {
        scheduler::switch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::interrupts::without_interrupts;

    #[test]
    fn ticks_are_monotonic() {
        let before = current_ticks();
        let after = tick();
        assert!(after > before);
        assert!(current_ticks() >= after);
    }

    #[test]
    fn timer_trap_advances_the_clock() {
        init(72).unwrap();
        let before = current_ticks();
        without_interrupts(|| crate::interrupts::trap(72, core::ptr::null_mut()));
        assert!(current_ticks() > before);
    }
}
