// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Controls the CPU interrupt flag.
//!
//! Critical sections in the kernel follow one discipline: capture
//! the previous interrupt state, disable interrupts, operate, and
//! restore the previous state on every exit path. The
//! [`without_interrupts`] closure guard packages that discipline;
//! the raw [`disable`]/[`restore`] pair exists for code whose
//! critical section does not nest neatly in a closure.
//!
//! On the kernel target this drives the real `cli`/`sti`
//! instructions. Elsewhere (host builds and tests) a process-global
//! software flag stands in, with identical semantics, so the
//! critical-section discipline remains observable.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod flag {
    /// Returns whether interrupts are enabled.
    ///
    pub fn are_enabled() -> bool {
        let eflags: u32;
        unsafe {
            core::arch::asm!(
                "pushfd",
                "pop {}",
                out(reg) eflags,
                options(nomem, preserves_flags)
            );
        }

        // Bit 9 of EFLAGS is the interrupt flag.
        eflags & (1 << 9) != 0
    }

    pub fn set_enabled(enable: bool) {
        unsafe {
            if enable {
                core::arch::asm!("sti", options(nomem, nostack));
            } else {
                core::arch::asm!("cli", options(nomem, nostack));
            }
        }
    }
}

#[cfg(all(not(all(target_arch = "x86", target_os = "none")), not(test)))]
mod flag {
    use core::sync::atomic::{AtomicBool, Ordering};

    // The software interrupt flag. Hosts have no kernel interrupt
    // flag, so model one; it starts enabled, as the flag is after
    // boot-time initialisation.
    static ENABLED: AtomicBool = AtomicBool::new(true);

    /// Returns whether interrupts are enabled.
    ///
    pub fn are_enabled() -> bool {
        ENABLED.load(Ordering::Acquire)
    }

    pub fn set_enabled(enable: bool) {
        ENABLED.store(enable, Ordering::Release);
    }
}

#[cfg(test)]
mod flag {
    use core::cell::Cell;

    // Under test the flag is per-thread: the harness runs tests
    // concurrently, and each models an independent CPU.
    std::thread_local! {
        static ENABLED: Cell<bool> = Cell::new(true);
    }

    /// Returns whether interrupts are enabled.
    ///
    pub fn are_enabled() -> bool {
        ENABLED.with(Cell::get)
    }

    pub fn set_enabled(enable: bool) {
        ENABLED.with(|flag| flag.set(enable));
    }
}

pub use flag::are_enabled;

/// Disables interrupts, returning whether they were previously
/// enabled.
///
/// Pass the returned state to [`restore`] at the end of the critical
/// section.
///
pub fn disable() -> bool {
    let previous = flag::are_enabled();
    flag::set_enabled(false);

    previous
}

/// Enables interrupts, returning whether they were previously
/// enabled.
///
pub fn enable() -> bool {
    let previous = flag::are_enabled();
    flag::set_enabled(true);

    previous
}

/// Restores the interrupt state previously returned by [`disable`]
/// or [`enable`].
///
pub fn restore(previously_enabled: bool) {
    if previously_enabled {
        flag::set_enabled(true);
    }
}

/// Runs the given closure with interrupts disabled, restoring the
/// previous interrupt state afterwards.
///
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = disable();
    let result = f();
    restore(previous);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_restores_state() {
        // The software flag starts enabled.
        assert!(are_enabled());

        let result = without_interrupts(|| {
            assert!(!are_enabled());
            // Nested critical sections restore to disabled, not
            // enabled.
            without_interrupts(|| assert!(!are_enabled()));
            assert!(!are_enabled());
            42
        });
        assert_eq!(result, 42);
        assert!(are_enabled());

        // The raw pair behaves the same way.
        let previous = disable();
        assert!(previous);
        assert!(!are_enabled());
        let inner = disable();
        assert!(!inner);
        restore(inner);
        assert!(!are_enabled());
        restore(previous);
        assert!(are_enabled());
    }
}
