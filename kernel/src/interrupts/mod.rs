// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Dispatches hardware traps to dynamically registered handlers.
//!
//! The architecture's trap stubs funnel every exception and external
//! IRQ that is not claimed by a lower-level driver into [`trap`],
//! which walks the chain of handlers registered for that vector.
//!
//! Handler records are protected by a checksum over all of their
//! fields, including the chain links. The checksum is a
//! memory-corruption canary, not cryptography: kernel data has no
//! hardware protection against wild writes, so before a callback is
//! invoked its record's checksum is recomputed, and a mismatching
//! record is reported and skipped without ever being called. Registering a
//! handler refreshes the checksums of its neighbours in the chain,
//! whose link fields just changed.
//!
//! Handlers must not register further handlers from within dispatch.

use crate::arch::{interrupts, TrapFrame, TRAP_COUNT};
use crate::println;
use crate::status::{Error, Result};
use alloc::vec::Vec;
use lazy_static::lazy_static;

/// A trap handler callback: the trap number, the trap frame, and
/// the opaque word supplied at registration.
///
pub type TrapCallback = fn(trapnum: usize, frame: *mut TrapFrame, data: usize);

// No link: the end of a chain, or an unlinked record.
const NO_SLOT: i32 = -1;

// One registered handler. The record's slot in the arena never
// changes, so the prev/next slot indices work like the embedded
// list pointers they replace, and take part in the checksum the
// same way.
//
#[derive(Debug)]
struct TrapHandler {
    callback: TrapCallback,
    data: usize,
    prev: i32,
    next: i32,
    checksum: u32,
}

impl TrapHandler {
    // Sums the record's fields as 32-bit words, with the checksum
    // field taken as zero, and subtracts from all-ones.
    //
    fn compute_checksum(&self) -> u32 {
        let mut sum = sum_halves(self.callback as usize as u64);
        sum = sum.wrapping_add(sum_halves(self.data as u64));
        sum = sum.wrapping_add(self.prev as u32);
        sum = sum.wrapping_add(self.next as u32);

        u32::MAX.wrapping_sub(sum)
    }
}

fn sum_halves(value: u64) -> u32 {
    (value as u32).wrapping_add((value >> 32) as u32)
}

// The handler chain for one trap vector: an arena of records plus
// head/tail slot indices.
//
#[derive(Debug)]
struct TrapChain {
    slots: Vec<TrapHandler>,
    head: i32,
    tail: i32,
}

impl TrapChain {
    const fn new() -> Self {
        TrapChain {
            slots: Vec::new(),
            head: NO_SLOT,
            tail: NO_SLOT,
        }
    }
}

/// The table of handler chains, one per trap vector.
///
pub struct TrapManager {
    chains: Vec<TrapChain>,
}

impl TrapManager {
    /// Returns a manager with an empty chain for every vector.
    ///
    pub fn new() -> Self {
        let mut chains = Vec::with_capacity(TRAP_COUNT);
        chains.resize_with(TRAP_COUNT, TrapChain::new);

        TrapManager { chains }
    }

    /// Appends a handler to the chain for `trapnum`.
    ///
    /// Fails with [`Error::Inval`] for an out-of-range vector.
    ///
    pub fn register(&mut self, trapnum: usize, callback: TrapCallback, data: usize) -> Result<()> {
        let chain = self.chains.get_mut(trapnum).ok_or(Error::Inval)?;

        let slot = chain.slots.len() as i32;
        let mut handler = TrapHandler {
            callback,
            data,
            prev: chain.tail,
            next: NO_SLOT,
            checksum: 0,
        };
        handler.checksum = handler.compute_checksum();
        chain.slots.push(handler);

        if chain.head == NO_SLOT {
            chain.head = slot;
        }
        if chain.tail != NO_SLOT {
            // The old tail's next link just changed, so its
            // checksum must be refreshed too.
            let old_tail = &mut chain.slots[chain.tail as usize];
            old_tail.next = slot;
            old_tail.checksum = old_tail.compute_checksum();
        }
        chain.tail = slot;

        Ok(())
    }

    /// Dispatches a trap to every registered handler for `trapnum`,
    /// in registration order.
    ///
    /// A handler whose record fails its checksum is reported and
    /// skipped; its callback is never invoked. Out-of-range vectors
    /// and vectors with no handlers are reported and otherwise
    /// ignored.
    ///
    pub fn trap(&self, trapnum: usize, frame: *mut TrapFrame) {
        let chain = match self.chains.get(trapnum) {
            Some(chain) => chain,
            None => {
                println!(
                    "trap {} is outside of valid trap range (0-{})",
                    trapnum,
                    TRAP_COUNT - 1
                );
                return;
            }
        };
        if chain.head == NO_SLOT {
            println!("no trap handler registered for trap {}", trapnum);
            return;
        }

        let mut slot = chain.head;
        while slot != NO_SLOT {
            let handler = &chain.slots[slot as usize];
            let expected = handler.compute_checksum();
            let got = handler.checksum;
            if expected != got {
                println!(
                    "bad trap handler checksum in trap {}: expected {:#x}, got {:#x}",
                    trapnum, expected, got
                );
            } else {
                (handler.callback)(trapnum, frame, handler.data);
            }
            slot = chain.slots[slot as usize].next;
        }
    }
}

impl Default for TrapManager {
    fn default() -> Self {
        TrapManager::new()
    }
}

lazy_static! {
    /// The kernel's trap manager.
    ///
    static ref TRAPS: spin::Mutex<TrapManager> = spin::Mutex::new(TrapManager::new());
}

/// Appends a handler to the chain for `trapnum` on the kernel's
/// trap manager.
///
pub fn register(trapnum: usize, callback: TrapCallback, data: usize) -> Result<()> {
    interrupts::without_interrupts(|| TRAPS.lock().register(trapnum, callback, data))
}

/// Dispatches a trap on the kernel's trap manager.
///
/// Must be called with interrupts disabled; the architecture's trap
/// stubs arrive that way.
///
pub fn trap(trapnum: usize, frame: *mut TrapFrame) {
    assert!(
        !interrupts::are_enabled(),
        "trap dispatched with interrupts enabled"
    );
    TRAPS.lock().trap(trapnum, frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;
    use spin::Mutex;

    // Each test records into its own log, keyed by the opaque data
    // word, so concurrently running tests cannot interfere.
    macro_rules! recorder {
        ($log:ident, $callback:ident) => {
            static $log: Mutex<Vec<usize>> = Mutex::new(Vec::new());

            fn $callback(_trapnum: usize, _frame: *mut TrapFrame, data: usize) {
                $log.lock().push(data);
            }
        };
    }

    #[test]
    fn handlers_run_in_registration_order() {
        recorder!(LOG, callback);

        let mut manager = TrapManager::new();
        manager.register(14, callback, 101).unwrap();
        manager.register(14, callback, 102).unwrap();
        manager.register(14, callback, 103).unwrap();
        manager.register(3, callback, 900).unwrap();

        manager.trap(14, ptr::null_mut());
        assert_eq!(*LOG.lock(), alloc::vec![101, 102, 103]);

        manager.trap(3, ptr::null_mut());
        assert_eq!(*LOG.lock(), alloc::vec![101, 102, 103, 900]);

        // Unhandled and out-of-range vectors are ignored.
        manager.trap(200, ptr::null_mut());
        manager.trap(4096, ptr::null_mut());
        assert_eq!(LOG.lock().len(), 4);
    }

    #[test]
    fn tampered_handler_is_never_called() {
        recorder!(LOG, callback);

        // Scenario S3: three handlers on vector 14; corrupting the
        // middle one's data out-of-band must suppress it without
        // affecting its neighbours.
        let mut manager = TrapManager::new();
        manager.register(14, callback, 201).unwrap();
        manager.register(14, callback, 202).unwrap();
        manager.register(14, callback, 203).unwrap();

        manager.trap(14, ptr::null_mut());
        assert_eq!(*LOG.lock(), alloc::vec![201, 202, 203]);

        // Corrupt H2's payload without refreshing its checksum.
        manager.chains[14].slots[1].data = 0xdead;

        manager.trap(14, ptr::null_mut());
        assert_eq!(*LOG.lock(), alloc::vec![201, 202, 203, 201, 203]);
    }

    #[test]
    fn registration_refreshes_neighbour_checksums() {
        recorder!(LOG, callback);

        let mut manager = TrapManager::new();
        manager.register(32, callback, 1).unwrap();

        // Registering a second handler rewrites the first record's
        // next link; its checksum must still verify afterwards.
        manager.register(32, callback, 2).unwrap();
        for handler in manager.chains[32].slots.iter() {
            assert_eq!(handler.checksum, handler.compute_checksum());
        }

        manager.trap(32, ptr::null_mut());
        assert_eq!(*LOG.lock(), alloc::vec![1, 2]);
    }

    #[test]
    fn global_dispatch_requires_interrupts_disabled() {
        recorder!(LOG, callback);

        register(40, callback, 777).unwrap();
        interrupts::without_interrupts(|| trap(40, ptr::null_mut()));
        assert_eq!(*LOG.lock(), alloc::vec![777]);
    }
}
