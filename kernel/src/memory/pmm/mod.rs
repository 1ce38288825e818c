// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical memory management and allocation.
//!
//! The physical memory manager hands out page-aligned runs of
//! physical memory from one or more page pools. The boot code
//! registers a pool for each usable physical range it discovers
//! from the firmware memory map, before any allocator user runs;
//! from then on, [`allocate`] and [`deallocate`] are the only way
//! frames change hands.
//!
//! Allocation asks for a minimum page count and falls back: if no
//! pool holds a contiguous run that long, the longest run anywhere
//! is returned instead and the count is rewritten to its length.
//! Callers that need the exact size treat a shrunk count as failure.
//!
//! # Examples
//!
//! ```no_run
//! # use kernel::memory::pmm;
//! // Allocate a single frame.
//! let mut pages = 1;
//! let base = pmm::allocate(&mut pages).expect("out of physical memory");
//!
//! // Return it.
//! pmm::deallocate(base, 1);
//! ```

use crate::arch::interrupts::without_interrupts;
use lazy_static::lazy_static;
use memlayout::PhysAddr;

mod bitmap;

pub use bitmap::{BitmapFrameAllocator, BitmapPool};

lazy_static! {
    /// The physical memory allocator.
    ///
    /// `ALLOCATOR` starts empty; the boot code populates it with
    /// [`register`], once per physical range in the firmware memory
    /// map.
    ///
    pub static ref ALLOCATOR: spin::Mutex<BitmapFrameAllocator> =
        spin::Mutex::new(BitmapFrameAllocator::empty());
}

/// Registers a pool of physical memory with the allocator.
///
/// # Safety
///
/// The caller must guarantee that the `page_count` pages starting at
/// `base` are unused RAM, and that no range is registered twice.
///
pub unsafe fn register(base: PhysAddr, page_count: usize) {
    without_interrupts(|| {
        ALLOCATOR.lock().register(base, page_count);
    })
}

/// Allocates a contiguous run of at least `*page_count` frames,
/// returning its base address.
///
/// If no pool holds a run that long, the longest free run available
/// is returned and `*page_count` is rewritten to its length. Returns
/// `None` only when no pool has any free page at all.
///
pub fn allocate(page_count: &mut usize) -> Option<PhysAddr> {
    without_interrupts(|| ALLOCATOR.lock().allocate(page_count))
}

/// Returns the previously allocated run of `page_count` frames
/// starting at `base` to its pool.
///
/// # Panics
///
/// Panics if the range is not fully contained in one registered
/// pool, or any of its frames is already free.
///
pub fn deallocate(base: PhysAddr, page_count: usize) {
    without_interrupts(|| ALLOCATOR.lock().deallocate(base, page_count))
}

/// Returns the number of free frames across all pools.
///
pub fn free_frames() -> usize {
    without_interrupts(|| ALLOCATOR.lock().free_frames())
}

/// Prints debug information about the physical memory manager.
///
pub fn debug() {
    without_interrupts(|| ALLOCATOR.lock().debug())
}
