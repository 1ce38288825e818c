// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical and virtual memory management.
//!
//! Physical page frames are minted by the physical memory manager
//! ([`pmm`]); the virtual memory manager ([`vmm`]) carves virtual
//! ranges out of address spaces and binds them either to frames it
//! allocates lazily or to caller-supplied physical bases, committing
//! the mappings through the architecture's MMU.

use bitflags::bitflags;

pub mod pmm;
pub mod vmm;

pub use memlayout::{
    PhysAddr, PhysFrame, PhysFrameRange, VirtAddr, VirtAddrRange, VirtPage, KERNEL_IMAGE,
    KERNEL_VM, PAGE_SIZE, SCRATCH_MAP,
};

bitflags! {
    /// The protection applied to a virtual memory mapping.
    ///
    pub struct MapFlags: u8 {
        /// The mapping can be read.
        const READ = 1 << 0;

        /// The mapping can be written.
        const WRITE = 1 << 1;

        /// The mapping can be executed.
        const EXEC = 1 << 2;

        /// Accesses through the mapping bypass the cache, for
        /// memory-mapped I/O.
        const NOCACHE = 1 << 3;
    }
}
