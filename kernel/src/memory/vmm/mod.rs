// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Virtual memory management and allocation.
//!
//! The virtual memory manager layers address-space bookkeeping on
//! top of the architecture's MMU. Each [`AddressSpace`] tracks the
//! free regions of its window in a tree keyed by size and the
//! allocated ranges as explicit virtual memory objects. An object is
//! either bound to caller-supplied physical memory (a framebuffer, a
//! device BAR) and mapped eagerly, or left to the manager to back
//! with physical frames; in that case no frame is consumed until a
//! page fault lands in the object, and commitment is strictly
//! page-by-page.
//!
//! This module owns the kernel's address space and the installed MMU
//! and exposes the kernel-facing wrappers; the mechanics live in
//! [`AddressSpace`], which takes its dependencies explicitly so the
//! managers can be exercised without the globals.

use crate::arch::interrupts::without_interrupts;
use crate::arch::mmu::Mmu;
use crate::arch::TrapFrame;
use crate::memory::{pmm, MapFlags, VirtAddr, KERNEL_VM};
use crate::status::{Error, Result};
use alloc::boxed::Box;
use lazy_static::lazy_static;

mod address_space;

pub use address_space::{AddressSpace, Backing, VmObject};

lazy_static! {
    /// The kernel's address space, covering [`KERNEL_VM`].
    ///
    pub static ref KERNEL_ADDRESS_SPACE: spin::Mutex<AddressSpace> =
        spin::Mutex::new(AddressSpace::new(KERNEL_VM.start(), KERNEL_VM.end(), false));
}

/// The installed MMU implementation.
///
/// Boot code installs the hardware's implementation with [`init`]
/// before the first mapping is made.
///
static MMU: spin::Mutex<Option<Box<dyn Mmu + Send>>> = spin::Mutex::new(None);

/// Installs the MMU implementation the manager commits mappings
/// through.
///
pub fn init(mmu: Box<dyn Mmu + Send>) {
    *MMU.lock() = Some(mmu);
}

/// Returns the kernel's address space.
///
pub fn kernel_address_space() -> &'static spin::Mutex<AddressSpace> {
    &KERNEL_ADDRESS_SPACE
}

/// Returns the address space governing the given virtual address,
/// or `None` if the address is in a kernel region deliberately not
/// managed by the virtual memory manager (the identity-mapped
/// kernel image and the scratch slot).
///
pub fn address_space_for(addr: VirtAddr) -> Option<&'static spin::Mutex<AddressSpace>> {
    if KERNEL_VM.contains(addr) {
        Some(&KERNEL_ADDRESS_SPACE)
    } else {
        None
    }
}

/// Allocates `size` bytes of lazily backed kernel virtual memory.
///
/// No physical frames are consumed until the memory is touched.
///
pub fn alloc(size: usize, flags: MapFlags) -> Result<VirtAddr> {
    without_interrupts(|| {
        let range = KERNEL_ADDRESS_SPACE.lock().alloc(size, flags)?;
        Ok(range.start())
    })
}

/// Maps `size` bytes of existing physical memory into the kernel's
/// address space with read/write access, returning the chosen
/// virtual address.
///
/// This is the quick way to reach physical memory that is not the
/// manager's to own, such as a framebuffer.
///
pub fn ezmap(phys: crate::memory::PhysAddr, size: usize) -> Result<VirtAddr> {
    without_interrupts(|| {
        let mut mmu = MMU.lock();
        let mmu = mmu.as_mut().ok_or(Error::NoDev)?;
        let range = KERNEL_ADDRESS_SPACE.lock().map(
            phys,
            size,
            MapFlags::READ | MapFlags::WRITE,
            mmu.as_mut(),
        )?;
        Ok(range.start())
    })
}

/// Releases the kernel virtual memory object starting at `addr`,
/// returning any manager-owned frames to the physical memory
/// manager.
///
pub fn free(addr: VirtAddr) -> Result<()> {
    without_interrupts(|| {
        let mut mmu = MMU.lock();
        let mmu = mmu.as_mut().ok_or(Error::NoDev)?;
        KERNEL_ADDRESS_SPACE
            .lock()
            .free(addr, &mut pmm::ALLOCATOR.lock(), mmu.as_mut())
    })
}

/// Resolves a CPU page fault.
///
/// Called by the architecture's trap stub with the faulting address
/// and the fault's cause bits.
///
/// # Panics
///
/// Panics if the fault lies in a region no address space manages
/// (a wild access to the identity-mapped kernel image), or if the
/// fault cannot be resolved. Both are fatal kernel bugs.
///
pub fn page_fault(
    addr: VirtAddr,
    was_present: bool,
    was_write: bool,
    was_user: bool,
    _frame: *mut TrapFrame,
) {
    let space = match address_space_for(addr) {
        Some(space) => space,
        None => panic!("page fault at {} outside any managed address space", addr),
    };

    without_interrupts(|| {
        let mut mmu = MMU.lock();
        let mmu = mmu
            .as_mut()
            .expect("page fault before an MMU implementation was installed");
        let result = space.lock().handle_fault(
            addr,
            was_present,
            was_write,
            was_user,
            &mut pmm::ALLOCATOR.lock(),
            mmu.as_mut(),
        );
        if let Err(error) = result {
            // Terminating the offending user process belongs to the
            // process layer; with only the kernel in play, an
            // unresolvable fault is fatal.
            panic!("unresolvable page fault at {}: {}", addr, error);
        }
    })
}
