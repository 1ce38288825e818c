// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The MMU contract consumed by the virtual memory manager.
//!
//! The [`Mmu`] trait is the boundary between the portable memory
//! managers and the machine's paging hardware: installing and
//! removing mappings, changing protection bits, translating
//! addresses, and flushing the TLB. The boot code installs the
//! hardware implementation; [`EmulatedMmu`] is the contract's
//! software reference, backing the managers' unit tests and any
//! translation emulation the kernel needs to do itself.
//!
//! The scratch-map slot deserves a note: [`Mmu::scratch_map`] maps a
//! single physical page at the reserved [`SCRATCH_MAP`] address so
//! any code can touch arbitrary physical memory. The slot has one
//! owner at a time; callers must hold interrupts disabled from the
//! map until their last access, as anyone else may remap it.

use crate::memory::MapFlags;
use crate::status::{Error, Result};
use alloc::collections::BTreeMap;
use memlayout::{PhysAddr, VirtAddr, PAGE_SIZE, SCRATCH_MAP};

/// The operations the paging hardware provides to the virtual
/// memory manager.
///
pub trait Mmu {
    /// Maps `pages` pages starting at `virt` to the contiguous
    /// physical region starting at `phys`.
    ///
    /// Fails with [`Error::NoMem`] if a page-table allocation fails.
    ///
    fn map(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        pages: usize,
        flags: MapFlags,
        user_access: bool,
    ) -> Result<()>;

    /// Changes the protection bits of `pages` existing mappings
    /// starting at `virt`, without altering their physical targets.
    ///
    fn remap(&mut self, virt: VirtAddr, pages: usize, flags: MapFlags, user_access: bool)
        -> Result<()>;

    /// Removes the mappings for `pages` pages starting at `virt`.
    ///
    fn unmap(&mut self, virt: VirtAddr, pages: usize) -> Result<()>;

    /// Maps one physical page at the reserved scratch slot,
    /// returning the slot's address.
    ///
    /// The caller must hold interrupts disabled across the map and
    /// every access through it.
    ///
    fn scratch_map(&mut self, phys: PhysAddr, nocache: bool) -> VirtAddr;

    /// Translates a virtual address to the physical address it maps
    /// to, without privilege checks.
    ///
    /// Fails with [`Error::Fault`] if the address is unmapped.
    ///
    fn virt_to_phys(&mut self, virt: VirtAddr) -> Result<PhysAddr>;

    /// Emulates a full linear-to-physical translation, including
    /// permission checks against `flags` and, when `from_user`, the
    /// user-access bit.
    ///
    /// Fails with [`Error::Fault`] for unmapped or forbidden
    /// accesses.
    ///
    fn emulate(&mut self, virt: VirtAddr, flags: MapFlags, from_user: bool) -> Result<PhysAddr>;

    /// Flushes the TLB entry for one virtual address on the local
    /// CPU.
    ///
    fn flush_tlb_for(&mut self, virt: VirtAddr);

    /// Flushes the local CPU's entire TLB.
    ///
    fn flush_tlb(&mut self);
}

/// One installed page mapping in the emulated MMU.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EmulatedMapping {
    pub phys: PhysAddr,
    pub flags: MapFlags,
    pub user_access: bool,
}

/// A software page table implementing the [`Mmu`] contract.
///
/// This is the contract's reference implementation: it tracks
/// mappings in an ordinary map, enforces the same preconditions the
/// hardware walker does, and counts TLB flushes so tests can assert
/// on them.
///
#[derive(Debug, Default)]
pub struct EmulatedMmu {
    mappings: BTreeMap<usize, EmulatedMapping>,
    scratch: Option<EmulatedMapping>,
    flushes: u64,
}

impl EmulatedMmu {
    /// Returns an empty software MMU with no mappings installed.
    ///
    pub fn new() -> Self {
        EmulatedMmu::default()
    }

    /// Returns the mapping installed for the page containing `virt`,
    /// or `None`.
    ///
    pub fn mapping_for(&self, virt: VirtAddr) -> Option<EmulatedMapping> {
        self.mappings
            .get(&virt.align_down(PAGE_SIZE).as_usize())
            .copied()
    }

    /// Returns the number of pages currently mapped, not counting
    /// the scratch slot.
    ///
    pub fn mapped_pages(&self) -> usize {
        self.mappings.len()
    }

    /// Returns the number of TLB flushes performed, counting a full
    /// flush as one.
    ///
    pub fn tlb_flushes(&self) -> u64 {
        self.flushes
    }
}

impl Mmu for EmulatedMmu {
    fn map(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        pages: usize,
        flags: MapFlags,
        user_access: bool,
    ) -> Result<()> {
        if !virt.is_aligned(PAGE_SIZE) || !phys.is_aligned(PAGE_SIZE) {
            return Err(Error::Inval);
        }
        for page in 0..pages {
            let mapping = EmulatedMapping {
                phys: phys + page * PAGE_SIZE,
                flags,
                user_access,
            };
            self.mappings
                .insert(virt.as_usize() + page * PAGE_SIZE, mapping);
        }

        Ok(())
    }

    fn remap(
        &mut self,
        virt: VirtAddr,
        pages: usize,
        flags: MapFlags,
        user_access: bool,
    ) -> Result<()> {
        if !virt.is_aligned(PAGE_SIZE) {
            return Err(Error::Inval);
        }
        for page in 0..pages {
            let mapping = self
                .mappings
                .get_mut(&(virt.as_usize() + page * PAGE_SIZE))
                .ok_or(Error::Fault)?;
            mapping.flags = flags;
            mapping.user_access = user_access;
        }

        Ok(())
    }

    fn unmap(&mut self, virt: VirtAddr, pages: usize) -> Result<()> {
        if !virt.is_aligned(PAGE_SIZE) {
            return Err(Error::Inval);
        }
        for page in 0..pages {
            self.mappings.remove(&(virt.as_usize() + page * PAGE_SIZE));
        }

        Ok(())
    }

    fn scratch_map(&mut self, phys: PhysAddr, nocache: bool) -> VirtAddr {
        let mut flags = MapFlags::READ | MapFlags::WRITE;
        if nocache {
            flags |= MapFlags::NOCACHE;
        }
        self.scratch = Some(EmulatedMapping {
            phys: phys.align_down(PAGE_SIZE),
            flags,
            user_access: false,
        });
        self.flushes += 1;

        SCRATCH_MAP.start()
    }

    fn virt_to_phys(&mut self, virt: VirtAddr) -> Result<PhysAddr> {
        let offset = virt.as_usize() % PAGE_SIZE;
        let mapping = if SCRATCH_MAP.contains(virt) {
            self.scratch.ok_or(Error::Fault)?
        } else {
            self.mapping_for(virt).ok_or(Error::Fault)?
        };

        Ok(mapping.phys + offset)
    }

    fn emulate(&mut self, virt: VirtAddr, flags: MapFlags, from_user: bool) -> Result<PhysAddr> {
        let mapping = if SCRATCH_MAP.contains(virt) {
            self.scratch.ok_or(Error::Fault)?
        } else {
            self.mapping_for(virt).ok_or(Error::Fault)?
        };
        if !mapping.flags.contains(flags & (MapFlags::READ | MapFlags::WRITE | MapFlags::EXEC)) {
            return Err(Error::Fault);
        }
        if from_user && !mapping.user_access {
            return Err(Error::Fault);
        }

        Ok(mapping.phys + virt.as_usize() % PAGE_SIZE)
    }

    fn flush_tlb_for(&mut self, _virt: VirtAddr) {
        self.flushes += 1;
    }

    fn flush_tlb(&mut self) {
        self.flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_translate_unmap() {
        let mut mmu = EmulatedMmu::new();
        let virt = VirtAddr::new(0xc040_0000);
        let phys = PhysAddr::new(0x20_0000);
        mmu.map(virt, phys, 2, MapFlags::READ | MapFlags::WRITE, false).unwrap();
        assert_eq!(mmu.mapped_pages(), 2);

        assert_eq!(mmu.virt_to_phys(virt + 0x123).unwrap(), phys + 0x123);
        assert_eq!(mmu.virt_to_phys(virt + PAGE_SIZE).unwrap(), phys + PAGE_SIZE);
        assert_eq!(mmu.virt_to_phys(virt + 2 * PAGE_SIZE), Err(Error::Fault));

        mmu.unmap(virt, 1).unwrap();
        assert_eq!(mmu.virt_to_phys(virt), Err(Error::Fault));
        assert_eq!(mmu.virt_to_phys(virt + PAGE_SIZE).unwrap(), phys + PAGE_SIZE);
    }

    #[test]
    fn emulate_checks_permissions() {
        let mut mmu = EmulatedMmu::new();
        let virt = VirtAddr::new(0xc040_0000);
        let phys = PhysAddr::new(0x30_0000);
        mmu.map(virt, phys, 1, MapFlags::READ, false).unwrap();

        assert_eq!(mmu.emulate(virt, MapFlags::READ, false).unwrap(), phys);
        assert_eq!(mmu.emulate(virt, MapFlags::WRITE, false), Err(Error::Fault));
        // Kernel-only page rejects user access.
        assert_eq!(mmu.emulate(virt, MapFlags::READ, true), Err(Error::Fault));

        mmu.remap(virt, 1, MapFlags::READ | MapFlags::WRITE, true).unwrap();
        assert_eq!(mmu.emulate(virt, MapFlags::WRITE, true).unwrap(), phys);
    }

    #[test]
    fn scratch_slot() {
        let mut mmu = EmulatedMmu::new();
        let phys = PhysAddr::new(0x7000);
        let slot = mmu.scratch_map(phys, false);
        assert_eq!(slot, SCRATCH_MAP.start());
        assert_eq!(mmu.virt_to_phys(slot + 0x10).unwrap(), phys + 0x10);

        // Remapping replaces the single slot.
        mmu.scratch_map(PhysAddr::new(0x9000), true);
        assert_eq!(mmu.virt_to_phys(slot).unwrap(), PhysAddr::new(0x9000));
    }

    #[test]
    fn misaligned_arguments_are_rejected() {
        let mut mmu = EmulatedMmu::new();
        let err = mmu.map(
            VirtAddr::new(0xc040_0800),
            PhysAddr::new(0x1000),
            1,
            MapFlags::READ,
            false,
        );
        assert_eq!(err, Err(Error::Inval));
    }
}
