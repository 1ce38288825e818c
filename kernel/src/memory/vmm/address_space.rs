// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Address spaces and the virtual memory objects within them.

use crate::arch::mmu::Mmu;
use crate::memory::pmm::BitmapFrameAllocator;
use crate::memory::{MapFlags, PhysAddr, VirtAddr, VirtAddrRange, PAGE_SIZE};
use crate::status::{Error, Result};
use align::size_to_blocks;
use alloc::vec::Vec;
use avl_tree::AvlTree;
use bitmap_index::Bitmap;

/// The physical backing of a virtual memory object.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backing {
    /// The manager owns the backing and allocates physical frames
    /// page-by-page as faults arrive.
    Frames,

    /// The object maps existing physical memory starting at the
    /// given base; the frames are not the manager's to allocate or
    /// free.
    Direct(PhysAddr),
}

/// A contiguous range of virtual memory belonging to one address
/// space.
///
#[derive(Debug)]
pub struct VmObject {
    range: VirtAddrRange,
    flags: MapFlags,
    backing: Backing,

    // committed tracks, per page, whether a mapping has been
    // installed. Directly backed objects are fully committed at
    // creation.
    committed: Bitmap,
}

impl VmObject {
    /// Returns the object's virtual address range.
    ///
    pub fn range(&self) -> VirtAddrRange {
        self.range
    }

    /// Returns the object's protection flags.
    ///
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// Returns the object's physical backing.
    ///
    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Returns the number of pages with an installed mapping.
    ///
    pub fn committed_pages(&self) -> usize {
        self.committed.num_set()
    }

    fn page_index(&self, addr: VirtAddr) -> usize {
        (addr.align_down(PAGE_SIZE) - self.range.start()) / PAGE_SIZE
    }
}

// A group of free regions sharing one size. The size in pages is
// the node's key in the tree.
//
#[derive(Debug)]
struct RegionGroup {
    // The start address of each free region in the group.
    regions: Vec<VirtAddr>,
}

/// An ownership domain for virtual memory: a window of address
/// space, the free regions remaining in it, and the objects carved
/// out of it.
///
/// The free regions are indexed by size so allocation can take the
/// best (smallest sufficient) fit; they are kept maximal, with
/// adjacent regions merged on free, so together with the objects
/// they exactly tile the window.
///
pub struct AddressSpace {
    window: VirtAddrRange,
    is_user: bool,

    // Free regions grouped by size in pages.
    free_groups: AvlTree<RegionGroup>,

    // Every object in the space, committed or not.
    objects: Vec<VmObject>,
}

impl AddressSpace {
    /// Returns a new address space managing `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are not page-aligned or the window is
    /// empty.
    ///
    pub fn new(start: VirtAddr, end: VirtAddr, is_user: bool) -> AddressSpace {
        if !start.is_aligned(PAGE_SIZE) || !end.is_aligned(PAGE_SIZE) {
            panic!("address space bounds {}-{} are not page-aligned", start, end);
        }
        let window = VirtAddrRange::new(start, end);
        if window.size() == 0 {
            panic!("address space {}-{} is empty", start, end);
        }

        let mut space = AddressSpace {
            window,
            is_user,
            free_groups: AvlTree::new(),
            objects: Vec::new(),
        };
        space.insert_free_region(start, window.size_in_pages());

        space
    }

    /// Returns the window this space manages.
    ///
    pub fn window(&self) -> VirtAddrRange {
        self.window
    }

    /// Returns whether this is a userspace address space.
    ///
    pub fn is_user(&self) -> bool {
        self.is_user
    }

    /// Returns the object containing the given address, or `None`.
    ///
    pub fn object_at(&self, addr: VirtAddr) -> Option<&VmObject> {
        self.objects.iter().find(|object| object.range.contains(addr))
    }

    /// Releases every object and its manager-owned frames.
    ///
    /// The space is left with its whole window free.
    ///
    pub fn clear(&mut self, pmm: &mut BitmapFrameAllocator, mmu: &mut dyn Mmu) -> Result<()> {
        while let Some(object) = self.objects.first() {
            let start = object.range.start();
            self.free(start, pmm, mmu)?;
        }

        Ok(())
    }

    /// Allocates `size` bytes (rounded up to whole pages) anywhere
    /// in the space.
    ///
    /// The object's backing is left to the manager: no physical
    /// frames are reserved, and a page fault in the range
    /// materialises them one page at a time.
    ///
    pub fn alloc(&mut self, size: usize, flags: MapFlags) -> Result<VirtAddrRange> {
        let pages = size_in_pages(size)?;
        let start = self.take_best_fit(pages)?;
        let range = range_for(start, pages);
        self.objects.push(VmObject {
            range,
            flags,
            backing: Backing::Frames,
            committed: Bitmap::new_unset(pages),
        });

        Ok(range)
    }

    /// Allocates `size` bytes (rounded up to whole pages) at the
    /// caller-chosen base address.
    ///
    /// Fails with [`Error::Inval`] if the range is misaligned,
    /// escapes the window, or overlaps an existing object.
    ///
    pub fn alloc_at(
        &mut self,
        virt_base: VirtAddr,
        size: usize,
        flags: MapFlags,
    ) -> Result<VirtAddrRange> {
        let pages = size_in_pages(size)?;
        let range = range_for(virt_base, pages);
        self.take_exact(range)?;
        self.objects.push(VmObject {
            range,
            flags,
            backing: Backing::Frames,
            committed: Bitmap::new_unset(pages),
        });

        Ok(range)
    }

    /// Creates an object backed by caller-supplied physical memory
    /// anywhere in the space, installing the mapping immediately.
    ///
    pub fn alloc_object(
        &mut self,
        physical_base: PhysAddr,
        size: usize,
        flags: MapFlags,
        mmu: &mut dyn Mmu,
    ) -> Result<VirtAddrRange> {
        let pages = size_in_pages(size)?;
        let start = self.take_best_fit(pages)?;
        self.place_direct(start, physical_base, pages, flags, mmu)
    }

    /// Creates an object backed by caller-supplied physical memory
    /// at the caller-chosen base address, installing the mapping
    /// immediately.
    ///
    pub fn alloc_object_at(
        &mut self,
        virt_base: VirtAddr,
        physical_base: PhysAddr,
        size: usize,
        flags: MapFlags,
        mmu: &mut dyn Mmu,
    ) -> Result<VirtAddrRange> {
        let pages = size_in_pages(size)?;
        self.take_exact(range_for(virt_base, pages))?;
        self.place_direct(virt_base, physical_base, pages, flags, mmu)
    }

    /// Maps existing physical memory anywhere in the space.
    ///
    /// Identical to [`alloc_object`](Self::alloc_object); the name
    /// marks call sites mapping memory the kernel does not own,
    /// such as identity-mapped MMIO.
    ///
    pub fn map(
        &mut self,
        physical_base: PhysAddr,
        size: usize,
        flags: MapFlags,
        mmu: &mut dyn Mmu,
    ) -> Result<VirtAddrRange> {
        self.alloc_object(physical_base, size, flags, mmu)
    }

    /// Maps existing physical memory at the caller-chosen base.
    ///
    /// Identical to [`alloc_object_at`](Self::alloc_object_at); see
    /// [`map`](Self::map).
    ///
    pub fn map_at(
        &mut self,
        virt_base: VirtAddr,
        physical_base: PhysAddr,
        size: usize,
        flags: MapFlags,
        mmu: &mut dyn Mmu,
    ) -> Result<VirtAddrRange> {
        self.alloc_object_at(virt_base, physical_base, size, flags, mmu)
    }

    /// Releases the object whose range starts at `start`: unmaps its
    /// pages, returns manager-owned frames to the physical memory
    /// manager, and merges the range back into the free regions.
    ///
    pub fn free(
        &mut self,
        start: VirtAddr,
        pmm: &mut BitmapFrameAllocator,
        mmu: &mut dyn Mmu,
    ) -> Result<()> {
        let index = self
            .objects
            .iter()
            .position(|object| object.range.start() == start)
            .ok_or(Error::NoEnt)?;
        let object = self.objects.remove(index);
        let pages = object.range.size_in_pages();

        match object.backing {
            Backing::Direct(_) => {
                mmu.unmap(object.range.start(), pages)?;
            }
            Backing::Frames => {
                // Only committed pages have mappings, and each owns
                // the frame behind it.
                for page in 0..pages {
                    if !object.committed.get(page) {
                        continue;
                    }
                    let addr = object.range.start() + page * PAGE_SIZE;
                    let phys = mmu.virt_to_phys(addr)?;
                    mmu.unmap(addr, 1)?;
                    pmm.deallocate(phys, 1);
                }
            }
        }
        for page in 0..pages {
            mmu.flush_tlb_for(object.range.start() + page * PAGE_SIZE);
        }

        self.release_range(object.range.start(), pages);

        Ok(())
    }

    /// Resolves a page fault at `addr` within this space.
    ///
    /// Rejects protection violations with [`Error::Perm`]; faults
    /// landing outside any object fail with [`Error::Fault`]. A
    /// non-present fault in a manager-backed object commits exactly
    /// one frame, mapped with the object's protection flags.
    ///
    pub fn handle_fault(
        &mut self,
        addr: VirtAddr,
        was_present: bool,
        was_write: bool,
        was_user: bool,
        pmm: &mut BitmapFrameAllocator,
        mmu: &mut dyn Mmu,
    ) -> Result<()> {
        let is_user_space = self.is_user;
        let object = match self.objects.iter_mut().find(|object| object.range.contains(addr)) {
            Some(object) => object,
            None => return Err(Error::Fault),
        };

        if was_write && !object.flags.contains(MapFlags::WRITE) {
            return Err(Error::Perm);
        }
        if was_user && !is_user_space {
            return Err(Error::Perm);
        }

        if !was_present && object.backing == Backing::Frames {
            let page = object.page_index(addr);
            if !object.committed.get(page) {
                // Commit exactly one page; siblings fault for
                // themselves.
                let mut count = 1;
                let frame = pmm.allocate(&mut count).ok_or(Error::NoMem)?;
                let page_addr = addr.align_down(PAGE_SIZE);
                if let Err(error) = mmu.map(page_addr, frame, 1, object.flags, is_user_space) {
                    pmm.deallocate(frame, 1);
                    return Err(error);
                }
                object.committed.set(page);
            }
        }

        mmu.flush_tlb_for(addr);

        Ok(())
    }

    // Takes the start of a best-fit free region for `pages` pages,
    // reinserting any remainder.
    //
    fn take_best_fit(&mut self, pages: usize) -> Result<VirtAddr> {
        let node = self.free_groups.ceiling(pages as i64).ok_or(Error::NoMem)?;
        let region_pages = self.free_groups.key(node) as usize;
        let group = self.free_groups.value_mut(node);
        let start = group.regions.pop().expect("free-region groups are never empty");
        if group.regions.is_empty() {
            self.free_groups.remove(node);
        }

        if region_pages > pages {
            self.insert_free_region(start + pages * PAGE_SIZE, region_pages - pages);
        }

        Ok(start)
    }

    // Takes exactly `range` out of the free regions.
    //
    // Fails with `Inval` if the range is not wholly free: because
    // free regions are kept maximal, a valid range lies inside a
    // single region.
    //
    fn take_exact(&mut self, range: VirtAddrRange) -> Result<()> {
        if !range.start().is_aligned(PAGE_SIZE) {
            return Err(Error::Inval);
        }
        if !self.window.contains_range(&range) {
            return Err(Error::Inval);
        }
        if self.objects.iter().any(|object| object.range.overlaps(&range)) {
            return Err(Error::Inval);
        }

        let (region_start, region_pages) = self
            .remove_free_region_containing(&range)
            .ok_or(Error::Inval)?;

        // Give back what the range does not use, on either side.
        let leading = (range.start() - region_start) / PAGE_SIZE;
        if leading > 0 {
            self.insert_free_region(region_start, leading);
        }
        let trailing = region_pages - leading - range.size_in_pages();
        if trailing > 0 {
            self.insert_free_region(range.end(), trailing);
        }

        Ok(())
    }

    // Creates and maps a directly backed object at `start`, undoing
    // the free-region reservation if the mapping fails.
    //
    fn place_direct(
        &mut self,
        start: VirtAddr,
        physical_base: PhysAddr,
        pages: usize,
        flags: MapFlags,
        mmu: &mut dyn Mmu,
    ) -> Result<VirtAddrRange> {
        let range = range_for(start, pages);
        if let Err(error) = mmu.map(start, physical_base, pages, flags, self.is_user) {
            self.release_range(start, pages);
            return Err(error);
        }

        let mut committed = Bitmap::new_unset(pages);
        committed.set_range(0, pages);
        self.objects.push(VmObject {
            range,
            flags,
            backing: Backing::Direct(physical_base),
            committed,
        });

        Ok(range)
    }

    // Returns `pages` pages starting at `start` to the free
    // regions, merging with any adjacent region on either side to
    // keep regions maximal.
    //
    fn release_range(&mut self, start: VirtAddr, pages: usize) {
        let mut merged_start = start;
        let mut merged_pages = pages;

        if let Some((before_start, before_pages)) = self.remove_free_region_ending_at(start) {
            merged_start = before_start;
            merged_pages += before_pages;
        }
        let end = start + pages * PAGE_SIZE;
        if let Some((_, after_pages)) = self.remove_free_region_starting_at(end) {
            merged_pages += after_pages;
        }

        self.insert_free_region(merged_start, merged_pages);
    }

    // Adds a free region to its size group, creating the group on
    // demand.
    //
    fn insert_free_region(&mut self, start: VirtAddr, pages: usize) {
        match self.free_groups.find(pages as i64) {
            Some(node) => self.free_groups.value_mut(node).regions.push(start),
            None => {
                let mut regions = Vec::new();
                regions.push(start);
                self.free_groups
                    .insert(pages as i64, RegionGroup { regions })
                    .expect("group for this size was just missing");
            }
        }
    }

    // Removes and returns the free region containing `range`, if
    // one does.
    //
    fn remove_free_region_containing(&mut self, range: &VirtAddrRange) -> Option<(VirtAddr, usize)> {
        self.remove_free_region_where(|start, pages| {
            start <= range.start() && range.end() <= start + pages * PAGE_SIZE
        })
    }

    fn remove_free_region_ending_at(&mut self, end: VirtAddr) -> Option<(VirtAddr, usize)> {
        self.remove_free_region_where(|start, pages| start + pages * PAGE_SIZE == end)
    }

    fn remove_free_region_starting_at(&mut self, at: VirtAddr) -> Option<(VirtAddr, usize)> {
        self.remove_free_region_where(|start, _| start == at)
    }

    // Removes and returns the first free region matching the
    // predicate. The size groups are indexed by size only, so this
    // is a linear scan over the regions.
    //
    fn remove_free_region_where<F>(&mut self, matches: F) -> Option<(VirtAddr, usize)>
    where
        F: Fn(VirtAddr, usize) -> bool,
    {
        let mut node = self.free_groups.min();
        while let Some(group_node) = node {
            let pages = self.free_groups.key(group_node) as usize;
            let group = self.free_groups.value(group_node);
            if let Some(index) = group.regions.iter().position(|&start| matches(start, pages)) {
                let group = self.free_groups.value_mut(group_node);
                let start = group.regions.swap_remove(index);
                if group.regions.is_empty() {
                    self.free_groups.remove(group_node);
                }
                return Some((start, pages));
            }
            node = self.free_groups.successor(group_node);
        }

        None
    }
}

fn size_in_pages(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(Error::Inval);
    }

    Ok(size_to_blocks(size, PAGE_SIZE))
}

fn range_for(start: VirtAddr, pages: usize) -> VirtAddrRange {
    VirtAddrRange::new(start, start + pages * PAGE_SIZE)
}
