// Copyright 2026 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Describes physical and virtual memory for the target architecture,
//! along with the kernel's virtual memory layout.
//!
//! The kernel targets 32-bit x86, so both address spaces are 4 GiB
//! and an address fits a `u32`. Addresses are stored as `usize` so
//! the same types work when the kernel's logic is built and tested
//! on a wider host; [`PhysAddr::try_new`] and [`VirtAddr::try_new`]
//! reject values that do not fit the machine.
//!
//! The kernel occupies the top gigabyte:
//!
//! | Region          |  Start address |  Last address | Size |
//! | --------------- | -------------: | ------------: | ---: |
//! | Userspace       |          `0x0` | `0xbfff_ffff` | 3 GiB |
//! | [`KERNEL_IMAGE`] |  `0xc000_0000` | `0xc03f_ffff` | 4 MiB |
//! | [`KERNEL_VM`]   |  `0xc040_0000` | `0xffbf_efff` | ~1 GiB |
//! | [`SCRATCH_MAP`] |  `0xffbf_f000` | `0xffbf_ffff` | 4 KiB |
//!
//! The kernel image range is identity-offset-mapped at boot and is
//! never managed by the virtual memory manager; the scratch page is
//! a single reserved slot for touching arbitrary physical memory
//! with interrupts disabled.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![allow(clippy::missing_panics_doc)]

#[cfg(test)]
extern crate alloc;

mod addr;
mod frame;
mod range;

pub use crate::addr::{InvalidPhysAddr, InvalidVirtAddr, PhysAddr, VirtAddr};
pub use crate::frame::{PhysFrame, PhysFrameRange, VirtPage};
pub use crate::range::VirtAddrRange;

/// The size of a single page of memory, in bytes.
///
pub const PAGE_SIZE: usize = 4096;

/// The largest address representable on the target machine.
///
pub const MAX_ADDRESS: usize = 0xffff_ffff;

/// The identity-offset-mapped kernel image region.
///
/// This region is mapped by the boot code and deliberately not
/// managed by the virtual memory manager.
///
pub const KERNEL_IMAGE: VirtAddrRange = VirtAddrRange::new(
    VirtAddr::new(0xc000_0000),
    VirtAddr::new(0xc040_0000),
);

/// The kernel's managed virtual memory window.
///
/// The kernel address space hands out ranges from this region.
///
pub const KERNEL_VM: VirtAddrRange = VirtAddrRange::new(
    VirtAddr::new(0xc040_0000),
    VirtAddr::new(0xffbf_f000),
);

/// The single reserved page used to touch arbitrary physical memory.
///
/// The scratch slot has one owner at a time: any user must keep
/// interrupts disabled from map to last access.
///
pub const SCRATCH_MAP: VirtAddrRange = VirtAddrRange::new(
    VirtAddr::new(0xffbf_f000),
    VirtAddr::new(0xffc0_0000),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_page_aligned_and_contiguous() {
        for region in [KERNEL_IMAGE, KERNEL_VM, SCRATCH_MAP] {
            assert!(region.start().is_aligned(PAGE_SIZE));
            assert!(region.end().is_aligned(PAGE_SIZE));
        }
        assert_eq!(KERNEL_IMAGE.end(), KERNEL_VM.start());
        assert_eq!(KERNEL_VM.end(), SCRATCH_MAP.start());
        assert_eq!(SCRATCH_MAP.size(), PAGE_SIZE);
    }
}
