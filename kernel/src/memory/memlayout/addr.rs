// Copyright 2026 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use crate::MAX_ADDRESS;
use align::{align_down_usize, align_up_usize};
use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// An internal macro implementing the shared behaviour of the
/// physical and virtual address newtypes.
///
macro_rules! addr_impls {
    ($name:ident, $invalid:ident) => {
        impl $name {
            /// The zero address.
            ///
            pub const fn zero() -> Self {
                $name(0)
            }

            /// Creates a new address.
            ///
            /// # Panics
            ///
            /// `new` will panic if `addr` is not valid for the
            /// target platform.
            ///
            #[track_caller]
            pub const fn new(addr: usize) -> Self {
                match Self::try_new(addr) {
                    Ok(addr) => addr,
                    Err(_) => panic!("invalid address"),
                }
            }

            /// Tries to create a new address, returning an error if
            /// the value does not fit the machine's address width.
            ///
            pub const fn try_new(addr: usize) -> Result<Self, $invalid> {
                if addr <= MAX_ADDRESS {
                    Ok($name(addr))
                } else {
                    Err($invalid(addr))
                }
            }

            /// Returns the address's numerical value.
            ///
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Aligns the address upward to `align`, which must be an
            /// exact power of two.
            ///
            #[must_use]
            pub fn align_up(self, align: usize) -> Self {
                $name::new(align_up_usize(self.0, align))
            }

            /// Aligns the address downward to `align`, which must be
            /// an exact power of two.
            ///
            #[must_use]
            pub fn align_down(self, align: usize) -> Self {
                $name::new(align_down_usize(self.0, align))
            }

            /// Returns whether the address is aligned to `align`,
            /// which must be an exact power of two.
            ///
            pub fn is_aligned(self, align: usize) -> bool {
                self.align_down(align) == self
            }

            /// Returns the distance to `other`, which must not
            /// exceed this address.
            ///
            pub const fn checked_sub(self, other: Self) -> Option<usize> {
                self.0.checked_sub(other.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[track_caller]
            fn add(self, offset: usize) -> Self {
                $name::new(self.0 + offset)
            }
        }

        impl AddAssign<usize> for $name {
            #[track_caller]
            fn add_assign(&mut self, offset: usize) {
                *self = *self + offset;
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[track_caller]
            fn sub(self, offset: usize) -> Self {
                $name::new(self.0 - offset)
            }
        }

        impl SubAssign<usize> for $name {
            #[track_caller]
            fn sub_assign(&mut self, offset: usize) {
                *self = *self - offset;
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[track_caller]
            fn sub(self, other: $name) -> usize {
                self.0
                    .checked_sub(other.0)
                    .expect("address subtraction underflowed")
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, concat!(stringify!($name), "({:#010x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{:#010x}", self.0)
            }
        }
    };
}

/// A physical memory address for the target architecture.
///
#[repr(transparent)]
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(usize);

/// An invalid physical memory address.
///
/// If an attempt is made to create a `PhysAddr` from a value that
/// does not fit the target platform, then `InvalidPhysAddr` is
/// returned, containing the attempted value.
///
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InvalidPhysAddr(pub usize);

addr_impls! { PhysAddr, InvalidPhysAddr }

/// A virtual memory address for the target architecture.
///
#[repr(transparent)]
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(usize);

/// An invalid virtual memory address.
///
/// If an attempt is made to create a `VirtAddr` from a value that
/// does not fit the target platform, then `InvalidVirtAddr` is
/// returned, containing the attempted value.
///
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InvalidVirtAddr(pub usize);

addr_impls! { VirtAddr, InvalidVirtAddr }
