// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Allocation bitmap free space search.
//!
//! An allocation bitmap tracks one Allocation Block per bit, a set bit marks
//! the block as allocated. [`find_free_range()`] searches such a bitmap for
//! a run of free blocks of some minimum length, preferably in the vicinity
//! of a given hint position.
//!
//! The search is built in layers:
//! * a word scanner, tracking the last allocated block seen and finding
//!   sufficiently large gaps between allocated blocks within a single
//!   [`BitmapWord`],
//! * the [`FreeRangeIterator`], driving the word scanner over consecutive
//!   words and stitching free runs crossing word boundaries,
//! * a selector picking one of the free runs, preferring exact fits and
//!   otherwise the best fit within some lookahead distance from the hint,
//! * and [`find_free_range()`] itself, which searches from the hint onwards
//!   first and wraps around to the bitmap's beginning only if needed.
//!
//! [`AllocBitmap`] wraps an owned bitmap for callers managing one.

mod bitmap;
mod bitmap_word;
mod free_ranges;
mod search;
mod select;
mod word_scanner;

#[cfg(test)]
mod test;

pub use bitmap::AllocBitmap;
pub use bitmap_word::{BITMAP_WORD_BITS_LOG2, BitmapWord};
pub use free_ranges::FreeRangeIterator;
pub use search::{find_free_range, find_free_range_position};
pub use select::LOCALITY_LOOKAHEAD_BLOCKS;

use core::convert;

/// Error type returned by fallible [`AllocBitmap`] operations.
///
/// Note that the free space search itself never fails, the absence of a
/// suitable free range is reported as `None`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AllocBitmapError {
    /// Logic error.
    Internal,

    /// A memory allocation has failed.
    MemoryAllocationFailure,

    /// The size of some entity exceeds the bounds supported by the
    /// implementation.
    DimensionsNotSupported,

    /// Some Allocation Block range is not within the bitmap's bounds.
    RegionOutOfRange,
}

impl convert::From<crate::utils_common::alloc::TryNewError> for AllocBitmapError {
    fn from(value: crate::utils_common::alloc::TryNewError) -> Self {
        match value {
            crate::utils_common::alloc::TryNewError::MemoryAllocationFailure => Self::MemoryAllocationFailure,
        }
    }
}

/// Debugging friendly helper for instantiating [`AllocBitmapError::Internal`].
///
/// Panics if `cfg!(debug_assertions)` is on, to allow for debugger examination
/// at the point the logic error has happened. Otherwise a
/// [`AllocBitmapError::Internal`] is returned.
#[macro_export]
macro_rules! alloc_bitmap_err_internal {
    () => {{
        if cfg!(debug_assertions) {
            panic!("AllocBitmapError::Internal");
        } else {
            $crate::alloc_bitmap::AllocBitmapError::Internal
        }
    }};
}
