// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`AllocBitmap`].

extern crate alloc;
use alloc::vec::Vec;

use super::AllocBitmapError;
use super::bitmap_word::{
    BITMAP_WORD_BITS_LOG2, BitmapWord, bitmap_word_index, pos_in_bitmap_word,
};
use super::free_ranges::FreeRangeIterator;
use crate::alloc_bitmap_err_internal;
use crate::layout;
use crate::utils_common::{
    alloc::try_alloc_vec,
    bitmanip::{BitManip as _, UBitManip as _},
};

/// Owned allocation bitmap.
///
/// Tracks the allocation state of each Allocation Block in a bit, a set bit
/// means allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocBitmap {
    bitmap: Vec<BitmapWord>,
}

impl AllocBitmap {
    /// Create a new [`AllocBitmap`] with all Allocation Blocks free.
    ///
    /// The bitmap's length gets rounded up to a multiple of
    /// [`BitmapWord::BITS`], the excess bits are marked as allocated.
    ///
    /// # Arguments:
    ///
    /// * `image_allocation_blocks` - Number of Allocation Blocks to track.
    pub fn new(image_allocation_blocks: layout::AllocBlockCount) -> Result<Self, AllocBitmapError> {
        let image_allocation_blocks = u64::from(image_allocation_blocks);
        let bitmap_words = image_allocation_blocks
            .round_up_pow2(BITMAP_WORD_BITS_LOG2)
            .ok_or(AllocBitmapError::DimensionsNotSupported)?
            >> BITMAP_WORD_BITS_LOG2;
        let bitmap_words = usize::try_from(bitmap_words).map_err(|_| AllocBitmapError::DimensionsNotSupported)?;

        let mut bitmap: Vec<BitmapWord> = try_alloc_vec(bitmap_words)?;
        let tail_bits = pos_in_bitmap_word(image_allocation_blocks);
        if tail_bits != 0
            && let Some(last_bitmap_word) = bitmap.last_mut()
        {
            *last_bitmap_word = !BitmapWord::trailing_bits_mask(tail_bits);
        }

        Ok(Self { bitmap })
    }

    /// Wrap existing bitmap words.
    pub fn from_words(bitmap: Vec<BitmapWord>) -> Self {
        Self { bitmap }
    }

    /// The bitmap's backing [`BitmapWord`]s.
    pub fn words(&self) -> &[BitmapWord] {
        &self.bitmap
    }

    /// Test whether an Allocation Block is allocated.
    ///
    /// Returns `None` if `allocation_block_index` is out of bounds.
    pub fn is_allocated(&self, allocation_block_index: layout::AllocBlockIndex) -> Option<bool> {
        let allocation_block_index = u64::from(allocation_block_index);
        let bitmap_word = usize::try_from(bitmap_word_index(allocation_block_index)).ok()?;
        let bitmap_word = *self.bitmap.get(bitmap_word)?;
        Some(bitmap_word & (1 << pos_in_bitmap_word(allocation_block_index)) != 0)
    }

    /// Set or clear a range of Allocation Blocks.
    ///
    /// # Arguments:
    ///
    /// * `range` - The range of Allocation Blocks to modify. Must be within
    ///   the bitmap's bounds, otherwise [`AllocBitmapError::RegionOutOfRange`]
    ///   is returned.
    /// * `value` - Whether to mark the range as allocated or free.
    pub fn set_in_range(&mut self, range: &layout::AllocBlockRange, value: bool) -> Result<(), AllocBitmapError> {
        let mut remaining_block_count = u64::from(range.block_count());
        let first_allocation_block_index = u64::from(range.begin());
        let bitmap_word_index_begin = bitmap_word_index(first_allocation_block_index);
        let mut offset_in_bitmap_word = pos_in_bitmap_word(first_allocation_block_index);

        let bitmap_word_index_end = bitmap_word_index(u64::from(range.end()) - 1) + 1;
        let bitmap_word_index_end =
            usize::try_from(bitmap_word_index_end).map_err(|_| AllocBitmapError::RegionOutOfRange)?;
        if bitmap_word_index_end > self.bitmap.len() {
            return Err(AllocBitmapError::RegionOutOfRange);
        }
        let bitmap_word_index_begin =
            usize::try_from(bitmap_word_index_begin).map_err(|_| alloc_bitmap_err_internal!())?;

        let set_mask = if value { !0 } else { 0 };
        for bitmap_word in self.bitmap[bitmap_word_index_begin..bitmap_word_index_end].iter_mut() {
            let bits_in_word = remaining_block_count.min((BitmapWord::BITS - offset_in_bitmap_word) as u64) as u32;
            let bits_in_word_mask = BitmapWord::trailing_bits_mask(bits_in_word) << offset_in_bitmap_word;
            *bitmap_word &= !bits_in_word_mask;
            *bitmap_word |= set_mask & bits_in_word_mask;
            remaining_block_count -= bits_in_word as u64;
            offset_in_bitmap_word = 0;
        }
        debug_assert_eq!(remaining_block_count, 0);

        Ok(())
    }

    /// Find a run of free Allocation Blocks, preferably near some hint
    /// position.
    ///
    /// See [`find_free_range()`](super::find_free_range) for details.
    pub fn find_free_range(
        &self,
        block_count: layout::AllocBlockCount,
        hint: layout::AllocBlockIndex,
    ) -> Option<layout::AllocBlockRange> {
        super::find_free_range(&self.bitmap, block_count, hint)
    }

    /// Iterate over all maximal runs of free Allocation Blocks of at least
    /// `min_block_count` length.
    ///
    /// A `min_block_count` of zero is equivalent to one.
    pub fn iter_free_ranges(&self, min_block_count: layout::AllocBlockCount) -> FreeRangeIterator<'_> {
        FreeRangeIterator::new(&self.bitmap, min_block_count)
    }
}

#[cfg(test)]
fn test_range(begin: u64, end: u64) -> layout::AllocBlockRange {
    layout::AllocBlockRange::new(layout::AllocBlockIndex::from(begin), layout::AllocBlockIndex::from(end))
}

#[test]
fn test_alloc_bitmap_new() {
    let bitmap = AllocBitmap::new(layout::AllocBlockCount::from(0)).unwrap();
    assert!(bitmap.words().is_empty());

    let bitmap = AllocBitmap::new(layout::AllocBlockCount::from(128)).unwrap();
    assert_eq!(bitmap.words(), &[0, 0]);

    // The padding is marked allocated.
    let bitmap = AllocBitmap::new(layout::AllocBlockCount::from(70)).unwrap();
    assert_eq!(bitmap.words(), &[0, !0 << 6]);
    assert_eq!(bitmap.is_allocated(layout::AllocBlockIndex::from(69)), Some(false));
    assert_eq!(bitmap.is_allocated(layout::AllocBlockIndex::from(70)), Some(true));
    assert_eq!(bitmap.is_allocated(layout::AllocBlockIndex::from(128)), None);
    assert_eq!(
        bitmap.find_free_range(layout::AllocBlockCount::from(70), layout::AllocBlockIndex::from(0)),
        Some(test_range(0, 70))
    );
    assert_eq!(
        bitmap.find_free_range(layout::AllocBlockCount::from(71), layout::AllocBlockIndex::from(0)),
        None
    );

    assert_eq!(
        AllocBitmap::new(layout::AllocBlockCount::from(u64::MAX)),
        Err(AllocBitmapError::DimensionsNotSupported)
    );
}

#[test]
fn test_alloc_bitmap_set_in_range() {
    let mut bitmap = AllocBitmap::new(layout::AllocBlockCount::from(192)).unwrap();
    bitmap.set_in_range(&test_range(60, 130), true).unwrap();
    assert_eq!(bitmap.words(), &[!0 << 60, !0, 0x3]);
    bitmap.set_in_range(&test_range(64, 65), false).unwrap();
    assert_eq!(bitmap.words(), &[!0 << 60, !0 << 1, 0x3]);
    assert_eq!(bitmap.is_allocated(layout::AllocBlockIndex::from(64)), Some(false));
    assert_eq!(bitmap.is_allocated(layout::AllocBlockIndex::from(65)), Some(true));

    bitmap.set_in_range(&test_range(0, 192), false).unwrap();
    assert_eq!(bitmap.words(), &[0, 0, 0]);

    assert_eq!(
        bitmap.set_in_range(&test_range(190, 193), true),
        Err(AllocBitmapError::RegionOutOfRange)
    );
    assert_eq!(bitmap.words(), &[0, 0, 0]);
}

#[test]
fn test_alloc_bitmap_iter_free_ranges() {
    let mut bitmap = AllocBitmap::from_words(alloc::vec![0, 0, 0]);
    bitmap.set_in_range(&test_range(10, 20), true).unwrap();
    bitmap.set_in_range(&test_range(100, 101), true).unwrap();
    let free_ranges: Vec<layout::AllocBlockRange> =
        bitmap.iter_free_ranges(layout::AllocBlockCount::from(1)).collect();
    assert_eq!(free_ranges, [test_range(0, 10), test_range(20, 100), test_range(101, 192)]);
    let free_ranges: Vec<layout::AllocBlockRange> =
        bitmap.iter_free_ranges(layout::AllocBlockCount::from(11)).collect();
    assert_eq!(free_ranges, [test_range(20, 100), test_range(101, 192)]);

    // A zero minimum length lists all free runs.
    let bitmap = AllocBitmap::from_words(alloc::vec![0x2]);
    let free_ranges: Vec<layout::AllocBlockRange> =
        bitmap.iter_free_ranges(layout::AllocBlockCount::from(0)).collect();
    assert_eq!(free_ranges, [test_range(0, 1), test_range(2, 64)]);
}
