// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Definitions related to an allocation bitmap's [`BitmapWord`].

use crate::utils_common::bitmanip::BitManip as _;

/// Allocation bitmap word.
///
/// Bit `i` of the word at index `j` tracks the Allocation Block at position
/// `j * BitmapWord::BITS + i`.
pub type BitmapWord = u64;

/// Base-2 logarithm of [`BitmapWord::BITS`].
pub const BITMAP_WORD_BITS_LOG2: u32 = BitmapWord::BITS.ilog2();

/// Index of the [`BitmapWord`] tracking a given Allocation Block.
pub(super) fn bitmap_word_index(allocation_block_index: u64) -> u64 {
    allocation_block_index >> BITMAP_WORD_BITS_LOG2
}

/// Position of an Allocation Block's bit within its [`BitmapWord`].
pub(super) fn pos_in_bitmap_word(allocation_block_index: u64) -> u32 {
    (allocation_block_index & u64::trailing_bits_mask(BITMAP_WORD_BITS_LOG2)) as u32
}

/// Position of a [`BitmapWord`]'s first Allocation Block.
pub(super) fn bitmap_word_begin(bitmap_word_index: u64) -> u64 {
    bitmap_word_index << BITMAP_WORD_BITS_LOG2
}
