// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Selection of a free range among candidates.

use crate::layout;

/// Distance past the beginning of a search beyond which no better fitting free
/// range is being looked for anymore.
///
/// The effective distance is the sum of this and the requested length: the
/// larger the request, the less locality matters.
pub const LOCALITY_LOOKAHEAD_BLOCKS: u64 = 64;

/// Select a free range among a sequence of candidates.
///
/// A candidate of exactly `block_count` length is returned right away.
/// Otherwise the shortest one is chosen, i.e. the one wasting the least space.
/// If `prefer_nearby` is set, the search for a better fit is given up once
/// some candidate starts past [`LOCALITY_LOOKAHEAD_BLOCKS`] + `block_count`.
///
/// # Arguments:
///
/// * `free_ranges` - The candidates, in ascending order of their positions
///   and all at least `block_count` long.
/// * `block_count` - The requested length.
/// * `prefer_nearby` - Whether to trade fit for locality.
pub(super) fn select_free_range<I: Iterator<Item = layout::AllocBlockRange>>(
    free_ranges: I,
    block_count: layout::AllocBlockCount,
    prefer_nearby: bool,
) -> Option<layout::AllocBlockRange> {
    let lookahead_end = LOCALITY_LOOKAHEAD_BLOCKS.saturating_add(u64::from(block_count));

    let mut best: Option<layout::AllocBlockRange> = None;
    for candidate in free_ranges {
        debug_assert!(candidate.block_count() >= block_count);
        if candidate.block_count() == block_count {
            return Some(candidate);
        }

        if best.is_none_or(|best| candidate.block_count() < best.block_count()) {
            best = Some(candidate);
        }

        if prefer_nearby && u64::from(candidate.begin()) > lookahead_end {
            // Gone too far, stop being choosy.
            return match best {
                Some(best) if best.block_count() < candidate.block_count() => Some(best),
                _ => Some(candidate),
            };
        }
    }

    best
}

#[cfg(test)]
fn test_free_range(begin: u64, block_count: u64) -> layout::AllocBlockRange {
    layout::AllocBlockRange::from((
        layout::AllocBlockIndex::from(begin),
        layout::AllocBlockCount::from(block_count),
    ))
}

#[test]
fn test_select_exact_fit() {
    let candidates = [test_free_range(0, 7), test_free_range(10, 6), test_free_range(20, 5)];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), false),
        Some(test_free_range(20, 5))
    );
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(6), true),
        Some(test_free_range(10, 6))
    );
}

#[test]
fn test_select_best_fit() {
    let candidates = [
        test_free_range(0, 9),
        test_free_range(10, 7),
        test_free_range(20, 8),
        test_free_range(200, 6),
    ];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), false),
        Some(test_free_range(200, 6))
    );
    // The last candidate is past the lookahead distance of 64 + 5 blocks. It
    // still gets considered when giving up.
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), true),
        Some(test_free_range(200, 6))
    );

    let candidates = [test_free_range(0, 9), test_free_range(10, 7), test_free_range(100, 8), test_free_range(200, 6)];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), true),
        Some(test_free_range(10, 7))
    );
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), false),
        Some(test_free_range(200, 6))
    );

    // On a tie, the candidate triggering the end of the search wins.
    let candidates = [test_free_range(0, 7), test_free_range(100, 7)];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), true),
        Some(test_free_range(100, 7))
    );
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(5), false),
        Some(test_free_range(0, 7))
    );
}

#[test]
fn test_select_lookahead_scales_with_request() {
    // With a request of 40 blocks, the lookahead extends up to 104.
    let candidates = [test_free_range(0, 50), test_free_range(100, 45), test_free_range(110, 41)];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(40), true),
        Some(test_free_range(110, 41))
    );
    let candidates = [test_free_range(0, 50), test_free_range(105, 45), test_free_range(110, 41)];
    assert_eq!(
        select_free_range(candidates.iter().copied(), layout::AllocBlockCount::from(40), true),
        Some(test_free_range(105, 45))
    );
}

#[test]
fn test_select_huge_request() {
    // The lookahead distance saturates instead of overflowing.
    let candidates = [test_free_range(0, u64::MAX - 5), test_free_range(2, u64::MAX - 6)];
    assert_eq!(
        select_free_range(
            candidates.iter().copied(),
            layout::AllocBlockCount::from(u64::MAX - 10),
            true
        ),
        Some(test_free_range(2, u64::MAX - 6))
    );
    assert_eq!(
        select_free_range(core::iter::empty(), layout::AllocBlockCount::from(u64::MAX), true),
        None
    );
}

#[test]
fn test_select_none() {
    assert_eq!(
        select_free_range(core::iter::empty(), layout::AllocBlockCount::from(1), true),
        None
    );
}
