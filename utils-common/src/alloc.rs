// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Fallible heap allocation helpers.

extern crate alloc;
use alloc::vec::Vec;

/// Error returned by the fallible allocation helpers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TryNewError {
    /// A memory allocation has failed.
    MemoryAllocationFailure,
}

/// Allocate a [`Vec`] of length `len`, with all entries set to their
/// [`Default`].
///
/// In contrast to `vec![T::default(); len]`, an allocation failure is
/// reported back instead of aborting.
pub fn try_alloc_vec<T: Default>(len: usize) -> Result<Vec<T>, TryNewError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| TryNewError::MemoryAllocationFailure)?;
    v.resize_with(len, T::default);
    Ok(v)
}

#[test]
fn test_try_alloc_vec() {
    let v = try_alloc_vec::<u64>(0).unwrap();
    assert!(v.is_empty());

    let v = try_alloc_vec::<u64>(5).unwrap();
    assert_eq!(v.len(), 5);
    assert!(v.iter().all(|w| *w == 0));
}
