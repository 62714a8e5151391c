// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Bit manipulation primitives on unsigned integer types.

macro_rules! impl_bitmanip_u {
    ($ut:ty) => {
        impl BitManip for $ut {
            fn trailing_bits_mask(count: u32) -> Self {
                debug_assert!(count <= <$ut>::BITS);
                // A count of BITS wraps the shift amount to zero and the final
                // subtraction turns the resulting zero into all ones.
                let all = count / <$ut>::BITS;
                let count = count % <$ut>::BITS;
                (((1 as $ut) << count) - 1).wrapping_sub(all as $ut)
            }

            fn clear_lowest_set_bit(self) -> Self {
                self & self.wrapping_sub(1)
            }
        }
    };
}

macro_rules! impl_ubitmanip {
    ($ut:ty) => {
        impl UBitManip for $ut {
            fn round_up_pow2(self, pow2_log2: u32) -> Option<Self> {
                debug_assert!(pow2_log2 < <$ut>::BITS);
                let t = ((1 as $ut) << pow2_log2) - 1;
                Some(self.checked_add(t)? & !t)
            }
        }
    };
}

pub trait BitManip: Copy {
    /// Mask with the `count` least significant bits set.
    ///
    /// `count` may equal the type's bit width, in which case all bits are
    /// set.
    fn trailing_bits_mask(count: u32) -> Self;

    /// Clear the least significant set bit, if any.
    fn clear_lowest_set_bit(self) -> Self;
}

pub trait UBitManip: Sized + BitManip {
    /// Round up to the next multiple of `2^pow2_log2`, `None` on overflow.
    fn round_up_pow2(self, pow2_log2: u32) -> Option<Self>;
}

impl_bitmanip_u!(u8);
impl_ubitmanip!(u8);
impl_bitmanip_u!(u16);
impl_ubitmanip!(u16);
impl_bitmanip_u!(u32);
impl_ubitmanip!(u32);
impl_bitmanip_u!(u64);
impl_ubitmanip!(u64);
impl_bitmanip_u!(usize);
impl_ubitmanip!(usize);

#[test]
fn test_trailing_bits_mask() {
    assert_eq!(u64::trailing_bits_mask(0), 0);
    assert_eq!(u64::trailing_bits_mask(1), 1);
    assert_eq!(u64::trailing_bits_mask(7), 0x7f);
    assert_eq!(u64::trailing_bits_mask(63), !0u64 >> 1);
    assert_eq!(u64::trailing_bits_mask(64), !0u64);
    assert_eq!(u8::trailing_bits_mask(8), 0xff);
}

#[test]
fn test_clear_lowest_set_bit() {
    assert_eq!(0u64.clear_lowest_set_bit(), 0);
    assert_eq!(0x41u64.clear_lowest_set_bit(), 0x40);
    assert_eq!((!0u64).clear_lowest_set_bit(), !1u64);
}

#[test]
fn test_round_up_pow2() {
    assert_eq!(0u64.round_up_pow2(6), Some(0));
    assert_eq!(1u64.round_up_pow2(6), Some(64));
    assert_eq!(64u64.round_up_pow2(6), Some(64));
    assert_eq!(u64::MAX.round_up_pow2(6), None);
}
