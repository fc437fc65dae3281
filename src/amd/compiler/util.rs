/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

/// Largest power of two which divides `x`, or 0 for 0
pub fn lowest_pow2_divisor(x: u32) -> u32 {
    x & x.wrapping_neg()
}

/// Builds the bit pattern of 2^exp as an IEEE-754 binary32
///
/// Only normal results are representable so `exp` must be in [-126, 127].
pub fn f32_pow2_bits(exp: i32) -> u32 {
    assert!((-126..=127).contains(&exp));
    ((exp + 127) as u32) << 23
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow2_bit_patterns() {
        assert_eq!(f32::from_bits(f32_pow2_bits(24)), 16777216.0);
        assert_eq!(f32::from_bits(f32_pow2_bits(-12)), 1.0 / 4096.0);
        assert_eq!(f32_pow2_bits(0), 1.0_f32.to_bits());
        assert_eq!(lowest_pow2_divisor(12), 4);
    }
}
