//! Size quantization: a bidirectional mapping between 32-bit byte sizes and 8-bit bin
//! indices, with explicit round-up and round-down variants.
//!
//! The bin index is a custom floating-point representation with a 3-bit mantissa and a
//! 5-bit exponent — 8 bits, 256 bins total. Within any size class the worst-case relative
//! overhead between "size requested" and "size of the bin containing it" is bounded by
//! `1/2^MANTISSA_BITS ≈ 12.5%`.
//!
//! This plays the role the teacher's [`Binning`](../../talc/src/base/binning.rs) trait
//! plays for `talc`, but is a single fixed scheme rather than a pluggable strategy — see
//! the crate root docs for why that flexibility is dropped here.

const MANTISSA_BITS: u32 = 3;
const MANTISSA_VALUE: u32 = 1 << MANTISSA_BITS;
const MANTISSA_MASK: u32 = MANTISSA_VALUE - 1;

#[inline]
fn highest_set_bit(size: u32) -> u32 {
    u32::BITS - 1 - size.leading_zeros()
}

/// Round `size` up to the bin whose blocks are guaranteed `>= size`.
///
/// Used on allocate to find a bin whose every member satisfies the request. Mantissa
/// overflow into the exponent on round-up is intended: it simply advances to the next bin.
#[inline]
pub fn round_up_bin(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }

    let highest_bit = highest_set_bit(size);
    let mantissa_start_bit = highest_bit - MANTISSA_BITS;
    let exp = mantissa_start_bit + 1;
    let mut mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;

    let low_bits_mask = (1u32 << mantissa_start_bit) - 1;
    if size & low_bits_mask != 0 {
        mantissa += 1;
    }

    (exp << MANTISSA_BITS) + mantissa
}

/// Round `size` down to the bin whose floor does not exceed `size`.
///
/// Used on insert-to-bin: any block this bin holds is sufficient for any request that
/// rounds *up* into this same bin.
#[inline]
pub fn round_down_bin(size: u32) -> u32 {
    if size < MANTISSA_VALUE {
        return size;
    }

    let highest_bit = highest_set_bit(size);
    let mantissa_start_bit = highest_bit - MANTISSA_BITS;
    let exp = mantissa_start_bit + 1;
    let mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;

    (exp << MANTISSA_BITS) + mantissa
}

/// Decode a bin index back into its nominal byte size.
///
/// Invertible for `bin < 240`; above that the decoded size would overflow `u32` and is
/// never exercised (`round_up_bin`/`round_down_bin` never produce such a bin for a valid
/// `u32` input).
#[inline]
pub fn bin_to_size(bin: u32) -> u32 {
    let exp = bin >> MANTISSA_BITS;
    let mantissa = bin & MANTISSA_MASK;

    if exp == 0 {
        mantissa
    } else {
        (mantissa | MANTISSA_VALUE) << (exp - 1)
    }
}
