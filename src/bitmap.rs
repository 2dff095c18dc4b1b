//! The two-level bitmap over 256 bins.
//!
//! A direct, non-generic specialization of the teacher's
//! [`TwoLevelBitField<L1B, L2B, L1LEN>`](../../talc/src/base/bitfield.rs) fixed at
//! `L1B = u32`, `L2B = u8`, `L1LEN = 32` — one top word, 32 one-byte leaf words, 256 bins.
//! The bit-twiddling and the exhaustive scan-property tests are carried over from that
//! type; the public surface is narrowed to exactly what `spec.md` §4.2 needs.

pub const BIN_COUNT: u32 = 256;
const LEAF_COUNT: u32 = 32;
const LEAF_BITS: u32 = 8;

/// "Find the lowest set bit at or after bit `k`" over one word, the sole primitive the
/// allocator needs from a bitmap.
#[inline]
fn find_at_or_after(word: u32, k: u32) -> Option<u32> {
    let masked = if k >= 32 { 0 } else { word >> k << k };
    if masked == 0 {
        None
    } else {
        Some(masked.trailing_zeros())
    }
}

#[inline]
fn find_at_or_after_u8(word: u8, k: u32) -> Option<u32> {
    let masked = if k >= 8 { 0 } else { (word >> k << k) as u32 };
    if masked == 0 {
        None
    } else {
        Some(masked.trailing_zeros())
    }
}

/// Two-level bitmap tracking which of 256 bins currently have a free node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinIndex {
    top: u32,
    leaves: [u8; LEAF_COUNT as usize],
}

impl BinIndex {
    pub const fn new() -> Self {
        BinIndex { top: 0, leaves: [0; LEAF_COUNT as usize] }
    }

    #[inline]
    pub fn read(&self, bin: u32) -> bool {
        debug_assert!(bin < BIN_COUNT);
        let (top_bit, leaf_bit) = split(bin);
        self.leaves[top_bit as usize] & (1 << leaf_bit) != 0
    }

    /// Sets the bin's bit, maintaining the top word. Returns `true` if the bin was
    /// previously empty (i.e. this is the insertion that makes it non-empty).
    #[inline]
    pub fn set(&mut self, bin: u32) -> bool {
        debug_assert!(bin < BIN_COUNT);
        let (top_bit, leaf_bit) = split(bin);

        let leaf = &mut self.leaves[top_bit as usize];
        let was_empty = *leaf == 0;
        *leaf |= 1 << leaf_bit;

        if was_empty {
            self.top |= 1 << top_bit;
        }

        was_empty
    }

    /// Clears the bin's bit, maintaining the top word. Returns `true` if the bin became
    /// empty as a result (i.e. the leaf byte went to zero).
    #[inline]
    pub fn clear(&mut self, bin: u32) -> bool {
        debug_assert!(bin < BIN_COUNT);
        let (top_bit, leaf_bit) = split(bin);

        let leaf = &mut self.leaves[top_bit as usize];
        *leaf &= !(1 << leaf_bit);
        let became_empty = *leaf == 0;

        if became_empty {
            self.top &= !(1 << top_bit);
        }

        became_empty
    }

    /// Find the lowest non-empty bin `>= bin`, per spec.md §4.6 steps 3–4.
    pub fn find_at_or_after(&self, bin: u32) -> Option<u32> {
        debug_assert!(bin < BIN_COUNT);
        let (top_bit, leaf_bit) = split(bin);

        if let Some(b) = find_at_or_after_u8(self.leaves[top_bit as usize], leaf_bit) {
            return Some(top_bit * LEAF_BITS + b);
        }

        let next_top = find_at_or_after(self.top, top_bit + 1)?;
        let leaf = self.leaves[next_top as usize];
        debug_assert!(leaf != 0, "top bit set implies a non-empty leaf (invariant I3)");
        Some(next_top * LEAF_BITS + leaf.trailing_zeros())
    }

    /// Highest non-empty bin, or `None` if every bin is empty. Used by the storage
    /// reporter's upper-envelope `largest_free_region`.
    pub fn highest_set(&self) -> Option<u32> {
        if self.top == 0 {
            return None;
        }

        let top_bit = 31 - self.top.leading_zeros();
        let leaf = self.leaves[top_bit as usize];
        debug_assert!(leaf != 0, "top bit set implies a non-empty leaf (invariant I3)");
        let leaf_bit = 7 - leaf.leading_zeros();
        Some(top_bit * LEAF_BITS + leaf_bit)
    }
}

impl Default for BinIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn split(bin: u32) -> (u32, u32) {
    (bin >> 3, bin & 7)
}
