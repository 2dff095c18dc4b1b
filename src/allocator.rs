//! The allocator facade: orchestrates the bin index, the free-block store, the neighbor
//! chain and the node pool behind `allocate`/`free`.
//!
//! The overall shape — a facade type wrapping an arena plus a couple of index structures,
//! with `cfg`-gated invariant scanning on mutating paths — is carried over from
//! `talc/src/lib.rs`'s `Talc` type and its `scan_for_errors` debug assertions; the
//! allocation algorithm itself is not talc's (talc manages raw spans of real memory and
//! merges with OS-provided extensions, this manages abstract offsets in a fixed range).

use crate::bitmap::BinIndex;
use crate::node::{Node, NodeIndex, Pool};
use crate::quantize::{bin_to_size, round_down_bin, round_up_bin};
use crate::report::{StorageReport, StorageReportFull};

/// Sentinel offset/metadata value returned by [`Allocator::allocate`] on failure.
pub const NO_SPACE: u32 = u32::MAX;

/// The result of an allocation attempt.
///
/// On success, `offset` is the start of the granted range and `metadata` is an opaque
/// handle that must be passed back to [`Allocator::free`] to release it — it is not
/// itself an offset and carries no public meaning beyond that round trip. On failure
/// both fields are [`NO_SPACE`] / [`NodeIndex::UNUSED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation<Idx: NodeIndex = u32> {
    pub offset: u32,
    pub metadata: Idx,
}

impl<Idx: NodeIndex> Allocation<Idx> {
    #[inline]
    fn failed() -> Self {
        Allocation { offset: NO_SPACE, metadata: Idx::UNUSED }
    }

    /// `true` if this allocation represents a granted range.
    #[inline]
    pub fn is_success(&self) -> bool {
        !self.metadata.is_unused()
    }
}

/// A hard-realtime, `O(1)` sub-allocator over the abstract integer range `[0, size)`.
///
/// `Idx` selects the width of the internal node handles: [`u32`] (the default, up to
/// ~4G nodes) or [`u16`] (up to 65535, half the metadata footprint). Every operation is
/// `O(1)` except [`storage_report_full`](Self::storage_report_full), which is `O(bins)`.
pub struct Allocator<Idx: NodeIndex = u32> {
    size: u32,
    bins: BinIndex,
    bin_heads: [Idx; 256],
    pool: Pool<Idx>,
    free_storage: u32,
}

impl<Idx: NodeIndex> Allocator<Idx> {
    /// Creates an allocator managing `[0, size)`, with room for `max_allocations` live
    /// nodes (free + used combined).
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`, if `max_allocations == 0`, or if `max_allocations` exceeds
    /// `Idx::MAX_COUNT`.
    pub fn new(size: u32, max_allocations: usize) -> Self {
        assert!(size > 0, "offset-allocator: size must be non-zero");
        assert!(max_allocations > 0, "offset-allocator: max_allocations must be non-zero");
        assert!(
            max_allocations <= Idx::MAX_COUNT,
            "offset-allocator: max_allocations exceeds the chosen NodeIndex's capacity"
        );

        let mut this = Allocator {
            size,
            bins: BinIndex::new(),
            bin_heads: [Idx::UNUSED; 256],
            pool: Pool::new(max_allocations),
            free_storage: 0,
        };
        this.reset();
        this
    }

    /// The size of the managed range, as given to [`new`](Self::new).
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The node pool capacity, as given to [`new`](Self::new).
    #[inline]
    pub fn max_allocations(&self) -> usize {
        self.pool.capacity()
    }

    /// Discards all outstanding allocations and restores the allocator to a single free
    /// block covering the entire managed range.
    ///
    /// Any [`Allocation`] handles issued before this call become invalid; using them
    /// with [`free`](Self::free) afterwards is a logic error.
    pub fn reset(&mut self) {
        self.bins = BinIndex::new();
        self.bin_heads = [Idx::UNUSED; 256];
        self.free_storage = 0;
        self.pool = Pool::new(self.pool.capacity());

        let head = self.pool.pop().expect("a freshly constructed pool has capacity >= 1");
        self.pool.set(
            head,
            Node {
                data_offset: 0,
                data_size: self.size,
                used: false,
                bin_list_prev: Idx::UNUSED,
                bin_list_next: Idx::UNUSED,
                neighbor_prev: Idx::UNUSED,
                neighbor_next: Idx::UNUSED,
            },
        );
        self.insert_free_node(head);

        #[cfg(any(test, feature = "scan-for-errors"))]
        self.debug_check_invariants();
    }

    /// Attempts to carve out `size` contiguous units from the managed range.
    ///
    /// Returns a failed [`Allocation`] (see [`Allocation::is_success`]) if the node pool
    /// is exhausted or no free block is large enough; the allocator's state is unchanged
    /// in that case. Otherwise `O(1)`: the bin search, the pool pop and the neighbor
    /// chain splice are all constant-time.
    pub fn allocate(&mut self, size: u32) -> Allocation<Idx> {
        #[cfg(any(test, feature = "scan-for-errors"))]
        self.debug_check_invariants();

        // Step 1: the pool always keeps one slot in reserve, so `free_count() <= 1`
        // means no slot is available to hand out.
        if self.pool.free_count() <= 1 {
            return Allocation::failed();
        }

        // Steps 2-4: round up to the smallest bin that can satisfy the request, then
        // find the lowest non-empty bin at or above it.
        let min_bin = round_up_bin(size);
        let Some(bin) = self.bins.find_at_or_after(min_bin) else {
            return Allocation::failed();
        };

        // Step 5: pop that bin's head node out of the free-block store.
        let idx = self.bin_heads[bin as usize];
        self.remove_free_node(idx);

        let offset = self.pool.get(idx).data_offset;
        let original_size = self.pool.get(idx).data_size;
        let remainder = original_size - size;

        // Step 6: the popped node becomes the used allocation, shrunk to the exact
        // requested size.
        {
            let node = self.pool.get_mut(idx);
            node.used = true;
            node.data_size = size;
        }

        // Step 7: if there's a remainder, split it into a new free node spliced in
        // immediately after `idx` in the neighbor chain, and file it in its bin.
        if remainder > 0 {
            let new_idx = self.pool.pop().expect(
                "the pool reserve check above guarantees a slot for at most one split",
            );
            let old_next = self.pool.get(idx).neighbor_next;

            self.pool.set(
                new_idx,
                Node {
                    data_offset: offset + size,
                    data_size: remainder,
                    used: false,
                    bin_list_prev: Idx::UNUSED,
                    bin_list_next: Idx::UNUSED,
                    neighbor_prev: idx,
                    neighbor_next: old_next,
                },
            );
            self.pool.get_mut(idx).neighbor_next = new_idx;
            if !old_next.is_unused() {
                self.pool.get_mut(old_next).neighbor_prev = new_idx;
            }

            self.insert_free_node(new_idx);
        }

        #[cfg(any(test, feature = "scan-for-errors"))]
        self.debug_check_invariants();

        Allocation { offset, metadata: idx }
    }

    /// Releases a block previously returned by [`allocate`](Self::allocate), coalescing
    /// it with any free neighbors in the address-ordered chain.
    ///
    /// `O(1)`: at most two neighbor checks, each a constant number of pointer fixups.
    ///
    /// Freeing a failed [`Allocation`] (one with `metadata == Idx::UNUSED`) is a no-op.
    pub fn free(&mut self, allocation: Allocation<Idx>) {
        if allocation.metadata.is_unused() {
            return;
        }

        #[cfg(any(test, feature = "scan-for-errors"))]
        self.debug_check_invariants();

        let idx = allocation.metadata;
        debug_assert!(self.pool.get(idx).used, "double free or invalid allocation handle");

        let mut offset = self.pool.get(idx).data_offset;
        let mut size = self.pool.get(idx).data_size;

        let prev_idx = self.pool.get(idx).neighbor_prev;
        let merge_prev = !prev_idx.is_unused() && !self.pool.get(prev_idx).used;
        if merge_prev {
            offset = self.pool.get(prev_idx).data_offset;
            size += self.pool.get(prev_idx).data_size;
            self.remove_free_node(prev_idx);
        }

        let next_idx = self.pool.get(idx).neighbor_next;
        let merge_next = !next_idx.is_unused() && !self.pool.get(next_idx).used;
        if merge_next {
            size += self.pool.get(next_idx).data_size;
            self.remove_free_node(next_idx);
        }

        let new_prev = if merge_prev { self.pool.get(prev_idx).neighbor_prev } else { prev_idx };
        let new_next = if merge_next { self.pool.get(next_idx).neighbor_next } else { next_idx };

        if merge_prev {
            self.pool.push(prev_idx);
        }
        if merge_next {
            self.pool.push(next_idx);
        }
        self.pool.push(idx);

        let merged_idx = self
            .pool
            .pop()
            .expect("this call just returned at least one slot (idx itself) to the pool");

        self.pool.set(
            merged_idx,
            Node {
                data_offset: offset,
                data_size: size,
                used: false,
                bin_list_prev: Idx::UNUSED,
                bin_list_next: Idx::UNUSED,
                neighbor_prev: new_prev,
                neighbor_next: new_next,
            },
        );
        if !new_prev.is_unused() {
            self.pool.get_mut(new_prev).neighbor_next = merged_idx;
        }
        if !new_next.is_unused() {
            self.pool.get_mut(new_next).neighbor_prev = merged_idx;
        }

        self.insert_free_node(merged_idx);

        #[cfg(any(test, feature = "scan-for-errors"))]
        self.debug_check_invariants();
    }

    /// A coarse snapshot of free space: the total and an upper-envelope largest region.
    pub fn storage_report(&self) -> StorageReport {
        let largest_free_region = match self.bins.highest_set() {
            Some(bin) => bin_to_size(bin),
            None => 0,
        };
        StorageReport { total_free_space: self.free_storage, largest_free_region }
    }

    /// A full per-bin histogram of free nodes. `O(bins + free nodes)`, not `O(1)` — only
    /// call this off the hot path (diagnostics, telemetry snapshots).
    pub fn storage_report_full(&self) -> StorageReportFull {
        let mut report = StorageReportFull::new();
        for bin in 0..256u32 {
            let mut count = 0u32;
            let mut cursor = self.bin_heads[bin as usize];
            while !cursor.is_unused() {
                count += 1;
                cursor = self.pool.get(cursor).bin_list_next;
            }
            report.bins[bin as usize].count = count;
        }
        report
    }

    /// Links `idx` into its size-class bin's free list and the bitmap, and accounts its
    /// size into `free_storage`. `idx`'s node must already have `used == false` and a
    /// stable `data_size`.
    fn insert_free_node(&mut self, idx: Idx) {
        let size = self.pool.get(idx).data_size;
        let bin = round_down_bin(size) as usize;

        let head = self.bin_heads[bin];
        {
            let node = self.pool.get_mut(idx);
            node.bin_list_prev = Idx::UNUSED;
            node.bin_list_next = head;
        }
        if !head.is_unused() {
            self.pool.get_mut(head).bin_list_prev = idx;
        }
        self.bin_heads[bin] = idx;
        self.bins.set(bin as u32);

        self.free_storage += size;
    }

    /// Unlinks `idx` from its size-class bin's free list and the bitmap, and removes its
    /// size from `free_storage`. Does not touch the neighbor chain or the node pool.
    fn remove_free_node(&mut self, idx: Idx) {
        let node = *self.pool.get(idx);
        let bin = round_down_bin(node.data_size) as usize;

        if node.bin_list_prev.is_unused() {
            self.bin_heads[bin] = node.bin_list_next;
        } else {
            self.pool.get_mut(node.bin_list_prev).bin_list_next = node.bin_list_next;
        }
        if !node.bin_list_next.is_unused() {
            self.pool.get_mut(node.bin_list_next).bin_list_prev = node.bin_list_prev;
        }
        if self.bin_heads[bin].is_unused() {
            self.bins.clear(bin as u32);
        }

        self.free_storage -= node.data_size;
    }

    /// Walks the neighbor chain and the bin index, verifying invariants I1-I6. `O(live
    /// nodes + bins)`. Panics on the first violation found.
    #[cfg(any(test, feature = "scan-for-errors"))]
    fn debug_check_invariants(&self) {
        let capacity = self.pool.capacity();
        let mut live = alloc::vec![true; capacity];
        for i in 0..capacity {
            let idx = Idx::from_usize(i);
            if self.pool.is_free(idx) {
                live[i] = false;
            }
        }

        // Find the chain head: the unique live node with no predecessor.
        let mut head = None;
        let mut live_count = 0usize;
        for i in 0..capacity {
            if !live[i] {
                continue;
            }
            live_count += 1;
            let idx = Idx::from_usize(i);
            if self.pool.get(idx).neighbor_prev.is_unused() {
                assert!(head.is_none(), "I1: more than one neighbor chain head");
                head = Some(idx);
            }
        }
        let mut cursor = head.expect("I1: neighbor chain has no head");

        let mut offset = 0u32;
        let mut visited = 0usize;
        let mut prev_was_free = false;
        loop {
            let node = *self.pool.get(cursor);
            assert_eq!(node.data_offset, offset, "I1: neighbor chain is not contiguous");
            assert!(!prev_was_free || node.used, "I2: two adjacent free nodes were not coalesced");
            prev_was_free = !node.used;

            offset += node.data_size;
            visited += 1;

            let next = node.neighbor_next;
            if next.is_unused() {
                break;
            }
            assert_eq!(self.pool.get(next).neighbor_prev, cursor, "I1: neighbor chain backlink broken");
            cursor = next;
        }
        assert_eq!(offset, self.size, "I1: neighbor chain does not cover the full managed range");
        assert_eq!(visited, live_count, "I6: freelist membership disagrees with the neighbor chain");

        // Walk every bin's free list and cross-check against the bitmap and the chain.
        let mut total_free = 0u64;
        for bin in 0..256u32 {
            let mut cursor = self.bin_heads[bin as usize];
            let mut any = false;
            while !cursor.is_unused() {
                any = true;
                let node = *self.pool.get(cursor);
                assert!(!node.used, "I3: a used node is present in a bin's free list");
                assert_eq!(
                    round_down_bin(node.data_size),
                    bin,
                    "I3: a node is filed under the wrong bin"
                );
                total_free += node.data_size as u64;
                cursor = node.bin_list_next;
            }
            assert_eq!(self.bins.read(bin), any, "I4: bitmap bit disagrees with bin occupancy");
        }
        assert_eq!(total_free, self.free_storage as u64, "I5: free_storage disagrees with the bin index");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u32 = 256 * 1024 * 1024;
    const MAX_ALLOCS: usize = 128 * 1024;

    fn fresh() -> Allocator<u32> {
        Allocator::new(SIZE, MAX_ALLOCS)
    }

    #[test]
    fn scenario_1_zero_size_allocations_consume_a_slot_not_a_range() {
        let mut a = fresh();
        assert_eq!(a.allocate(0).offset, 0);
        assert_eq!(a.allocate(1).offset, 0);
        assert_eq!(a.allocate(123).offset, 1);
        assert_eq!(a.allocate(1234).offset, 124);
    }

    #[test]
    fn scenario_2_remainder_bin_is_reused_after_a_free() {
        let mut a = fresh();
        let first = a.allocate(1024);
        assert_eq!(first.offset, 0);
        assert_eq!(a.allocate(3456).offset, 1024);
        a.free(first);
        assert_eq!(a.allocate(1024).offset, 0);
    }

    #[test]
    fn scenario_3_hole_is_subdivided_by_round_up_bin_selection() {
        let mut a = fresh();
        let first = a.allocate(1024);
        assert_eq!(a.allocate(3456).offset, 1024);
        a.free(first);
        assert_eq!(a.allocate(2345).offset, 4480);
        assert_eq!(a.allocate(456).offset, 0);
        assert_eq!(a.allocate(512).offset, 456);

        let report = a.storage_report();
        assert_ne!(report.largest_free_region, report.total_free_space);
    }

    #[test]
    fn scenario_4_coalescing_a_contiguous_run_satisfies_a_combined_request() {
        let mut a = fresh();
        let mib = 1024 * 1024;
        let mut allocations = Vec::with_capacity(256);
        for i in 0..256u32 {
            let alloc = a.allocate(mib);
            assert_eq!(alloc.offset, i * mib);
            allocations.push(alloc);
        }

        let report = a.storage_report();
        assert_eq!(report.total_free_space, 0);
        assert_eq!(report.largest_free_region, 0);

        // Indices 151, 152, 153, 154: four contiguous 1 MiB blocks, coalescing into a
        // single 4 MiB hole.
        for alloc in allocations.drain(151..155) {
            a.free(alloc);
        }

        let combined = a.allocate(4 * mib);
        assert_eq!(combined.offset, 151 * mib);
    }

    #[test]
    fn scenario_5_full_range_reclaimable_after_a_balanced_sequence() {
        let mut a = fresh();
        let x = a.allocate(1000);
        let y = a.allocate(2000);
        let z = a.allocate(3000);
        a.free(y);
        a.free(x);
        a.free(z);

        assert_eq!(a.allocate(SIZE).offset, 0);
    }

    #[test]
    fn scenario_6_out_of_nodes_after_max_allocs_minus_one() {
        // `reset` consumes one of the `max_allocs` slots for the initial full-range free
        // node, and `SIZE` is far larger than 16 bytes, so every `allocate(16)` leaves a
        // remainder and consumes one more slot for the split. That leaves
        // `max_allocs - 2` successes before the one-slot reserve check fails.
        let max_allocs = 8;
        let mut a = Allocator::<u32>::new(SIZE, max_allocs);
        for _ in 0..(max_allocs - 2) {
            assert!(a.allocate(16).is_success());
        }
        assert!(!a.allocate(16).is_success());
    }

    #[test]
    fn total_space_conservation_after_freeing_everything() {
        let mut a = fresh();
        let allocs: Vec<_> = [7u32, 4096, 99, 1 << 20, 3]
            .iter()
            .map(|&s| a.allocate(s))
            .collect();
        for alloc in allocs {
            a.free(alloc);
        }

        let report = a.storage_report();
        assert_eq!(report.total_free_space, SIZE);
        assert_eq!(report.largest_free_region, SIZE);
        assert_eq!(a.allocate(SIZE).offset, 0);
    }

    #[test]
    fn monotone_placement_with_no_frees() {
        let mut a = fresh();
        let sizes = [1u32, 17, 256, 4095, 65537];
        let mut expected = 0u32;
        for &s in &sizes {
            assert_eq!(a.allocate(s).offset, expected);
            expected += s;
        }
    }

    #[test]
    fn failed_allocation_reports_no_space_sentinel() {
        let mut a = Allocator::<u32>::new(1024, 8);
        let failed = a.allocate(2048);
        assert!(!failed.is_success());
        assert_eq!(failed.offset, NO_SPACE);
        assert!(failed.metadata.is_unused());
    }

    #[test]
    fn freeing_a_failed_allocation_is_a_no_op() {
        let mut a = Allocator::<u32>::new(1024, 8);
        let before = a.storage_report();
        a.free(a.allocate(4096));
        assert_eq!(a.storage_report(), before);
    }

    #[test]
    fn reset_restores_a_single_full_range_free_node() {
        let mut a = fresh();
        a.allocate(1234);
        a.allocate(5678);
        a.reset();

        let report = a.storage_report();
        assert_eq!(report.total_free_space, SIZE);
        assert_eq!(report.largest_free_region, SIZE);
        assert_eq!(a.allocate(SIZE).offset, 0);
    }

    #[test]
    fn storage_report_full_histogram_counts_match_occupancy() {
        let mut a = Allocator::<u32>::new(SIZE, 16);
        let a1 = a.allocate(64);
        let a2 = a.allocate(64);
        let _a3 = a.allocate(64);
        a.free(a1);
        a.free(a2);

        let full = a.storage_report_full();
        let total: u32 = full.bins.iter().map(|b| b.count).sum();
        // One free node for the re-coalesced [0, 128) hole, one for the tail.
        assert_eq!(total, 2);
    }

    #[test]
    fn sixteen_bit_index_profile_behaves_identically_for_small_capacities() {
        let mut a = Allocator::<u16>::new(4096, 64);
        let first = a.allocate(100);
        assert_eq!(first.offset, 0);
        a.free(first);
        assert_eq!(a.allocate(100).offset, 0);
    }

    /// Randomized action-sequence stress test, modeled on talc's
    /// `fuzz/fuzz_targets/fuzz_talc.rs` `Actions` enum: a pool of live allocations is
    /// grown and shrunk at random, with an invariant scan run periodically rather than
    /// on every step to keep this affordable at `cfg(test)` scale.
    #[test]
    fn randomized_action_sequence_preserves_invariants() {
        let rng = fastrand::Rng::with_seed(0xA110CA7E);
        let mut a = Allocator::<u32>::new(4 * 1024 * 1024, 4096);
        let mut live: Vec<Allocation<u32>> = Vec::new();

        for step in 0..20_000u32 {
            if live.is_empty() || rng.bool() {
                let size = rng.u32(0..=65536);
                let alloc = a.allocate(size);
                if alloc.is_success() {
                    live.push(alloc);
                }
            } else {
                let i = rng.usize(0..live.len());
                a.free(live.swap_remove(i));
            }

            if step % 256 == 0 {
                a.debug_check_invariants();
            }
        }

        for alloc in live {
            a.free(alloc);
        }
        a.debug_check_invariants();

        let report = a.storage_report();
        assert_eq!(report.total_free_space, a.size());
        assert_eq!(report.largest_free_region, a.size());
    }
}
