//! Read-only derived views over an [`Allocator`](crate::Allocator)'s free space.

use crate::bitmap::BIN_COUNT;
use crate::quantize::bin_to_size;

/// A coarse summary of free space.
///
/// `largest_free_region` is an *upper-envelope* value: it's the nominal size of the
/// highest non-empty bin, not the true size of the largest free block, since a bin
/// holds blocks in `[bin_to_size(b), bin_to_size(b+1))`. Callers using it as a
/// scheduling hint must tolerate up to ~12.5% pessimism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageReport {
    pub total_free_space: u32,
    pub largest_free_region: u32,
}

/// Occupancy of one size-class bin, as reported by [`Allocator::storage_report_full`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinReport {
    /// The bin's nominal (decoded) size.
    pub size: u32,
    /// The number of free nodes currently filed under this bin.
    pub count: u32,
}

/// A full per-bin histogram of free nodes, as returned by
/// [`Allocator::storage_report_full`](crate::Allocator::storage_report_full).
pub struct StorageReportFull {
    pub bins: [BinReport; BIN_COUNT as usize],
}

impl StorageReportFull {
    pub(crate) fn new() -> Self {
        let mut bins = [BinReport::default(); BIN_COUNT as usize];
        for (b, entry) in bins.iter_mut().enumerate() {
            entry.size = bin_to_size(b as u32);
        }
        StorageReportFull { bins }
    }
}
