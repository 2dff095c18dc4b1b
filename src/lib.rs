//! A hard-realtime, `O(1)` offset allocator.
//!
//! This crate sub-allocates an abstract address range `[0, size)` by handing out integer
//! offsets, the way a GPU heap or virtual-memory arena sub-allocator would. It owns no
//! backing memory itself — callers interpret the returned offsets against whatever
//! resource they're carving up (a buffer, a file region, a ring of descriptor slots).
//!
//! The design is a two-level size-class bitmap over 256 bins, a fixed-capacity node pool
//! with an explicit freelist, and an address-ordered neighbor chain enabling `O(1)`
//! coalescing on free — all orchestrated by [`Allocator`].
//!
//! ```
//! use offset_allocator::Allocator;
//!
//! let mut a = Allocator::<u32>::new(1024, 64);
//! let x = a.allocate(100);
//! assert_eq!(x.offset, 0);
//! a.free(x);
//! assert_eq!(a.storage_report().total_free_space, 1024);
//! ```
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod allocator;
mod bitmap;
mod node;
mod quantize;
mod report;

pub use allocator::{Allocation, Allocator, NO_SPACE};
pub use node::NodeIndex;
pub use report::{BinReport, StorageReport, StorageReportFull};
