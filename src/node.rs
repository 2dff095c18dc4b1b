//! [`Node`] descriptors, the [`NodeIndex`] storage trait, and the [`Pool`] arena.
//!
//! Every "pointer" in this crate is a [`Pool`] index into its `nodes` array, not a real
//! pointer. This sidesteps both cyclic reference counting and borrow-checker conflicts
//! for the bin lists and the neighbor chain, which are graph edges over storage the pool
//! owns outright — see `talc/src/node.rs`'s `LlistNode` for the pointer-based analogue
//! this crate's linkage is modeled on.

/// A storage type usable as a [`Node`] handle.
///
/// Two width profiles are provided: [`u32`] and [`u16`] (halving metadata cost, at a
/// much lower capacity ceiling). `MAX_COUNT` is the type's full range (`u16::MAX` /
/// `u32::MAX`, as a `usize`) rather than its full range plus one, because the top value
/// is reserved as the `UNUSED` sentinel and so the highest valid slot index is
/// `MAX_COUNT - 1`, never `MAX_COUNT`. This is a compile-time choice, not a runtime one —
/// there is exactly one allocation algorithm, so unlike `talc`'s
/// [`Binning`](../../talc/src/base/binning.rs) trait this is not meant to be implemented
/// outside this crate.
pub trait NodeIndex: Copy + Eq + core::fmt::Debug + 'static {
    /// The sentinel value standing for "no neighbor" / "end of list" / "no such bin".
    const UNUSED: Self;

    /// The largest number of live nodes this index type can address.
    const MAX_COUNT: usize;

    fn from_usize(v: usize) -> Self;
    fn to_usize(self) -> usize;

    #[inline]
    fn is_unused(self) -> bool {
        self == Self::UNUSED
    }
}

impl NodeIndex for u32 {
    const UNUSED: Self = u32::MAX;
    const MAX_COUNT: usize = u32::MAX as usize;

    #[inline]
    fn from_usize(v: usize) -> Self {
        v as u32
    }
    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

impl NodeIndex for u16 {
    const UNUSED: Self = u16::MAX;
    const MAX_COUNT: usize = u16::MAX as usize;

    #[inline]
    fn from_usize(v: usize) -> Self {
        v as u16
    }
    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

/// A descriptor of one contiguous sub-range of the managed address space.
///
/// `bin_list_prev`/`bin_list_next` thread the per-bin free list (§4.4) and are only
/// meaningful while `used == false`. `neighbor_prev`/`neighbor_next` thread the
/// address-ordered chain of *every* node, free or used (§4.5), and are always meaningful.
#[derive(Debug, Clone, Copy)]
pub struct Node<Idx: NodeIndex> {
    pub data_offset: u32,
    pub data_size: u32,
    pub used: bool,

    pub bin_list_prev: Idx,
    pub bin_list_next: Idx,

    pub neighbor_prev: Idx,
    pub neighbor_next: Idx,
}

impl<Idx: NodeIndex> Node<Idx> {
    pub(crate) fn unused() -> Self {
        Node {
            data_offset: 0,
            data_size: 0,
            used: false,
            bin_list_prev: Idx::UNUSED,
            bin_list_next: Idx::UNUSED,
            neighbor_prev: Idx::UNUSED,
            neighbor_next: Idx::UNUSED,
        }
    }
}

/// Fixed-capacity store of [`Node`] slots plus the explicit freelist stack (§4.3).
///
/// A slot is "free" (present in the stack) exactly when it is not referenced by the
/// neighbor chain — i.e. unused() as it sits in reserve, not to be confused with a
/// `Node` whose `used` field is `false` but which is still part of the chain as a free
/// block. Grounded on the same push/pop-a-stack idea as talc's internal arena, but here
/// the stack holds indices rather than the teacher's raw pointers.
pub(crate) struct Pool<Idx: NodeIndex> {
    nodes: alloc::vec::Vec<Node<Idx>>,
    free: alloc::vec::Vec<Idx>,
    /// Mirrors `free` as an O(1)-queryable mask, for the debug invariant scan only.
    free_mask: alloc::vec::Vec<bool>,
}

impl<Idx: NodeIndex> Pool<Idx> {
    pub(crate) fn new(capacity: usize) -> Self {
        let nodes = alloc::vec![Node::unused(); capacity];
        let free = (0..capacity).rev().map(Idx::from_usize).collect();
        let free_mask = alloc::vec![true; capacity];
        Pool { nodes, free, free_mask }
    }

    #[inline]
    pub(crate) fn get(&self, idx: Idx) -> &Node<Idx> {
        &self.nodes[idx.to_usize()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: Idx) -> &mut Node<Idx> {
        &mut self.nodes[idx.to_usize()]
    }

    #[inline]
    pub(crate) fn set(&mut self, idx: Idx, node: Node<Idx>) {
        self.nodes[idx.to_usize()] = node;
    }

    /// Number of slots currently in reserve (not referenced by the neighbor chain).
    #[inline]
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Pops a slot off the freelist stack, unconditionally. Callers that must honor the
    /// one-slot reservation (`free_count() <= 1` means "out of nodes" for allocation
    /// purposes) check that themselves before calling this.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Idx> {
        let idx = self.free.pop()?;
        self.free_mask[idx.to_usize()] = false;
        Some(idx)
    }

    #[inline]
    pub(crate) fn push(&mut self, idx: Idx) {
        self.free.push(idx);
        self.free_mask[idx.to_usize()] = true;
    }

    /// `true` for slots currently in reserve. Debug-scan use only.
    #[inline]
    pub(crate) fn is_free(&self, idx: Idx) -> bool {
        self.free_mask[idx.to_usize()]
    }
}
