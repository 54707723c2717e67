//! Per-inode min-heap over logical block number.
//!
//! The C original hand-rolls an array-backed binary heap (`heap.c`) with an
//! explicit `max_size` that aborts the process on overflow. `BinaryHeap` is
//! the idiomatic replacement; the capacity check is kept explicit on top of
//! it because the bound is a deliberate invariant (one BlockRec per logical
//! run, never more than `file_blocks + 1` in flight for a given inode), not
//! an implementation accident to be shrugged off onto amortized growth.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{EngineError, Result};
use crate::model::BlockRec;

struct HeapEntry<S>(BlockRec<S>);

impl<S> PartialEq for HeapEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.0.logical_block == other.0.logical_block
    }
}
impl<S> Eq for HeapEntry<S> {}

impl<S> PartialOrd for HeapEntry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for HeapEntry<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that `BinaryHeap` (a max-heap) behaves as a min-heap.
        other.0.logical_block.cmp(&self.0.logical_block)
    }
}

pub struct InodeHeap<S> {
    capacity: usize,
    heap: BinaryHeap<HeapEntry<S>>,
}

impl<S> InodeHeap<S> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn insert(&mut self, block: BlockRec<S>) -> Result<()> {
        if self.heap.len() >= self.capacity {
            return Err(EngineError::FatalInvariant(
                "inode heap insert exceeds capacity",
            ));
        }
        self.heap.push(HeapEntry(block));
        Ok(())
    }

    pub fn peek_min_logical(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.0.logical_block)
    }

    pub fn del_min(&mut self) -> Option<BlockRec<S>> {
        self.heap.pop().map(|e| e.0)
    }
}
