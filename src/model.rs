//! Core data model: `InodeTask`, `InodeInfo`, `BlockRec`, `Stripe`. The C
//! original threads these through manually-maintained linked
//! lists with raw reference counts; here the multi-owner `Stripe` is an
//! `Rc<Stripe>` with an explicit release counter (mirrored, not replaced, by
//! `Rc::strong_count` — see DESIGN.md) and `InodeInfo` is `Rc<RefCell<..>>`,
//! reached both from the scheduler's bookkeeping and from every `BlockRec`
//! still waiting to deliver into it.

use std::cell::{Cell, RefCell};
use std::ops::ControlFlow;
use std::rc::Rc;

use crate::heap::InodeHeap;

/// The signature every block of every regular file is eventually delivered
/// through: `(inode, path, byte_offset, file_length, data, opaque_slot)`.
/// Returning `ControlFlow::Break` cancels the remainder of the traversal.
pub type ClientCallback<'cb, S> =
    dyn FnMut(u64, &str, u64, u64, &[u8], &mut S) -> ControlFlow<()> + 'cb;

/// A file discovered during enumeration, awaiting block scanning.
#[derive(Debug, Clone)]
pub struct InodeTask {
    pub inode: u64,
    pub path: Rc<str>,
    pub len: u64,
}

/// An open file being streamed to the client.
///
/// `S` is the caller-supplied per-inode scratch type (the callback's
/// `opaque_slot`); it travels with the inode from first block to last.
pub struct InodeInfo<S> {
    pub inode: u64,
    pub path: Rc<str>,
    pub len: u64,
    pub blocks_scanned: u64,
    pub blocks_read: u64,
    pub references: u32,
    pub heap: Option<InodeHeap<S>>,
    pub cb_private: S,
}

impl<S> InodeInfo<S> {
    pub fn new(inode: u64, path: Rc<str>, len: u64, cb_private: S) -> Self {
        Self {
            inode,
            path,
            len,
            blocks_scanned: 0,
            blocks_read: 0,
            references: 0,
            heap: None,
            cb_private,
        }
    }
}

pub type SharedInode<S> = Rc<RefCell<InodeInfo<S>>>;

/// A maximal run of physically contiguous blocks belonging to one inode.
///
/// `stripe_ptr` is `None` until the scheduler assigns this block to a
/// stripe; it is always `Some` by the time the block reaches the
/// reassembler.
pub struct BlockRec<S> {
    pub physical_start: u64,
    pub logical_block: u64,
    pub num_blocks: u64,
    /// Byte length actually deliverable, clipped to the file's declared tail.
    pub byte_len: usize,
    pub inode: SharedInode<S>,
    pub stripe_ptr: Option<StripePtr>,
}

impl<S> BlockRec<S> {
    pub fn new(physical_start: u64, logical_block: u64, inode: SharedInode<S>) -> Self {
        Self {
            physical_start,
            logical_block,
            num_blocks: 0,
            byte_len: 0,
            inode,
            stripe_ptr: None,
        }
    }

    /// True if a run starting at `other_physical` begins exactly where this
    /// run's physical span ends, i.e. they can be merged into one `BlockRec`
    /// during scanning.
    pub fn is_physically_adjacent_to(&self, other_physical: u64) -> bool {
        self.physical_start + self.num_blocks == other_physical
    }
}

/// A reference into a shared `Stripe`'s data buffer.
pub struct StripePtr {
    pub stripe: Rc<Stripe>,
    pub offset: usize,
    pub len: usize,
}

/// A physically contiguous I/O buffer shared by one or more `BlockRec`s.
///
/// Freed (dropped) when the last referencing block is delivered; `release`
/// returns the remaining reference count so callers can decide whether to
/// drop their `Rc` (the `Rc` itself will deallocate `data` once the last
/// strong reference goes away, same as the C original's `free(stripe->data)`
/// on `references == 0`, just driven by Rust's ownership rather than a
/// manual check).
pub struct Stripe {
    pub data: Vec<u8>,
    pub byte_len: usize,
    references: Cell<u32>,
}

impl Stripe {
    pub fn new(data: Vec<u8>, byte_len: usize, references: u32) -> Self {
        Self {
            data,
            byte_len,
            references: Cell::new(references),
        }
    }

    /// Decrement the reference count and return the new value.
    pub fn release(&self) -> u32 {
        let n = self.references.get().saturating_sub(1);
        self.references.set(n);
        n
    }
}
