//! Per-Inode Reassembler, grounded in
//! `examples/original_source/src/dj.c`'s `heapify_stripe`/`flush_inode_blocks`:
//! buffers out-of-order physical arrivals in a per-inode min-heap and drains
//! them to the client callback the moment they become the next logical
//! block due.

use std::ops::ControlFlow;

use crate::error::{EngineError, Result};
use crate::heap::InodeHeap;
use crate::model::{BlockRec, ClientCallback, SharedInode};

/// Insert `block` into its owning inode's heap (creating the heap on first
/// use) and flush whatever is now deliverable.
///
/// Returns `ControlFlow::Break(())` if the client callback requested
/// cancellation; the caller must stop dispatching further blocks in that
/// case.
pub fn heapify_and_flush<S: Default>(
    block: BlockRec<S>,
    block_size: u32,
    cb: &mut ClientCallback<S>,
    open_inodes: &mut usize,
) -> Result<ControlFlow<()>> {
    let inode = block.inode.clone();

    {
        let mut info = inode.borrow_mut();
        if info.heap.is_none() {
            let capacity = info.len.div_ceil(block_size as u64) as usize + 1;
            info.heap = Some(InodeHeap::with_capacity(capacity));
        }
        info.heap.as_mut().expect("heap created above").insert(block)?;
    }

    flush(&inode, block_size, cb, open_inodes)
}

fn flush<S: Default>(
    inode: &SharedInode<S>,
    block_size: u32,
    cb: &mut ClientCallback<S>,
    open_inodes: &mut usize,
) -> Result<ControlFlow<()>> {
    loop {
        let blocks_read = inode.borrow().blocks_read;
        let min_logical = match &inode.borrow().heap {
            Some(h) => h.peek_min_logical(),
            None => None,
        };
        let Some(min_logical) = min_logical else {
            return Ok(ControlFlow::Continue(()));
        };
        if min_logical != blocks_read {
            return Ok(ControlFlow::Continue(()));
        }

        let nb = {
            let mut info = inode.borrow_mut();
            info.heap
                .as_mut()
                .expect("heap is Some since peek_min_logical returned Some")
                .del_min()
                .expect("just peeked this minimum")
        };

        if inode.borrow().references == 0 {
            return Err(EngineError::FatalInvariant(
                "inode reached zero references with undelivered blocks",
            ));
        }

        let stripe_ptr = nb
            .stripe_ptr
            .as_ref()
            .expect("block reached the reassembler without a stripe assignment");
        let data = &stripe_ptr.stripe.data[stripe_ptr.offset..stripe_ptr.offset + stripe_ptr.len];

        let (ino_num, path, pos, file_len) = {
            let info = inode.borrow();
            (info.inode, info.path.clone(), nb.logical_block * block_size as u64, info.len)
        };
        let flow = {
            let mut info = inode.borrow_mut();
            cb(ino_num, path.as_ref(), pos, file_len, data, &mut info.cb_private)
        };

        inode.borrow_mut().blocks_read += nb.num_blocks;
        stripe_ptr.stripe.release();
        drop(nb);

        let done = {
            let mut info = inode.borrow_mut();
            info.references -= 1;
            info.references == 0
        };
        if done {
            inode.borrow_mut().heap = None;
            *open_inodes -= 1;
        }

        if flow.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        if done {
            return Ok(ControlFlow::Continue(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InodeInfo, Stripe, StripePtr};
    use std::cell::RefCell;
    use std::rc::Rc;

    const BS: u32 = 4;

    fn make_inode(references: u32) -> SharedInode<()> {
        let mut info = InodeInfo::new(1, Rc::from("/t"), 2 * BS as u64, ());
        info.references = references;
        Rc::new(RefCell::new(info))
    }

    fn make_block(inode: &SharedInode<()>, logical: u64, byte: u8) -> BlockRec<()> {
        let stripe = Rc::new(Stripe::new(vec![byte; BS as usize], BS as usize, 1));
        let mut b = BlockRec::new(logical, logical, inode.clone());
        b.num_blocks = 1;
        b.byte_len = BS as usize;
        b.stripe_ptr = Some(StripePtr { stripe, offset: 0, len: BS as usize });
        b
    }

    #[test]
    fn out_of_order_arrivals_flush_in_logical_order() {
        let inode = make_inode(2);
        let mut open_inodes = 1usize;
        let mut delivered = Vec::new();
        let mut cb = |_ino: u64, _path: &str, pos: u64, _len: u64, data: &[u8], _s: &mut ()| {
            delivered.push((pos, data[0]));
            ControlFlow::Continue(())
        };

        // Block 1 arrives before block 0; nothing should flush yet.
        let flow = heapify_and_flush(make_block(&inode, 1, 9), BS, &mut cb, &mut open_inodes).unwrap();
        assert!(flow.is_continue());
        assert!(delivered.is_empty());

        // Block 0 arrives: both blocks flush in logical order.
        let flow = heapify_and_flush(make_block(&inode, 0, 5), BS, &mut cb, &mut open_inodes).unwrap();
        assert!(flow.is_continue());
        assert_eq!(delivered, vec![(0, 5), (BS as u64, 9)]);
        assert_eq!(open_inodes, 0, "inode should close once all blocks are delivered");
    }

    #[test]
    fn callback_cancellation_propagates_as_break() {
        let inode = make_inode(2);
        let mut open_inodes = 1usize;
        let mut cb = |_ino: u64, _path: &str, _pos: u64, _len: u64, _data: &[u8], _s: &mut ()| ControlFlow::Break(());

        let flow = heapify_and_flush(make_block(&inode, 0, 1), BS, &mut cb, &mut open_inodes).unwrap();
        assert!(flow.is_break());
        assert_eq!(open_inodes, 1, "inode is still open since only one of two blocks delivered");
    }
}
