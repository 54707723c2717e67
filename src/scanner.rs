//! Block Scanner, grounded in
//! `examples/original_source/src/dj.c`'s `scan_block`/`scan_blocks`: turns
//! each `InodeTask`'s logical->physical block map into a list of
//! maximal-run `BlockRec`s, coalescing adjacent physical runs and
//! backfilling hole callbacks the filesystem library skips.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::backend::FsBackend;
use crate::error::Result;
use crate::model::{BlockRec, ClientCallback, InodeInfo, InodeTask, SharedInode};

/// One file's scanned block list, ready for the scheduler to admit.
pub type ScanGroup<S> = (SharedInode<S>, Vec<BlockRec<S>>);

struct ScanState<S> {
    block_size: u64,
    inode: SharedInode<S>,
    blocks: Vec<BlockRec<S>>,
}

impl<S> ScanState<S> {
    /// Mirrors `scan_block` in the C original, including its recursive
    /// self-call to backfill skipped hole callbacks. `physical` is `None`
    /// for a hole.
    fn scan_block(&mut self, physical: Option<u64>, logical: u64) {
        let (len, blocks_scanned) = {
            let info = self.inode.borrow();
            (info.len, info.blocks_scanned)
        };
        // Ignore the virtual trailing block some filesystems report to
        // leave room for appending writers, unless the file is empty.
        if logical * self.block_size >= len || len == 0 {
            return;
        }

        let coalesces = physical.is_some()
            && self
                .blocks
                .last()
                .is_some_and(|b| b.is_physically_adjacent_to(physical.unwrap()));

        if !coalesces {
            // Holes never get passed to this function in practice; fix
            // that up here before this new BlockRec is created.
            for i in blocks_scanned..logical {
                self.scan_block(None, i);
            }
            self.inode.borrow_mut().references += 1;
            self.blocks
                .push(BlockRec::new(physical.unwrap_or(0), logical, self.inode.clone()));
        }

        let mut info = self.inode.borrow_mut();
        info.blocks_scanned += 1;
        let rec = self.blocks.last_mut().expect("just pushed or coalesced onto an existing record");
        rec.num_blocks += 1;

        let logical_pos = rec.logical_block * self.block_size;
        let remaining = info.len - logical_pos;
        let simple_len = rec.num_blocks * self.block_size;
        rec.byte_len = simple_len.min(remaining) as usize;
    }
}

/// Scan every task's blocks, dispatching the one required callback directly
/// for empty files (zero-length files get exactly one zero-length
/// callback and never enter the scheduler) and returning a queue of
/// non-empty files' block groups for the scheduler to admit.
pub fn scan<S: Default>(
    fs: &dyn FsBackend,
    tasks: Vec<InodeTask>,
    cb: &mut ClientCallback<S>,
) -> Result<VecDeque<ScanGroup<S>>> {
    let block_size = fs.block_size() as u64;
    let mut groups = VecDeque::new();

    for task in tasks {
        if task.len == 0 {
            let mut slot = S::default();
            if cb(task.inode, task.path.as_ref(), 0, 0, &[], &mut slot).is_break() {
                return Err(crate::error::EngineError::Cancelled);
            }
            continue;
        }

        debug!(inode = task.inode, path = %task.path, "scanning blocks");

        let inode = Rc::new(RefCell::new(InodeInfo::new(
            task.inode,
            task.path.clone(),
            task.len,
            S::default(),
        )));
        let mut state = ScanState {
            block_size,
            inode: inode.clone(),
            blocks: Vec::new(),
        };

        fs.block_iterate(task.inode, &mut |ev| {
            state.scan_block(ev.physical_block, ev.logical_block);
            std::ops::ControlFlow::Continue(())
        })?;

        // FIXME: trailing holes never get backfilled if the library's last
        // block callback lands before the file's final logical block.
        if !state.blocks.is_empty() {
            groups.push_back((inode, state.blocks));
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFsBuilder;
    use std::ops::ControlFlow;

    fn collect_calls<S: Default>(
        fs: &dyn FsBackend,
        tasks: Vec<InodeTask>,
    ) -> (VecDeque<ScanGroup<S>>, Vec<(u64, u64, u64, usize)>) {
        let mut calls = Vec::new();
        let groups = scan(
            fs,
            tasks,
            &mut |ino, _path, pos, file_len, data, _slot: &mut S| {
                calls.push((ino, pos, file_len, data.len()));
                ControlFlow::Continue(())
            },
        )
        .unwrap();
        (groups, calls)
    }

    #[test]
    fn empty_file_gets_exactly_one_zero_length_call() {
        let mut b = MockFsBuilder::new(4096);
        let root = b.root();
        b.add_file(root, "empty", 0, vec![]);
        let fs = b.build();
        let tasks = vec![InodeTask { inode: 2, path: Rc::from("/empty"), len: 0 }];

        let (groups, calls) = collect_calls::<()>(&fs, tasks);
        assert!(groups.is_empty());
        assert_eq!(calls, vec![(2, 0, 0, 0)]);
    }

    #[test]
    fn contiguous_blocks_coalesce_into_one_record() {
        let mut b = MockFsBuilder::new(4096);
        let root = b.root();
        let ino = b.add_contiguous_file(root, "a", 9000, 50);
        let fs = b.build();
        let tasks = vec![InodeTask { inode: ino, path: Rc::from("/a"), len: 9000 }];

        let (groups, _calls) = collect_calls::<()>(&fs, tasks);
        assert_eq!(groups.len(), 1);
        let (inode, blocks) = &groups[0];
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].num_blocks, 3);
        assert_eq!(blocks[0].physical_start, 50);
        assert_eq!(inode.borrow().references, 1);
        // tail clip: 9000 bytes over 3 blocks of 4096 => last block clipped.
        assert_eq!(blocks[0].byte_len, 9000);
    }

    #[test]
    fn holes_never_coalesce_and_are_backfilled() {
        let mut b = MockFsBuilder::new(4096);
        let root = b.root();
        let ino = b.add_file(root, "sparse", 12288, vec![Some(10), None, Some(12)]);
        let fs = b.build();
        let tasks = vec![InodeTask { inode: ino, path: Rc::from("/sparse"), len: 12288 }];

        let (groups, _calls) = collect_calls::<()>(&fs, tasks);
        assert_eq!(groups.len(), 1);
        let (_inode, blocks) = &groups[0];
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].physical_start, 10);
        assert_eq!(blocks[1].physical_start, 0);
        assert_eq!(blocks[2].physical_start, 12);
        assert!(blocks.iter().all(|b| b.num_blocks == 1));
    }
}
