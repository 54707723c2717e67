//! Stripe Scheduler, grounded in
//! `examples/original_source/src/dj.c`'s `iterate_dir`/`next_stripe`/
//! `read_stripe_data`: admits inodes up to a budget, sorts their blocks by
//! physical position, coalesces runs into stripes within
//! `coalesce_distance`, and issues one read per stripe.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::io::BlockDevice;
use crate::model::{BlockRec, ClientCallback, Stripe, StripePtr};
use crate::reassemble;
use crate::scanner::ScanGroup;

struct StripePlan {
    consumed: usize,
    byte_len: usize,
    first_physical: u64,
    /// Per-consumed-block `(offset, len)` into the stripe buffer, in the
    /// same order as the slice that was planned.
    offsets: Vec<(usize, usize)>,
}

/// Look ahead from `blocks[0]` and decide how many leading blocks can share
/// one stripe read, mirroring `next_stripe`'s forward walk. Always consumes
/// at least one block since the first gap is defined as zero.
fn plan_stripe<S>(blocks: &[BlockRec<S>], coalesce_distance: u64, block_size: u64) -> StripePlan {
    let first_physical = blocks[0].physical_start;
    let mut byte_len: u64 = 0;
    let mut offsets = Vec::new();
    let mut prev_end: Option<u64> = None;

    for b in blocks {
        let gap = match prev_end {
            None => 0,
            Some(end) => b.physical_start - end,
        };
        if gap > coalesce_distance {
            break;
        }
        let offset = (b.physical_start - first_physical) * block_size;
        offsets.push((offset as usize, b.byte_len));
        byte_len += b.num_blocks * block_size + gap * block_size;
        prev_end = Some(b.physical_start + b.num_blocks);
    }

    StripePlan {
        consumed: offsets.len(),
        byte_len: byte_len as usize,
        first_physical,
        offsets,
    }
}

/// Drive the scheduler and reassembler to completion. `inode_groups` is the
/// per-file block lists produced by the scanner; `device` is `None` when
/// every admitted block turns out to be a synthetic hole stripe (no reads
/// ever issued), which legitimately happens in tests built purely from
/// `MockBackend` holes.
pub fn run<S: Default>(
    config: &EngineConfig,
    device: Option<&BlockDevice>,
    block_size: u32,
    mut inode_groups: VecDeque<ScanGroup<S>>,
    cb: &mut ClientCallback<S>,
) -> Result<()> {
    let mut open_inodes: usize = 0;
    let mut scheduled: Vec<BlockRec<S>> = Vec::new();

    info!("BEGIN BLOCK READ");

    loop {
        while open_inodes < config.max_inodes {
            match inode_groups.pop_front() {
                Some((_inode, blocks)) => {
                    if !blocks.is_empty() {
                        scheduled.extend(blocks);
                        open_inodes += 1;
                    }
                }
                None => break,
            }
        }

        if scheduled.is_empty() {
            break;
        }

        scheduled.sort_by_key(|b| b.physical_start);
        // Informational only: the C original computes this per-inode
        // block budget but never enforces it either (see DESIGN.md).
        let max_inode_blocks = if open_inodes > 0 {
            config.max_blocks.div_ceil(open_inodes)
        } else {
            config.max_blocks
        };
        debug!(open_inodes, max_inode_blocks, "admitted batch sorted by physical block");

        let mut residual: Vec<BlockRec<S>> = Vec::new();

        while !scheduled.is_empty() {
            let plan = plan_stripe(&scheduled, config.coalesce_distance, block_size as u64);

            if plan.consumed == 0 {
                // Believed unreachable with the current admission policy;
                // kept as a conservation-of-blocks safety net (see
                // DESIGN.md).
                residual.push(scheduled.remove(0));
                continue;
            }

            let mut group: Vec<BlockRec<S>> = scheduled.drain(0..plan.consumed).collect();

            debug!(
                physical = plan.first_physical,
                bytes = plan.byte_len,
                blocks = group.len(),
                "reading stripe"
            );

            let data = if plan.first_physical == 0 {
                vec![0u8; plan.byte_len]
            } else {
                let device = device.expect("non-hole stripe requires an open device");
                let mut d = device.read_at(plan.first_physical * block_size as u64, plan.byte_len)?;
                d.resize(plan.byte_len, 0);
                d
            };

            let stripe = Rc::new(Stripe::new(data, plan.byte_len, group.len() as u32));
            for (b, (offset, len)) in group.iter_mut().zip(plan.offsets.iter()) {
                b.stripe_ptr = Some(StripePtr { stripe: stripe.clone(), offset: *offset, len: *len });
            }

            for block in group {
                let flow = reassemble::heapify_and_flush(block, block_size, cb, &mut open_inodes)?;
                if flow.is_break() {
                    return Err(crate::error::EngineError::Cancelled);
                }
            }
        }

        scheduled = residual;

        if scheduled.is_empty() && inode_groups.is_empty() {
            break;
        }
    }

    info!("END BLOCK READ");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InodeInfo;
    use std::cell::RefCell;
    use std::io::Write;
    use std::ops::ControlFlow;

    fn block(inode: &crate::model::SharedInode<()>, physical: u64, num_blocks: u64) -> BlockRec<()> {
        let mut b = BlockRec::new(physical, 0, inode.clone());
        b.num_blocks = num_blocks;
        b.byte_len = (num_blocks * 4) as usize;
        b
    }

    #[test]
    fn plan_stripe_coalesces_within_distance_and_stops_at_a_wide_gap() {
        let inode = Rc::new(RefCell::new(InodeInfo::new(1, Rc::from("/t"), 16, ())));
        let blocks = vec![
            block(&inode, 10, 1),
            block(&inode, 11, 1), // contiguous, gap 0
            block(&inode, 20, 1), // gap of 8 beyond distance 2
        ];

        let plan = plan_stripe(&blocks, 2, 4);
        assert_eq!(plan.consumed, 2, "only the first two blocks fit within the coalesce distance");
        assert_eq!(plan.first_physical, 10);
        assert_eq!(plan.byte_len, 8);
    }

    #[test]
    fn plan_stripe_always_consumes_at_least_one_block() {
        let inode = Rc::new(RefCell::new(InodeInfo::new(1, Rc::from("/t"), 16, ())));
        let blocks = vec![block(&inode, 10, 1), block(&inode, 999, 1)];

        let plan = plan_stripe(&blocks, 0, 4);
        assert_eq!(plan.consumed, 1);
    }

    #[test]
    fn run_delivers_exact_bytes_from_the_device() {
        let mut dev_file = tempfile::NamedTempFile::new().unwrap();
        let block_size = 4u32;
        // Physical block 2 holds a recognizable 4-byte pattern.
        dev_file.as_file_mut().write_all(&[0u8; 8]).unwrap();
        dev_file.as_file_mut().write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        dev_file.as_file().sync_all().unwrap();

        let device = BlockDevice::open(dev_file.path().to_str().unwrap(), false, false).unwrap();

        let inode = Rc::new(RefCell::new(InodeInfo::new(7, Rc::from("/f"), block_size as u64, ())));
        let mut rec = BlockRec::new(2, 0, inode.clone());
        rec.num_blocks = 1;
        rec.byte_len = block_size as usize;
        inode.borrow_mut().references = 1;

        let mut groups = VecDeque::new();
        groups.push_back((inode, vec![rec]));

        let mut delivered = Vec::new();
        let config = EngineConfig::default();
        let mut cb = |_ino: u64, _path: &str, pos: u64, _len: u64, data: &[u8], _s: &mut ()| {
            delivered.push((pos, data.to_vec()));
            ControlFlow::Continue(())
        };

        run::<()>(&config, Some(&device), block_size, groups, &mut cb).unwrap();
        assert_eq!(delivered, vec![(0u64, vec![0xAA, 0xBB, 0xCC, 0xDD])]);
    }
}
