//! End-to-end coverage of `walk_with_backend`: concatenation equals file
//! contents, strictly increasing offsets with no gaps, physical-scan-
//! consistent interleaving across files, hole zero-fill, and the empty-file
//! single-call special case. Most of these drive `MockBackend` directly;
//! the last test drives `Ext2Backend` against a synthetic on-disk image to
//! cover the real metadata decoder end to end.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::rc::Rc;

use extsweep::backend::mock::MockFsBuilder;
use extsweep::{EngineConfig, Ext2Backend, walk_with_backend};

const BS: u32 = 1024;
const EXT2_MAGIC: u16 = 0xEF53;

/// A scratch device backing the physical blocks the mock backend claims to
/// point at. Content is all zeros; these tests check lengths, offsets, and
/// hole zero-fill rather than specific byte patterns.
fn scratch_device() -> tempfile::NamedTempFile {
    let f = tempfile::NamedTempFile::new().expect("failed to create scratch device file");
    f.as_file().set_len(4 * 1024 * 1024).expect("failed to size scratch device");
    f
}

/// Collects every delivered `(inode, path, offset, data)` call in order, per
/// inode, for assertion.
#[derive(Default)]
struct Collected {
    by_inode: RefCell<HashMap<u64, Vec<(u64, Vec<u8>)>>>,
    file_len: RefCell<HashMap<u64, u64>>,
    call_order: RefCell<Vec<u64>>,
}

fn run_collect(fs: &extsweep::MockBackend, device_path: &str, start: &str, config: &EngineConfig) -> Rc<Collected> {
    let collected = Rc::new(Collected::default());
    let c = collected.clone();
    walk_with_backend::<(), _>(fs, device_path, start, config, &mut |inode, _path, pos, file_len, data, _s| {
        c.by_inode.borrow_mut().entry(inode).or_default().push((pos, data.to_vec()));
        c.file_len.borrow_mut().insert(inode, file_len);
        c.call_order.borrow_mut().push(inode);
        ControlFlow::Continue(())
    })
    .expect("walk should succeed");
    collected
}

fn reassembled(collected: &Collected, inode: u64) -> Vec<u8> {
    let by_inode = collected.by_inode.borrow();
    let calls = by_inode.get(&inode).expect("inode should have delivered blocks");
    let mut out = Vec::new();
    for (_, data) in calls {
        out.extend_from_slice(data);
    }
    out
}

#[test]
fn single_contiguous_file_concatenates_to_original_content() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    // 3 blocks, last one partial, content irrelevant (mock backend delivers
    // zeroed stripes, so we verify length and offsets rather than bytes).
    let ino = b.add_contiguous_file(root, "a.bin", (2 * BS as u64) + 100, 10);
    let fs = b.build();

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/a.bin", &EngineConfig::default());
    let data = reassembled(&collected, ino);
    assert_eq!(data.len(), (2 * BS as u64 + 100) as usize);
}

#[test]
fn offsets_are_strictly_increasing_with_no_gaps() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    let ino = b.add_contiguous_file(root, "a.bin", 5 * BS as u64, 50);
    let fs = b.build();

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/a.bin", &EngineConfig::default());
    let by_inode = collected.by_inode.borrow();
    let calls = &by_inode[&ino];
    let mut expected_pos = 0u64;
    for (pos, data) in calls {
        assert_eq!(*pos, expected_pos, "offsets must be contiguous with no gaps");
        expected_pos += data.len() as u64;
    }
    assert_eq!(expected_pos, 5 * BS as u64);
}

#[test]
fn hole_is_delivered_as_zeros_with_correct_total_length() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    // Block 1 is a hole (None), blocks 0 and 2 are physical.
    let ino = b.add_file(root, "sparse.bin", 3 * BS as u64, vec![Some(10), None, Some(11)]);
    let fs = b.build();

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/sparse.bin", &EngineConfig::default());
    let data = reassembled(&collected, ino);
    assert_eq!(data.len(), 3 * BS as usize);
    assert!(data[BS as usize..2 * BS as usize].iter().all(|&b| b == 0), "hole block must be all zeros");
}

#[test]
fn empty_file_produces_exactly_one_zero_length_call() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    let ino = b.add_file(root, "empty", 0, Vec::new());
    let fs = b.build();

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/empty", &EngineConfig::default());
    let by_inode = collected.by_inode.borrow();
    let calls = &by_inode[&ino];
    assert_eq!(calls.len(), 1, "empty files get exactly one callback");
    assert_eq!(calls[0].0, 0);
    assert!(calls[0].1.is_empty());
}

#[test]
fn recursion_reaches_nested_directories_and_all_files_are_delivered() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    let sub = b.add_dir(root, "sub");
    let a = b.add_contiguous_file(root, "a.bin", BS as u64, 5);
    let c = b.add_contiguous_file(sub, "c.bin", BS as u64, 6);
    b.add_symlink(root, "link"); // must be skipped, not followed
    let fs = b.build();

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/", &EngineConfig::default());
    let by_inode = collected.by_inode.borrow();
    assert!(by_inode.contains_key(&a));
    assert!(by_inode.contains_key(&c));
    assert_eq!(by_inode.len(), 2, "only the two regular files should deliver blocks");
}

#[test]
fn delivered_bytes_are_invariant_to_admission_budget() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    for i in 0..6u64 {
        b.add_contiguous_file(root, &format!("f{i}"), 2 * BS as u64 + 7, 100 + i * 10);
    }
    let fs = b.build();

    let mut wide = EngineConfig::default();
    wide.max_inodes = 100;
    let mut narrow = EngineConfig::default();
    narrow.max_inodes = 1;

    let dev = scratch_device();
    let dev_path = dev.path().to_str().unwrap();
    let wide_result = run_collect(&fs, dev_path, "/", &wide);
    let narrow_result = run_collect(&fs, dev_path, "/", &narrow);

    let total = |c: &Collected| -> usize {
        c.by_inode.borrow().values().map(|v| v.iter().map(|(_, d)| d.len()).sum::<usize>()).sum()
    };
    assert_eq!(total(&wide_result), total(&narrow_result));
    assert_eq!(wide_result.by_inode.borrow().len(), narrow_result.by_inode.borrow().len());
}

#[test]
fn delivery_order_across_files_follows_physical_block_order() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    // Two files whose blocks interleave physically: a@10,30 and b@20,40.
    let a = b.add_file(root, "a.bin", 2 * BS as u64, vec![Some(10), Some(30)]);
    let c = b.add_file(root, "b.bin", 2 * BS as u64, vec![Some(20), Some(40)]);
    let fs = b.build();

    let mut config = EngineConfig::default();
    config.max_inodes = 2;

    let dev = scratch_device();
    let collected = run_collect(&fs, dev.path().to_str().unwrap(), "/", &config);
    let order = collected.call_order.borrow();
    assert_eq!(
        order.as_slice(),
        &[a, c, a, c],
        "delivery must follow the physical scan order, interleaving across open inodes"
    );
}

/// Writes a 2-byte little-endian field at `off`.
fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

/// Writes a 4-byte little-endian field at `off`.
fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Hand-assembles a minimal single-block-group, revision-1 ext2 image: one
/// root directory holding one regular file, laid out block by block:
///
/// - block 0: boot block (unused)
/// - block 1: superblock (at byte offset 1024, matching `first_data_block=1`)
/// - block 2: block group descriptor table (one descriptor)
/// - block 3: block bitmap (unused by the reader)
/// - block 4: inode bitmap (unused by the reader)
/// - blocks 5-6: inode table (16 inodes * 128 bytes = 2 blocks)
/// - block 7: root directory entries ("." / ".." / "greeting.txt")
/// - blocks 8-9: the file's data
///
/// Field layout mirrors `RawSuperblock`/`RawBlockGroupDesc`/`RawInode`/
/// `RawDirEntry` in `src/backend/ext2.rs`.
fn build_ext2_image() -> (Vec<u8>, Vec<u8>, u64) {
    const BLOCK: usize = 1024;
    const INODE_SIZE: usize = 128;
    const INODES_PER_GROUP: u32 = 16;
    const ROOT_INO: u32 = 2;
    const FILE_INO: u32 = 12;
    const FILE_DATA_BLOCK0: u32 = 8;
    const FILE_DATA_BLOCK1: u32 = 9;
    const TOTAL_BLOCKS: usize = 11;

    let mut img = vec![0u8; TOTAL_BLOCKS * BLOCK];

    // Superblock, block 1 (byte offset 1024).
    let sb = &mut img[BLOCK..2 * BLOCK];
    put_u32(sb, 0, 16); // inodes_count
    put_u32(sb, 4, TOTAL_BLOCKS as u32); // blocks_count
    put_u32(sb, 20, 1); // first_data_block
    put_u32(sb, 24, 0); // log_block_size -> 1024 << 0
    put_u32(sb, 32, 8192); // blocks_per_group
    put_u32(sb, 40, INODES_PER_GROUP); // inodes_per_group
    put_u16(sb, 56, EXT2_MAGIC);
    put_u32(sb, 76, 1); // rev_level
    put_u16(sb, 88, INODE_SIZE as u16); // inode_size

    // Block group descriptor table, block 2.
    let bgdt = &mut img[2 * BLOCK..3 * BLOCK];
    put_u32(bgdt, 0, 3); // block_bitmap
    put_u32(bgdt, 4, 4); // inode_bitmap
    put_u32(bgdt, 8, 5); // inode_table

    // Inode table spans blocks 5-6; write root (index 1) and file (index 11).
    let inode_table_off = 5 * BLOCK;
    let write_inode = |img: &mut [u8], ino: u32, mode: u16, size: u32, blocks: &[u32]| {
        let index_in_group = (ino - 1) as usize;
        let off = inode_table_off + index_in_group * INODE_SIZE;
        put_u16(img, off, mode);
        put_u32(img, off + 4, size); // size_low
        let block_ptrs_off = off + 40;
        for (i, b) in blocks.iter().enumerate() {
            put_u32(img, block_ptrs_off + i * 4, *b);
        }
    };
    write_inode(&mut img, ROOT_INO, 0o040755, BLOCK as u32, &[7]);
    let file_size: u32 = BLOCK as u32 + 500;
    write_inode(&mut img, FILE_INO, 0o100644, file_size, &[FILE_DATA_BLOCK0, FILE_DATA_BLOCK1]);

    // Root directory data, block 7: ".", "..", then "greeting.txt" padded to
    // fill the rest of the block (classic ext2 linked-list layout).
    let dirblock = &mut img[7 * BLOCK..8 * BLOCK];
    let write_dirent = |buf: &mut [u8], off: usize, ino: u32, name: &str, rec_len: u16, file_type: u8| {
        put_u32(buf, off, ino);
        put_u16(buf, off + 4, rec_len);
        buf[off + 6] = name.len() as u8;
        buf[off + 7] = file_type;
        buf[off + 8..off + 8 + name.len()].copy_from_slice(name.as_bytes());
    };
    write_dirent(dirblock, 0, ROOT_INO, ".", 12, 2);
    write_dirent(dirblock, 12, ROOT_INO, "..", 12, 2);
    write_dirent(dirblock, 24, FILE_INO, "greeting.txt", (BLOCK - 24) as u16, 1);

    // File content: a recognizable repeating pattern across both blocks; the
    // reader clips the final block to `file_size` bytes.
    let pattern: Vec<u8> = (0..(2 * BLOCK)).map(|i| (i % 251) as u8).collect();
    img[8 * BLOCK..10 * BLOCK].copy_from_slice(&pattern);

    let expected = pattern[..file_size as usize].to_vec();
    (img, expected, file_size as u64)
}

#[test]
fn ext2_backend_reads_a_synthetic_on_disk_image_end_to_end() {
    use std::io::Write;

    let (image, expected_content, expected_len) = build_ext2_image();

    let mut dev_file = tempfile::NamedTempFile::new().expect("failed to create ext2 scratch image");
    dev_file.as_file_mut().write_all(&image).expect("failed to write ext2 image");
    dev_file.as_file().sync_all().expect("failed to flush ext2 image");
    let path = dev_file.path().to_str().unwrap();

    let fs = Ext2Backend::open(path).expect("should parse the synthetic image");

    let collected = Rc::new(Collected::default());
    let c = collected.clone();
    walk_with_backend::<(), _>(&fs, path, "/", &EngineConfig::default(), &mut |inode, entry_path, pos, file_len, data, _s| {
        c.by_inode.borrow_mut().entry(inode).or_default().push((pos, data.to_vec()));
        c.file_len.borrow_mut().insert(inode, file_len);
        assert_eq!(entry_path, "/greeting.txt");
        ControlFlow::Continue(())
    })
    .expect("walk should succeed against the real ext2 decoder");

    let by_inode = collected.by_inode.borrow();
    assert_eq!(by_inode.len(), 1, "only the one regular file should deliver blocks");
    let (&ino, _) = by_inode.iter().next().unwrap();
    drop(by_inode);

    let data = reassembled(&collected, ino);
    assert_eq!(data.len(), expected_len as usize);
    assert_eq!(data, expected_content);
    assert_eq!(*collected.file_len.borrow().get(&ino).unwrap(), expected_len);
}

#[test]
fn cancellation_stops_the_traversal_early() {
    let mut b = MockFsBuilder::new(BS);
    let root = b.root();
    b.add_contiguous_file(root, "a.bin", 10 * BS as u64, 1000);
    let fs = b.build();

    let dev = scratch_device();
    let mut seen = 0u32;
    let result = walk_with_backend::<(), _>(&fs, dev.path().to_str().unwrap(), "/a.bin", &EngineConfig::default(), &mut |_ino, _path, _pos, _len, _data, _s| {
        seen += 1;
        ControlFlow::Break(())
    });
    assert!(result.is_err(), "cancellation should surface as an error");
    assert_eq!(seen, 1, "callback should run exactly once before cancellation takes effect");
}
