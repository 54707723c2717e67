//! In-memory, fully scriptable `FsBackend` used to reproduce arbitrary
//! physical/logical block layouts without needing a real filesystem image —
//! holes, tail fragments, and arbitrary physical placement are all directly
//! constructible.

use std::collections::HashMap;
use std::ops::ControlFlow;

use crate::backend::{BlockEvent, DirEntry, FileKind, FsBackend, InodeMeta};
use crate::error::{EngineError, Result};

struct MockFile {
    size: u64,
    /// One entry per logical block scanned in order; `None` is a hole.
    blocks: Vec<Option<u64>>,
}

enum MockNode {
    Dir(Vec<(String, u64)>),
    File(MockFile),
    Symlink,
}

pub const MOCK_ROOT_INO: u64 = 1;

/// Builds a `MockBackend` by hand, the way `examples/original_source` builds
/// a real filesystem on disk before pointing `dj` at it.
pub struct MockFsBuilder {
    block_size: u32,
    next_ino: u64,
    nodes: HashMap<u64, MockNode>,
}

impl MockFsBuilder {
    pub fn new(block_size: u32) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(MOCK_ROOT_INO, MockNode::Dir(Vec::new()));
        Self {
            block_size,
            next_ino: MOCK_ROOT_INO + 1,
            nodes,
        }
    }

    pub fn root(&self) -> u64 {
        MOCK_ROOT_INO
    }

    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn link(&mut self, parent: u64, name: &str, ino: u64) {
        if let Some(MockNode::Dir(entries)) = self.nodes.get_mut(&parent) {
            entries.push((name.to_string(), ino));
        } else {
            panic!("parent {parent} is not a directory");
        }
    }

    pub fn add_dir(&mut self, parent: u64, name: &str) -> u64 {
        let ino = self.alloc_ino();
        self.nodes.insert(ino, MockNode::Dir(Vec::new()));
        self.link(parent, name, ino);
        ino
    }

    pub fn add_symlink(&mut self, parent: u64, name: &str) -> u64 {
        let ino = self.alloc_ino();
        self.nodes.insert(ino, MockNode::Symlink);
        self.link(parent, name, ino);
        ino
    }

    /// Add a regular file with an explicit logical->physical block map.
    /// `blocks[i] == None` means logical block `i` is a hole.
    pub fn add_file(&mut self, parent: u64, name: &str, size: u64, blocks: Vec<Option<u64>>) -> u64 {
        let ino = self.alloc_ino();
        self.nodes.insert(ino, MockNode::File(MockFile { size, blocks }));
        self.link(parent, name, ino);
        ino
    }

    /// Add a regular file whose blocks are contiguous starting at
    /// `first_physical`, convenient for the common case.
    pub fn add_contiguous_file(
        &mut self,
        parent: u64,
        name: &str,
        size: u64,
        first_physical: u64,
    ) -> u64 {
        let nblocks = size.div_ceil(self.block_size as u64).max(1) as usize;
        let blocks = (0..nblocks).map(|i| Some(first_physical + i as u64)).collect();
        self.add_file(parent, name, size, blocks)
    }

    pub fn build(self) -> MockBackend {
        MockBackend {
            block_size: self.block_size,
            nodes: self.nodes,
        }
    }
}

pub struct MockBackend {
    block_size: u32,
    nodes: HashMap<u64, MockNode>,
}

impl MockBackend {
    fn kind_of(&self, ino: u64) -> Result<FileKind> {
        match self.nodes.get(&ino) {
            Some(MockNode::Dir(_)) => Ok(FileKind::Directory),
            Some(MockNode::File(_)) => Ok(FileKind::RegularFile),
            Some(MockNode::Symlink) => Ok(FileKind::Symlink),
            None => Err(EngineError::Config(format!("no such inode {ino}"))),
        }
    }
}

impl FsBackend for MockBackend {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn namei_follow(&self, start_path: &str) -> Result<(u64, FileKind)> {
        let mut ino = MOCK_ROOT_INO;
        let trimmed = start_path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok((ino, FileKind::Directory));
        }
        for component in trimmed.split('/') {
            let entries = match self.nodes.get(&ino) {
                Some(MockNode::Dir(entries)) => entries,
                _ => {
                    return Err(EngineError::Config(format!(
                        "path component in the middle of {start_path} is not a directory"
                    )));
                }
            };
            let found = entries.iter().find(|(name, _)| name == component);
            match found {
                Some((_, child_ino)) => ino = *child_ino,
                None => {
                    return Err(EngineError::Config(format!(
                        "path {start_path} does not resolve"
                    )));
                }
            }
        }
        Ok((ino, self.kind_of(ino)?))
    }

    fn read_inode(&self, ino: u64) -> Result<InodeMeta> {
        let kind = self.kind_of(ino)?;
        let size = match self.nodes.get(&ino) {
            Some(MockNode::File(f)) => f.size,
            _ => 0,
        };
        Ok(InodeMeta { ino, kind, size })
    }

    fn dir_iterate(&self, ino: u64, cb: &mut dyn FnMut(DirEntry) -> ControlFlow<()>) -> Result<()> {
        let entries = match self.nodes.get(&ino) {
            Some(MockNode::Dir(entries)) => entries,
            _ => return Err(EngineError::Config(format!("inode {ino} is not a directory"))),
        };
        for (name, child_ino) in entries {
            let kind = self.kind_of(*child_ino)?;
            if cb(DirEntry { ino: *child_ino, name, kind }).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn block_iterate(&self, ino: u64, cb: &mut dyn FnMut(BlockEvent) -> ControlFlow<()>) -> Result<()> {
        let file = match self.nodes.get(&ino) {
            Some(MockNode::File(f)) => f,
            _ => return Err(EngineError::Config(format!("inode {ino} is not a regular file"))),
        };
        for (logical_block, physical_block) in file.blocks.iter().enumerate() {
            if cb(BlockEvent {
                logical_block: logical_block as u64,
                physical_block: *physical_block,
            })
            .is_break()
            {
                break;
            }
        }
        Ok(())
    }
}
