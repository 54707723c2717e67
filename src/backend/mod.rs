//! The `FsBackend` trait — the boundary to the ext2/3/4 metadata decoder.
//! The engine core never looks past this trait at on-disk structures;
//! `ext2` and `mock` are two concrete collaborators behind it.

use std::ops::ControlFlow;

use crate::error::Result;

pub mod ext2;
pub mod mock;

pub use ext2::Ext2Backend;
pub use mock::MockBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct InodeMeta {
    pub ino: u64,
    pub kind: FileKind,
    pub size: u64,
}

pub struct DirEntry<'a> {
    pub ino: u64,
    pub name: &'a str,
    pub kind: FileKind,
}

/// One callback from `block_iterate`: a logical block and its physical
/// backing, or `None` for a hole.
#[derive(Debug, Clone, Copy)]
pub struct BlockEvent {
    pub logical_block: u64,
    /// `None` means a hole (physical block 0 in the C original's encoding).
    pub physical_block: Option<u64>,
}

/// Everything the scheduler needs from an ext2/3/4 metadata decoder:
/// `namei_follow`, `read_inode`, `dir_iterate`, `block_iterate`, plus
/// `block_size`. `open`/`close` are folded into backend construction and
/// `Drop` respectively, which is the idiomatic Rust shape for an RAII
/// resource instead of explicit lifecycle calls.
pub trait FsBackend {
    fn block_size(&self) -> u32;

    /// Resolve `start_path` to an inode, following symlinks at the root.
    fn namei_follow(&self, start_path: &str) -> Result<(u64, FileKind)>;

    fn read_inode(&self, ino: u64) -> Result<InodeMeta>;

    /// Iterate the entries of directory inode `ino`. Stops early if the
    /// callback returns `ControlFlow::Break`.
    fn dir_iterate(
        &self,
        ino: u64,
        cb: &mut dyn FnMut(DirEntry) -> ControlFlow<()>,
    ) -> Result<()>;

    /// Iterate the logical->physical block mapping of regular-file inode
    /// `ino`, including holes. Stops early if the callback returns
    /// `ControlFlow::Break`.
    fn block_iterate(
        &self,
        ino: u64,
        cb: &mut dyn FnMut(BlockEvent) -> ControlFlow<()>,
    ) -> Result<()>;
}
