//! Inode Enumerator, grounded in
//! `examples/original_source/src/dj.c`'s `get_inode_list`: resolve the start
//! path, then walk the subtree collecting one `InodeTask` per regular file.

use std::ops::ControlFlow;
use std::rc::Rc;

use crate::backend::{DirEntry, FileKind, FsBackend};
use crate::error::{EngineError, Result};
use crate::model::InodeTask;

pub fn enumerate(fs: &dyn FsBackend, start_path: &str) -> Result<Vec<InodeTask>> {
    let (ino, kind) = fs.namei_follow(start_path)?;

    let mut tasks = Vec::new();
    match kind {
        FileKind::RegularFile => {
            let meta = fs.read_inode(ino)?;
            tasks.push(InodeTask {
                inode: ino,
                path: Rc::from(start_path),
                len: meta.size,
            });
        }
        FileKind::Directory => {
            walk_dir(fs, ino, start_path, &mut tasks)?;
        }
        FileKind::Symlink | FileKind::Other => {
            return Err(EngineError::Config(format!(
                "{start_path} is neither a regular file nor a directory"
            )));
        }
    }

    tasks.sort_by_key(|t| t.inode);
    Ok(tasks)
}

fn walk_dir(
    fs: &dyn FsBackend,
    dir_ino: u64,
    dir_path: &str,
    tasks: &mut Vec<InodeTask>,
) -> Result<()> {
    // Entries are collected first so the recursive calls below aren't made
    // from inside the `dir_iterate` borrow of `fs`.
    let mut children: Vec<(u64, String, FileKind)> = Vec::new();
    fs.dir_iterate(dir_ino, &mut |entry: DirEntry| {
        children.push((entry.ino, entry.name.to_string(), entry.kind));
        ControlFlow::Continue(())
    })?;

    for (ino, name, kind) in children {
        let child_path = format!("{}/{}", dir_path.trim_end_matches('/'), name);
        match kind {
            FileKind::RegularFile => {
                let meta = fs.read_inode(ino)?;
                tasks.push(InodeTask {
                    inode: ino,
                    path: Rc::from(child_path.as_str()),
                    len: meta.size,
                });
            }
            FileKind::Directory => {
                walk_dir(fs, ino, &child_path, tasks)?;
            }
            // Symlinks inside the tree are skipped silently.
            FileKind::Symlink | FileKind::Other => {}
        }
    }

    Ok(())
}
