pub mod backend;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod heap;
pub mod io;
pub mod model;
pub mod reassemble;
pub mod scanner;
pub mod scheduler;

pub use backend::{Ext2Backend, FsBackend, MockBackend};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use io::{BlockDevice, DiskProfile, detect_disk_profile_for_path};

use std::ops::ControlFlow;

use tracing::info;

/// Walk every regular file reachable from `start_path` inside the ext2/3/4
/// image at `device_path`, delivering their contents to `callback` in
/// physical-block order rather than per-file logical order.
///
/// `callback` receives `(inode, path, byte_offset, file_length, data,
/// opaque_slot)` and returns `ControlFlow::Break(())` to cancel the
/// traversal early; `S` is a per-inode scratch value the client can use to
/// accumulate state across calls for the same file (a running hash, for
/// instance).
pub fn walk<S, F>(device_path: &str, start_path: &str, config: &EngineConfig, mut callback: F) -> Result<()>
where
    S: Default,
    F: FnMut(u64, &str, u64, u64, &[u8], &mut S) -> ControlFlow<()>,
{
    let fs = backend::Ext2Backend::open(device_path)?;
    walk_with_backend(&fs, device_path, start_path, config, &mut callback)
}

/// Same as [`walk`], but takes an already-open `FsBackend` (the classic
/// ext2 decoder, the in-memory test double, or any other implementation).
/// Used directly by tests driven against `MockBackend`.
pub fn walk_with_backend<S, F>(
    fs: &dyn FsBackend,
    device_path: &str,
    start_path: &str,
    config: &EngineConfig,
    callback: &mut F,
) -> Result<()>
where
    S: Default,
    F: FnMut(u64, &str, u64, u64, &[u8], &mut S) -> ControlFlow<()>,
{
    let block_size = fs.block_size();

    info!("BEGIN INODE SCAN");
    let tasks = enumerator::enumerate(fs, start_path)?;
    info!(count = tasks.len(), "END INODE SCAN");

    info!("BEGIN BLOCK SCAN");
    let groups = scanner::scan(fs, tasks, &mut *callback)?;
    info!("END BLOCK SCAN");

    let device = if groups.iter().any(|(_, blocks)| blocks.iter().any(|b| b.physical_start != 0)) {
        Some(BlockDevice::open(device_path, config.direct_io, config.profile)?)
    } else {
        None
    };

    scheduler::run(config, device.as_ref(), block_size, groups, &mut *callback)
}
