/// Tuning knobs for a single traversal, replacing the C original's `argv`
/// globals with an explicit, owned configuration value.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of inodes with undelivered blocks admitted at once.
    pub max_inodes: usize,
    /// Maximum number of blocks queued across all admitted inodes; used to
    /// derive the per-inode heap budget as `max_blocks / open_inodes`.
    pub max_blocks: usize,
    /// Maximum physical-block gap two block runs may straddle and still
    /// share a single stripe read.
    pub coalesce_distance: u64,
    /// Open the device with O_DIRECT and honor the 512-byte alignment rules.
    pub direct_io: bool,
    /// Emit `posix_fadvise` sequential-access advice on open.
    pub profile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inodes: 100,
            max_blocks: 128_000,
            coalesce_distance: 1,
            direct_io: false,
            profile: false,
        }
    }
}
