pub mod aligned_buf;
pub mod device;
pub mod platform;

pub use device::{BlockDevice, DiskProfile, detect_disk_profile_for_path};
