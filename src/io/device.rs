//! Single positioned-read stripe reader. The scheduler never has more than
//! one stripe read in flight (see DESIGN.md), so there is no batched or
//! `io_uring`-submitted read path here — a plain positioned `pread` per
//! stripe is sufficient.

use std::ffi::CString;
use std::os::fd::RawFd;

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::io::aligned_buf::{IO_ALIGN, alloc_aligned};
use crate::io::platform::{configure_direct_io, direct_open_flags};

/// Physical characteristics of the underlying block device, used to pick a
/// sensible default `coalesce_distance` (exposed for callers; the core
/// scheduler takes the value as an explicit config knob either way).
pub struct DiskProfile {
    pub is_rotational: bool,
    pub max_io_bytes: usize,
}

impl Default for DiskProfile {
    fn default() -> Self {
        Self {
            is_rotational: true,
            max_io_bytes: 1024 * 1024,
        }
    }
}

impl std::fmt::Display for DiskProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Disk: rotational={} max_io={}", self.is_rotational, self.max_io_bytes)
    }
}

#[cfg(target_os = "linux")]
fn detect_disk_profile(fd: RawFd) -> DiskProfile {
    use std::fs;

    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return DiskProfile::default();
    }

    let rdev = stat.st_rdev;
    let major = libc::major(rdev);
    let minor = libc::minor(rdev);
    if major == 0 && minor == 0 {
        return DiskProfile::default();
    }

    let base = format!("/sys/dev/block/{}:{}", major, minor);
    let read_queue_file = |name: &str| -> Option<String> {
        let direct = format!("{}/queue/{}", base, name);
        if let Ok(v) = fs::read_to_string(&direct) {
            return Some(v.trim().to_string());
        }
        let parent = format!("{}/../queue/{}", base, name);
        fs::read_to_string(&parent).ok().map(|v| v.trim().to_string())
    };

    let is_rotational = read_queue_file("rotational")
        .and_then(|v| v.parse::<u32>().ok())
        .map(|v| v != 0)
        .unwrap_or(true);
    let max_sectors_kb = read_queue_file("max_sectors_kb")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1024);

    DiskProfile {
        is_rotational,
        max_io_bytes: max_sectors_kb * 1024,
    }
}

#[cfg(not(target_os = "linux"))]
fn detect_disk_profile(_fd: RawFd) -> DiskProfile {
    DiskProfile::default()
}

/// Detect the disk profile for a path without keeping the device open.
/// Never fails — returns conservative defaults on any error.
pub fn detect_disk_profile_for_path(path: &str) -> DiskProfile {
    let c_path = match CString::new(path) {
        Ok(p) => p,
        Err(_) => return DiskProfile::default(),
    };
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        return DiskProfile::default();
    }
    let profile = detect_disk_profile(fd);
    unsafe {
        libc::close(fd);
    }
    profile
}

#[cfg(target_os = "linux")]
fn advise_sequential(fd: RawFd) {
    let ret = unsafe { libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if ret != 0 {
        warn!(errno = ret, "posix_fadvise failed, continuing without advice");
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_fd: RawFd) {}

/// Read-only handle on the block device, issuing one positioned read per
/// stripe.
pub struct BlockDevice {
    fd: RawFd,
    device_size: u64,
    direct: bool,
}

impl BlockDevice {
    pub fn open(path: &str, direct: bool, profile_advice: bool) -> Result<Self> {
        let c_path =
            CString::new(path).map_err(|_| EngineError::Config("device path contains NUL".into()))?;
        let flags = if direct {
            direct_open_flags()
        } else {
            libc::O_RDONLY
        };
        let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
        if fd < 0 {
            return Err(EngineError::Io(std::io::Error::last_os_error()));
        }
        if direct {
            configure_direct_io(fd)?;
        }

        if profile_advice {
            advise_sequential(fd);
        }

        let size = unsafe { libc::lseek(fd, 0, libc::SEEK_END) };
        if size < 0 {
            unsafe {
                libc::close(fd);
            }
            return Err(EngineError::Io(std::io::Error::last_os_error()));
        }

        Ok(Self {
            fd,
            device_size: size as u64,
            direct,
        })
    }

    pub fn device_size(&self) -> u64 {
        self.device_size
    }

    /// Read `len` bytes at byte offset `offset`, honoring O_DIRECT's
    /// 512-byte alignment rule on both the buffer and the rounded-up read
    /// length. Short reads are logged but not fatal — the returned `Vec`
    /// is truncated to what was actually read.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let read_len = if self.direct {
            (len + IO_ALIGN - 1) & !(IO_ALIGN - 1)
        } else {
            len
        };

        let mut buf = alloc_aligned(read_len);
        let mut total = 0usize;
        while total < read_len {
            let ret = unsafe {
                libc::pread(
                    self.fd,
                    buf[total..].as_mut_ptr() as *mut libc::c_void,
                    read_len - total,
                    (offset + total as u64) as libc::off_t,
                )
            };
            if ret < 0 {
                return Err(EngineError::Io(std::io::Error::last_os_error()));
            }
            if ret == 0 {
                break;
            }
            total += ret as usize;
        }

        if total < len {
            warn!(offset, requested = len, got = total, "short read from stripe device");
        } else {
            debug!(offset, len, "stripe read");
        }

        let mut out = buf.to_vec();
        out.truncate(total);
        Ok(out)
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
