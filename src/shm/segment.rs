// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment management.
//!
//! Provides safe wrappers around `shm_open`, `ftruncate`, and `mmap`
//! for creating and mapping the shared-memory regions that back a
//! service instance's `EventDataControl`/`TransactionLogSet` pairs.
//!
//! # Segment Lifecycle
//!
//! 1. The skeleton creates the segment with `ShmSegment::create()` at service offer.
//! 2. Proxies open the segment with `ShmSegment::open()`.
//! 3. The mapping is unmapped automatically on drop.
//! 4. The skeleton calls `ShmSegment::unlink()` when the service instance is torn down.
//!
//! # Naming Convention
//!
//! Segment names must start with `/` and contain no other `/`.
//! Example: `/lola_svc42_inst0_ctrl`

use super::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// POSIX shared memory segment wrapper.
///
/// Automatically unmaps the memory region on drop.
/// Does NOT automatically unlink the segment (caller's responsibility).
pub struct ShmSegment {
    /// Pointer to mapped memory region
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Segment name (for unlink)
    name: String,
}

// SAFETY: ShmSegment points to memory shared across processes. All reads
// and writes into the region go through atomics or are externally
// serialized by the subsystems built on top of it (transaction log mutex).
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new shared memory segment.
    ///
    /// If a segment with this name already exists, it will be replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if segment creation or mapping fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - shm_unlink is safe to call with any valid path; errors are ignored
        // - shm_open with O_CREAT|O_RDWR|O_EXCL creates a new segment or fails if it exists
        // - mode 0o600 is a valid permission mask
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is a valid descriptor from the successful shm_open above.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid and not reused after this error path.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        // SAFETY:
        // - null first arg lets the kernel choose the address
        // - size/flags describe a valid read-write shared mapping
        // - fd is valid from shm_open+ftruncate above, offset 0
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd is valid; closing after a successful mmap is safe, the mapping
        // holds its own reference to the underlying object.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        // SAFETY: ptr/size come from the mmap call just above; the region is
        // writable and not yet observed by any other participant.
        unsafe {
            ptr::write_bytes(ptr as *mut u8, 0, size);
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing shared memory segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment doesn't exist or mapping fails.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid CString; O_RDWR opens an existing segment.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        // SAFETY: fd is valid from shm_open above, size is caller-provided.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd valid; mapping keeps its own reference once established.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    /// Validate segment name follows POSIX rules.
    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name cannot contain '/' after prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Unlink (delete) a shared memory segment by name.
    ///
    /// The segment is removed once every participant has unmapped it.
    /// Called by the skeleton when a service instance is stopped offered
    /// for good, or during crash-recovery cleanup at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if unlink fails for a reason other than "not found".
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; shm_unlink only touches the shm namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }

        Ok(())
    }

    /// Raw pointer to the mapped memory.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Segment name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether a segment with the given name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY: c_name is valid; O_RDONLY only probes existence.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };

        if fd >= 0 {
            // SAFETY: fd is valid and not used again after this close.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size come from a successful mmap in create()/open()
        // and this is the only munmap call for this mapping (Drop runs once).
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
        // Unlinking is not done here: the creator decides when the segment's
        // name should stop being resolvable.
    }
}

/// Prefix used by every segment this core creates, so crash-recovery cleanup
/// can recognize its own stale regions in `/dev/shm` without touching
/// unrelated shared memory from other subsystems.
pub const SEGMENT_PREFIX: &str = "lola_";

/// Remove shared-memory segments left behind by a crashed skeleton process.
///
/// Scans `/dev/shm` for names carrying [`SEGMENT_PREFIX`] whose control block
/// looks uninitialized or corrupted, and unlinks them. Meant to run once at
/// skeleton startup, before a fresh region is created for a service instance.
///
/// # Returns
///
/// Number of segments removed.
pub fn cleanup_stale_segments() -> usize {
    let mut cleaned = 0;

    let shm_dir = std::path::Path::new("/dev/shm");
    if !shm_dir.exists() {
        return 0;
    }

    let Ok(entries) = std::fs::read_dir(shm_dir) else {
        return 0;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        if !name.starts_with(SEGMENT_PREFIX) {
            continue;
        }

        let segment_name = format!("/{name}");

        if is_segment_stale(&segment_name) && ShmSegment::unlink(&segment_name).is_ok() {
            log::debug!("cleaned up stale segment: {segment_name}");
            cleaned += 1;
        }
    }

    cleaned
}

/// Heuristic staleness check: a segment whose leading control word reads an
/// implausibly large value is treated as orphaned/corrupted rather than
/// actively owned by a live skeleton.
fn is_segment_stale(name: &str) -> bool {
    use std::sync::atomic::{AtomicU64, Ordering};

    let Ok(seg) = ShmSegment::open(name, 8) else {
        return false;
    };

    let head_ptr = seg.as_ptr() as *const AtomicU64;
    // SAFETY: seg was opened with size 8 == size_of::<u64>(), mmap returns
    // page-aligned memory which satisfies AtomicU64's alignment requirement.
    let head = unsafe { (*head_ptr).load(Ordering::Relaxed) };

    head > (1u64 << 48)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/lola_test_{ts}")
    }

    #[test]
    fn test_validate_name_valid() {
        assert!(ShmSegment::validate_name("/foo").is_ok());
        assert!(ShmSegment::validate_name("/lola_svc0_inst0").is_ok());
    }

    #[test]
    fn test_validate_name_no_leading_slash() {
        assert!(ShmSegment::validate_name("foo").is_err());
    }

    #[test]
    fn test_validate_name_embedded_slash() {
        assert!(ShmSegment::validate_name("/foo/bar").is_err());
    }

    #[test]
    fn test_create_and_open() {
        let name = unique_name();
        let size = 4096;

        let seg1 = ShmSegment::create(&name, size).expect("failed to create");
        assert_eq!(seg1.size(), size);

        // SAFETY: seg1 was just created with size 4096; offsets 0/1 are in bounds.
        unsafe {
            *seg1.as_ptr() = 0x42;
            *seg1.as_ptr().add(1) = 0x43;
        }

        let seg2 = ShmSegment::open(&name, size).expect("failed to open");

        // SAFETY: seg2 maps the same region seg1 wrote into above.
        unsafe {
            assert_eq!(*seg2.as_ptr(), 0x42);
            assert_eq!(*seg2.as_ptr().add(1), 0x43);
        }

        drop(seg1);
        drop(seg2);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_open_nonexistent() {
        let result = ShmSegment::open("/lola_nonexistent_12345", 4096);
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }

    #[test]
    fn test_exists() {
        let name = unique_name();

        assert!(!ShmSegment::exists(&name));
        let _seg = ShmSegment::create(&name, 4096).expect("failed to create");
        assert!(ShmSegment::exists(&name));

        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_unlink_idempotent() {
        let name = unique_name();

        let _seg = ShmSegment::create(&name, 4096).expect("failed to create");
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
    }

    #[test]
    fn test_cleanup_stale_segments_runs() {
        let cleaned = cleanup_stale_segments();
        assert!(cleaned < 1000);
    }

    #[test]
    fn test_is_segment_stale_valid_segment() {
        let name = unique_name();
        let seg = ShmSegment::create(&name, 4096).expect("failed to create");

        // SAFETY: seg is 4096 bytes, well past the 8-byte head word.
        unsafe {
            let head_ptr = seg.as_ptr() as *mut u64;
            *head_ptr = 0;
        }

        assert!(!is_segment_stale(&name));

        drop(seg);
        ShmSegment::unlink(&name).ok();
    }
}
