//! Low-level virtual memory functions for the mirrored ring allocation.
//!
//! Linux only. A ring is backed by an anonymous memory file truncated to the
//! ring size. A `2*len` span of address space is first reserved with no
//! access rights, then the file is mapped read/write over each half at fixed
//! addresses. Every byte in the first half is thereby aliased by the byte at
//! the same offset in the second half.

use std::io;
use std::os::raw::{c_char, c_int};
use std::ptr;

use libc::{
    c_void, close, ftruncate, memfd_create, mmap, munmap, off_t, sysconf, MAP_ANONYMOUS,
    MAP_FAILED, MAP_FIXED, MAP_PRIVATE, MAP_SHARED, MFD_CLOEXEC, PROT_NONE, PROT_READ, PROT_WRITE,
    _SC_PAGESIZE,
};

use crate::{Error, Operation, Result};

/// Gets the system page size.
pub fn page_size() -> usize {
    unsafe { sysconf(_SC_PAGESIZE) as usize }
}

/// Creates a mirrored allocation of `len` bytes.
///
/// The length is the size of the sequential range, and the offset of `len`
/// refers to the same memory location as offset `0`. The mirror continues up
/// through the offset of `2*len - 1`.
///
/// # Safety
///
/// The returned pointer must be released with [`unmap_ring`] using the same
/// `len`, and must not be accessed after that.
pub unsafe fn map_ring(len: usize) -> Result<*mut u8> {
    // Back the ring with a memory file truncated to one copy of the span.
    // The mappings keep the file alive, so the descriptor is not retained.
    let fd = tmp_open(len)?;
    let ret = wrap_fd(len, fd);
    close(fd);
    ret
}

fn wrap_fd(len: usize, fd: c_int) -> Result<*mut u8> {
    // Reserve address space covering both halves with no access rights. The
    // fixed-address maps below replace it in place.
    let pg = map(
        ptr::null_mut(),
        len * 2,
        PROT_NONE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
    )
    .map_err(|e| Error::io(Operation::RingAllocate, e))?;
    match wrap_ptr(pg, len, fd) {
        Err(err) => unsafe {
            unmap_ring(pg, len).unwrap_or_default();
            Err(err)
        },
        Ok(pg) => Ok(pg),
    }
}

fn wrap_ptr(pg: *mut u8, len: usize, fd: c_int) -> Result<*mut u8> {
    // Map the two halves of the buffer into adjacent addresses that use the
    // same file descriptor offset.
    map(pg, len, PROT_READ | PROT_WRITE, MAP_SHARED | MAP_FIXED, fd)
        .map_err(|e| Error::io(Operation::RingPrimary, e))?;
    map(
        unsafe { pg.add(len) },
        len,
        PROT_READ | PROT_WRITE,
        MAP_SHARED | MAP_FIXED,
        fd,
    )
    .map_err(|e| Error::io(Operation::RingSecondary, e))?;
    Ok(pg)
}

fn map(pg: *mut u8, len: usize, prot: c_int, flags: c_int, fd: c_int) -> io::Result<*mut u8> {
    unsafe {
        let pg = mmap(pg as *mut c_void, len, prot, flags, fd, 0);
        if pg == MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            Ok(pg as *mut u8)
        }
    }
}

/// Releases a mirrored allocation created by [`map_ring`].
///
/// # Safety
///
/// `pg` must be a pointer returned by [`map_ring`] with the same `len`, and
/// must not have been unmapped already.
pub unsafe fn unmap_ring(pg: *mut u8, len: usize) -> Result<()> {
    if munmap(pg as *mut c_void, 2 * len) < 0 {
        Err(Error::last_os_error(Operation::RingDeallocate))
    } else {
        Ok(())
    }
}

fn tmp_open(size: usize) -> Result<c_int> {
    const NAME: &[u8] = b"echod\0";
    let fd = unsafe { memfd_create(NAME.as_ptr() as *const c_char, MFD_CLOEXEC) };
    if fd < 0 {
        return Err(Error::last_os_error(Operation::MemoryFd));
    }
    if unsafe { ftruncate(fd, size as off_t) } < 0 {
        let err = Error::last_os_error(Operation::MemoryFd);
        unsafe {
            close(fd);
        }
        Err(err)
    } else {
        Ok(fd)
    }
}
