#[cfg(not(windows))]
use libc::{c_int, c_void, mmap, mprotect, munmap, sysconf, MAP_ANONYMOUS, MAP_FAILED,
           MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, _SC_PAGESIZE};
#[cfg(windows)]
use winapi::um::{
    errhandlingapi::GetLastError,
    memoryapi::{VirtualAlloc, VirtualFree},
    sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
    winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE},
};

use log::warn;

use crate::stats::{self, STATS};
use crate::Error;

/* -----------------------------------------------------------
  Virtual-memory backend

  The whole address range is reserved once, up front, and never
  grows. Pages inside it become usable through `commit`, which
  must hand back zeroed memory on first touch; re-committing an
  already committed range is harmless and preserves contents.
----------------------------------------------------------- */

// OS page size (initialized properly in `init`)
static mut OS_PAGE_SIZE: usize = 4096;

#[inline]
pub fn page_size() -> usize {
    unsafe { OS_PAGE_SIZE }
}

#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

#[inline]
pub const fn align_down(size: usize, align: usize) -> usize {
    size / align * align
}

#[cfg(windows)]
pub fn init() {
    let mut si: SYSTEM_INFO = unsafe { core::mem::zeroed() };
    unsafe { GetSystemInfo(&mut si) };
    if si.dwPageSize > 0 {
        unsafe { OS_PAGE_SIZE = si.dwPageSize as usize };
    }
}

#[cfg(not(windows))]
pub fn init() {
    let result = unsafe { sysconf(_SC_PAGESIZE) };
    if result > 0 {
        unsafe { OS_PAGE_SIZE = result as usize };
    }
}

// A reservation pins addresses, not memory: pages start inaccessible and
// count toward nothing until committed.
#[cfg(any(target_os = "linux", target_os = "android"))]
const RESERVE_FLAGS: c_int = MAP_PRIVATE | MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(all(not(windows), not(any(target_os = "linux", target_os = "android"))))]
const RESERVE_FLAGS: c_int = MAP_PRIVATE | MAP_ANONYMOUS;

pub fn reserve(size: usize) -> Result<*mut u8, Error> {
    debug_assert!(size > 0 && size % page_size() == 0);
    #[cfg(windows)]
    let p = unsafe { VirtualAlloc(core::ptr::null_mut(), size, MEM_RESERVE, PAGE_NOACCESS) as *mut u8 };
    #[cfg(not(windows))]
    let p = unsafe {
        let p = mmap(core::ptr::null_mut(), size, PROT_NONE, RESERVE_FLAGS, -1, 0);
        if p == MAP_FAILED { core::ptr::null_mut() } else { p as *mut u8 }
    };
    if p.is_null() {
        warn!("address range reservation failed: {}, size {}", last_error(), size);
        return Err(Error::OutOfAddressSpace);
    }
    stats::increase(&STATS.reserved, size as i64);
    Ok(p)
}

// Make `[ptr, ptr + size)` readable and writable. The caller guarantees
// the range lies inside a reservation and is OS-page aligned.
pub unsafe fn commit(ptr: *mut u8, size: usize) -> Result<(), Error> {
    debug_assert!(!ptr.is_null() && size > 0);
    debug_assert!(ptr as usize % page_size() == 0 && size % page_size() == 0);
    #[cfg(windows)]
    let ok = !VirtualAlloc(ptr as _, size, MEM_COMMIT, PAGE_READWRITE).is_null();
    #[cfg(not(windows))]
    let ok = mprotect(ptr as *mut c_void, size, PROT_READ | PROT_WRITE) == 0;
    if !ok {
        warn!("commit failed: {}, addr {:p}, size {}", last_error(), ptr, size);
        return Err(Error::OutOfMemory);
    }
    stats::increase(&STATS.committed, size as i64);
    stats::increase(&STATS.commit_calls, 1);
    Ok(())
}

// Undo a reservation, returning every committed page within it.
pub unsafe fn release(base: *mut u8, size: usize) {
    debug_assert!(!base.is_null() && size > 0);
    #[cfg(windows)]
    let ok = VirtualFree(base as _, 0, MEM_RELEASE) != 0;
    #[cfg(not(windows))]
    let ok = munmap(base as *mut c_void, size) == 0;
    if !ok {
        warn!("release failed: {}, addr {:p}, size {}", last_error(), base, size);
        return;
    }
    stats::decrease(&STATS.reserved, size as i64);
}

#[cfg(windows)]
fn last_error() -> u32 {
    unsafe { GetLastError() }
}

#[cfg(not(windows))]
fn last_error() -> errno::Errno {
    errno::errno()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_release_round_trip() {
        init();
        let size = 1024 * 1024;
        let base = reserve(size).unwrap();
        unsafe {
            commit(base, 64 * 1024).unwrap();
            // committed memory must read back zeroed
            for i in 0..64 * 1024 {
                assert_eq!(*base.add(i), 0);
            }
            *base = 0xa5;
            *base.add(64 * 1024 - 1) = 0x5a;
            // re-commit keeps contents
            commit(base, 64 * 1024).unwrap();
            assert_eq!(*base, 0xa5);
            assert_eq!(*base.add(64 * 1024 - 1), 0x5a);
            release(base, size);
        }
    }
}
