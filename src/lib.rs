//! Segregated-fit, paged, enclave-partitioned allocation.
//!
//! One huge address range is reserved at startup and carved into
//! per-enclave pools, one division per size class. Allocation pops an
//! intrusive, index-based free list and commits OS pages only as
//! divisions grow, so the hot path is O(1) with no syscalls. Each
//! enclave is single-threaded by contract; different enclaves touch
//! disjoint bytes and may run on different threads.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("the pool layout requires a 64-bit address space");

mod init;
mod os;
mod pool;
mod stats;
mod types;


pub use crate::stats::{snapshot, StatsSnapshot};
pub use crate::types::{MAX_ENCLAVES, MEDIUM_BLOCK_MAX, SMALL_BLOCK_MAX};

use core::fmt;
use core::mem::{align_of, size_of};
use core::slice;

use crate::types::Pool;

/// Errors surfaced by [`startup`] and [`EnclaveAllocator::alloc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The OS refused the initial address-range reservation.
    OutOfAddressSpace,
    /// A page commit failed, a division ran out of pages, or the request
    /// exceeds the largest implemented size class.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfAddressSpace => write!(f, "out of address space"),
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}

/// Reserves the address range and prepares `enclave_ct` enclaves.
///
/// Must be called exactly once before any allocation; `enclave_ct` is at
/// most [`MAX_ENCLAVES`].
pub fn startup(enclave_ct: usize) -> Result<(), Error> {
    init::startup(enclave_ct)
}

/// Releases the reservation and every committed page inside it.
///
/// All handles and outstanding allocations are invalid afterwards.
pub fn shutdown() {
    init::shutdown()
}

/// True between a successful [`startup`] and the matching [`shutdown`].
pub fn is_initialized() -> bool {
    init::is_initialized()
}

/// Number of enclaves the current reservation was carved for.
pub fn enclave_ct() -> usize {
    init::enclave_ct()
}

/// Returns the allocator handle for one enclave.
///
/// The handle is a cheap value; every copy shares the enclave's pools.
/// Panics if `enclave_id` is out of range or the allocator is down.
pub fn get_allocator(enclave_id: usize) -> EnclaveAllocator {
    assert!(init::is_initialized(), "allocator not started");
    assert!(enclave_id < init::enclave_ct(), "enclave id out of range");
    unsafe {
        EnclaveAllocator {
            small: init::small_pool(enclave_id),
            medium: init::medium_pool(enclave_id),
            enclave_id,
        }
    }
}

/// Allocator bound to one enclave's pools.
///
/// Raw pool pointers keep the handle `!Send`/`!Sync`, which matches the
/// one-thread-per-enclave contract. Copies alias the same pools.
#[derive(Clone, Copy, Debug)]
pub struct EnclaveAllocator {
    small: *mut Pool,
    medium: *mut Pool,
    enclave_id: usize,
}

impl EnclaveAllocator {
    pub fn enclave_id(&self) -> usize {
        self.enclave_id
    }

    /// Hands out storage for `count` values of `T`, at most 1024 bytes in
    /// total. The storage is naturally aligned for `T` but its contents
    /// are arbitrary: a freshly committed page reads as zero, a reused
    /// block still holds its previous tenant's bytes.
    pub fn alloc<T: Copy>(&self, count: usize) -> Result<&'static mut [T], Error> {
        let size = count.checked_mul(size_of::<T>()).ok_or(Error::OutOfMemory)?;
        assert!(size > 0, "zero-sized allocation");
        let ptr = unsafe {
            if size <= SMALL_BLOCK_MAX {
                (*self.small).alloc(size)?
            } else if size <= MEDIUM_BLOCK_MAX {
                (*self.medium).alloc(size)?
            } else {
                // the large and giant bands have no allocation path
                return Err(Error::OutOfMemory);
            }
        };
        debug_assert!(ptr as usize % align_of::<T>() == 0);
        Ok(unsafe { slice::from_raw_parts_mut(ptr as *mut T, count) })
    }

    /// Returns a slice to its division's free list.
    ///
    /// The slice must have come from this enclave's [`alloc`] with its
    /// original length; freeing anything else corrupts the free lists.
    /// Sizes above the largest class are ignored, mirroring the
    /// unimplemented large bands.
    ///
    /// [`alloc`]: EnclaveAllocator::alloc
    pub fn free<T: Copy>(&self, slice: &'static mut [T]) {
        let size = slice.len() * size_of::<T>();
        if size == 0 || size > MEDIUM_BLOCK_MAX {
            return;
        }
        let ptr = slice.as_mut_ptr() as *mut u8;
        unsafe {
            if size <= SMALL_BLOCK_MAX {
                (*self.small).free(ptr, size);
            } else {
                (*self.medium).free(ptr, size);
            }
        }
    }
}
