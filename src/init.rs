use core::ptr::{addr_of_mut, null_mut};

use log::info;

use crate::os;
use crate::stats::{self, STATS};
use crate::types::*;
use crate::Error;

/* -----------------------------------------------------------
  Process-wide state

  One reservation, carved into per-enclave sub-regions at
  startup. The six arrays below are written only by `startup`
  and `shutdown`; everything else reaches them through raw
  pointers handed out by `get_allocator`. There is no interior
  locking -- the crate contract is one thread per enclave and
  exclusive calls to startup/shutdown.
----------------------------------------------------------- */

static mut ADDRESS_SPACE: *mut u8 = null_mut();
static mut RESERVED_SIZE: usize = 0;
static mut ENCLAVE_CT: usize = 0;

static mut SMALL_POOLS: [Pool; MAX_ENCLAVES] = [Pool::EMPTY; MAX_ENCLAVES];
static mut MEDIUM_POOLS: [Pool; MAX_ENCLAVES] = [Pool::EMPTY; MAX_ENCLAVES];
static mut LARGE_POOLS: [*mut u8; MAX_ENCLAVES] = [null_mut(); MAX_ENCLAVES];
static mut GIANT_POOLS: [*mut u8; MAX_ENCLAVES] = [null_mut(); MAX_ENCLAVES];
static mut RECORDS: [*mut PageRecord; MAX_ENCLAVES] = [null_mut(); MAX_ENCLAVES];
static mut FREE_LISTS: [*mut BlockNode; MAX_ENCLAVES] = [null_mut(); MAX_ENCLAVES];

pub fn is_initialized() -> bool {
    unsafe { !ADDRESS_SPACE.is_null() }
}

pub fn enclave_ct() -> usize {
    unsafe { ENCLAVE_CT }
}

pub unsafe fn small_pool(enclave: usize) -> *mut Pool {
    addr_of_mut!(SMALL_POOLS[enclave])
}

pub unsafe fn medium_pool(enclave: usize) -> *mut Pool {
    addr_of_mut!(MEDIUM_POOLS[enclave])
}

/// Reserves the address range and lays out every enclave's pools.
pub fn startup(enclave_ct: usize) -> Result<(), Error> {
    assert!(
        enclave_ct >= 1 && enclave_ct <= MAX_ENCLAVES,
        "enclave_ct must be in 1..={}",
        MAX_ENCLAVES
    );
    unsafe {
        assert!(ADDRESS_SPACE.is_null(), "allocator already started");
        os::init();
        let total = enclave_ct * ENCLAVE_FOOTPRINT;
        let base = os::reserve(total)?;
        if let Err(e) = carve(base, enclave_ct) {
            os::release(base, total);
            settle_commit_counters();
            return Err(e);
        }
        ADDRESS_SPACE = base;
        RESERVED_SIZE = total;
        ENCLAVE_CT = enclave_ct;
        info!("reserved {} GiB for {} enclave(s) at {:p}", total >> 30, enclave_ct, base);
    }
    Ok(())
}

/// Releases the reservation. Every handle and every outstanding
/// allocation is invalid afterwards.
pub fn shutdown() {
    unsafe {
        // only shut down if we were initialized
        if ADDRESS_SPACE.is_null() {
            return;
        }
        os::release(ADDRESS_SPACE, RESERVED_SIZE);
        settle_commit_counters();
        for e in 0..ENCLAVE_CT {
            SMALL_POOLS[e] = Pool::EMPTY;
            MEDIUM_POOLS[e] = Pool::EMPTY;
            LARGE_POOLS[e] = null_mut();
            GIANT_POOLS[e] = null_mut();
            RECORDS[e] = null_mut();
            FREE_LISTS[e] = null_mut();
        }
        ADDRESS_SPACE = null_mut();
        RESERVED_SIZE = 0;
        ENCLAVE_CT = 0;
        info!("released address space");
    }
}

// Walk one enclave's slice of the reservation, binding sub-region base
// pointers in order: small pool, medium pool, large, giant, page records,
// block nodes. Records are committed eagerly; everything else stays
// reserved until a division first needs it.
unsafe fn carve(base: *mut u8, enclave_ct: usize) -> Result<(), Error> {
    let mut cursor = base;
    for e in 0..enclave_ct {
        let small_base = cursor;
        cursor = cursor.add(SMALL_POOL_SIZE);
        let medium_base = cursor;
        cursor = cursor.add(MEDIUM_POOL_SIZE);
        LARGE_POOLS[e] = cursor;
        cursor = cursor.add(LARGE_POOL_SIZE);
        GIANT_POOLS[e] = cursor;
        cursor = cursor.add(GIANT_POOL_SIZE);
        let records = cursor as *mut PageRecord;
        cursor = cursor.add(RECORDS_SIZE);
        let nodes = cursor as *mut BlockNode;
        cursor = cursor.add(NODES_SIZE);
        RECORDS[e] = records;
        FREE_LISTS[e] = nodes;

        os::commit(records as *mut u8, RECORDS_SIZE)?;

        let mut record = records;
        let mut node_off = 0usize;

        let small = &mut *addr_of_mut!(SMALL_POOLS[e]);
        small.bytes = small_base;
        small.step = SMALL_BLOCK_STEP as u32;
        for class in 0..CLASS_CT {
            let block_size = small_block_size(class);
            let list = &mut small.lists[class];
            *list = PageList {
                bytes: small_base.add(class * SMALL_DIVISION_SIZE),
                pages: record,
                blocks: (nodes as *mut u8).add(node_off) as *mut BlockNode,
                block_size: block_size as u32,
                page_size: SMALL_PAGE_SIZE as u32,
                blocks_per_page: (SMALL_PAGE_SIZE / block_size) as u32,
                page_capacity: SMALL_PAGES_PER_DIVISION as u32,
                ..PageList::EMPTY
            };
            list.init_page_chain();
            record = record.add(SMALL_PAGES_PER_DIVISION);
            node_off += division_node_bytes(block_size, SMALL_PAGE_SIZE, SMALL_DIVISION_SIZE);
        }

        node_off = os::align_up(node_off, MEDIUM_PAGE_SIZE);

        let medium = &mut *addr_of_mut!(MEDIUM_POOLS[e]);
        medium.bytes = medium_base;
        medium.step = MEDIUM_BLOCK_STEP as u32;
        for class in 0..CLASS_CT {
            let block_size = medium_block_size(class);
            let list = &mut medium.lists[class];
            *list = PageList {
                bytes: medium_base.add(class * MEDIUM_DIVISION_SIZE),
                pages: record,
                blocks: (nodes as *mut u8).add(node_off) as *mut BlockNode,
                block_size: block_size as u32,
                page_size: MEDIUM_PAGE_SIZE as u32,
                blocks_per_page: (MEDIUM_PAGE_SIZE / block_size) as u32,
                page_capacity: MEDIUM_PAGES_PER_DIVISION as u32,
                ..PageList::EMPTY
            };
            list.init_page_chain();
            record = record.add(MEDIUM_PAGES_PER_DIVISION);
            node_off += division_node_bytes(block_size, MEDIUM_PAGE_SIZE, MEDIUM_DIVISION_SIZE);
        }
    }
    debug_assert!(cursor as usize - base as usize == enclave_ct * ENCLAVE_FOOTPRINT);
    Ok(())
}

// The release takes every committed page with it; fold that into the
// counters so a later startup begins from zero.
fn settle_commit_counters() {
    let committed = STATS.committed.current();
    if committed > 0 {
        stats::decrease(&STATS.committed, committed);
    }
    let pages = STATS.pages_committed.current();
    if pages > 0 {
        stats::decrease(&STATS.pages_committed, pages);
    }
}

#[cfg(test)]
pub fn region_layout(enclave: usize) -> (usize, usize, usize, usize, usize, usize) {
    unsafe {
        (
            SMALL_POOLS[enclave].bytes as usize,
            MEDIUM_POOLS[enclave].bytes as usize,
            LARGE_POOLS[enclave] as usize,
            GIANT_POOLS[enclave] as usize,
            RECORDS[enclave] as usize,
            FREE_LISTS[enclave] as usize,
        )
    }
}
