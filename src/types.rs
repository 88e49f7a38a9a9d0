use core::mem::size_of;
use core::ptr::null_mut;

use crate::os::align_up;

// ------------------------------------------------------
// Main internal data-structures
// ------------------------------------------------------

// Main tuning parameters for pool and page sizes.
// Each enclave owns one pool per size band; each pool holds one
// division per size class; divisions hand out fixed-size blocks
// from lazily committed pages.

pub const MAX_ENCLAVES: usize = 32;

// Size classes per pool
pub const CLASS_CT: usize = 8;

// Sentinel meaning "none" for page and block indices alike. A page
// record whose `free_block_ct` reads as this value is not committed.
pub const NO_BLOCK: u32 = 0xffff_ffff;

// Small band: blocks of 8..=64 bytes in steps of 8, 16 KiB pages,
// one 64 MiB division per class.
pub const SMALL_BLOCK_STEP: usize = 8;
pub const SMALL_BLOCK_MAX: usize = SMALL_BLOCK_STEP * CLASS_CT;                    // 64
pub const SMALL_PAGE_SIZE: usize = 16 * 1024;
pub const SMALL_DIVISION_SIZE: usize = 64 * 1024 * 1024;
pub const SMALL_POOL_SIZE: usize = CLASS_CT * SMALL_DIVISION_SIZE;                 // 512 MiB
pub const SMALL_PAGES_PER_DIVISION: usize = SMALL_DIVISION_SIZE / SMALL_PAGE_SIZE; // 4096

// Medium band: blocks of 128..=1024 bytes in steps of 128, 64 KiB pages,
// one 1 GiB division per class.
pub const MEDIUM_BLOCK_STEP: usize = 128;
pub const MEDIUM_BLOCK_MAX: usize = MEDIUM_BLOCK_STEP * CLASS_CT;                  // 1024
pub const MEDIUM_PAGE_SIZE: usize = 64 * 1024;
pub const MEDIUM_DIVISION_SIZE: usize = 1024 * 1024 * 1024;
pub const MEDIUM_POOL_SIZE: usize = CLASS_CT * MEDIUM_DIVISION_SIZE;               // 8 GiB
pub const MEDIUM_PAGES_PER_DIVISION: usize = MEDIUM_DIVISION_SIZE / MEDIUM_PAGE_SIZE; // 16384

// Large and giant bands are carved out of the reservation so the layout
// is final, but no allocation path reaches them yet.
pub const LARGE_POOL_SIZE: usize = 160 * 1024 * 1024 * 1024;
pub const GIANT_POOL_SIZE: usize = 256 * 1024 * 1024 * 1024;

#[inline]
pub const fn small_block_size(class: usize) -> usize {
    (class + 1) * SMALL_BLOCK_STEP
}

#[inline]
pub const fn medium_block_size(class: usize) -> usize {
    (class + 1) * MEDIUM_BLOCK_STEP
}

// Metadata for one page-sized region of a division. Records for every
// page of every division exist from startup on; `free_block_ct` flips
// from the sentinel to a real count when the page is committed.
#[derive(Clone, Copy)]
pub struct PageRecord {
    pub free_block_ct: u32, // NO_BLOCK while the page is uncommitted
    pub next_free: u32,     // next uncommitted page, NO_BLOCK at the end
}

// Free-list link for one block. Held out of band in the node region,
// not inside the block, so user payloads never alias list threading.
// Meaningful only while the block is free.
#[derive(Clone, Copy)]
pub struct BlockNode {
    pub next_free: u32,
}

// ------------------------------------------------------
// Derived layout sizes
// ------------------------------------------------------

// Bytes of block-node metadata reserved for one division, rounded up to
// the division's page size so node commits never cross into a neighbor.
pub const fn division_node_bytes(block_size: usize, page_size: usize, division_size: usize) -> usize {
    let pages = division_size / page_size;
    let blocks = pages * (page_size / block_size);
    align_up(blocks * size_of::<BlockNode>(), page_size)
}

const fn nodes_size_total() -> usize {
    let mut total = 0;
    let mut class = 0;
    while class < CLASS_CT {
        total += division_node_bytes(small_block_size(class), SMALL_PAGE_SIZE, SMALL_DIVISION_SIZE);
        class += 1;
    }
    // keep the first medium division's nodes on a medium page boundary
    total = align_up(total, MEDIUM_PAGE_SIZE);
    class = 0;
    while class < CLASS_CT {
        total += division_node_bytes(medium_block_size(class), MEDIUM_PAGE_SIZE, MEDIUM_DIVISION_SIZE);
        class += 1;
    }
    total
}

// Per-enclave record region: one PageRecord per page of every division,
// small divisions first, then medium. Committed eagerly at startup.
pub const RECORDS_SIZE: usize =
    CLASS_CT * (SMALL_PAGES_PER_DIVISION + MEDIUM_PAGES_PER_DIVISION) * size_of::<PageRecord>();

// Per-enclave node region, laid out in the same division order.
pub const NODES_SIZE: usize = nodes_size_total();

// One enclave's slice of the reservation, sub-regions in carve order.
pub const ENCLAVE_FOOTPRINT: usize = SMALL_POOL_SIZE
    + MEDIUM_POOL_SIZE
    + LARGE_POOL_SIZE
    + GIANT_POOL_SIZE
    + RECORDS_SIZE
    + NODES_SIZE;

// Commits assume every sub-region lands on a page boundary of both bands.
const _: () = assert!(ENCLAVE_FOOTPRINT % MEDIUM_PAGE_SIZE == 0);
const _: () = assert!(RECORDS_SIZE % SMALL_PAGE_SIZE == 0);

// ------------------------------------------------------
// Per-division state
// ------------------------------------------------------

// One size class worth of a pool: the division's byte range, its page
// records, its block nodes, and the two intrusive free lists. The list
// heads are optional indices; the arrays themselves carry the NO_BLOCK
// sentinel instead.
#[derive(Clone, Copy)]
pub struct PageList {
    pub bytes: *mut u8,          // division base inside the pool
    pub pages: *mut PageRecord,  // one record per page, division-local
    pub blocks: *mut BlockNode,  // one node per block, division-local
    pub free_page: Option<u32>,  // head of the uncommitted-page chain
    pub free_block: Option<u32>, // head of the free-block chain
    pub page_ct: u32,            // committed pages
    pub free_page_ct: u32,       // uncommitted pages left
    pub block_size: u32,
    pub page_size: u32,
    pub blocks_per_page: u32,
    pub page_capacity: u32,      // total pages in the division
}

impl PageList {
    pub const EMPTY: PageList = PageList {
        bytes: null_mut(),
        pages: null_mut(),
        blocks: null_mut(),
        free_page: None,
        free_block: None,
        page_ct: 0,
        free_page_ct: 0,
        block_size: 0,
        page_size: 0,
        blocks_per_page: 0,
        page_capacity: 0,
    };
}

// One size band of one enclave: eight divisions over a contiguous range.
#[derive(Clone, Copy)]
pub struct Pool {
    pub lists: [PageList; CLASS_CT],
    pub bytes: *mut u8, // pool base; division `c` starts at `c * division_size`
    pub step: u32,      // class granularity (8 or 128)
}

impl Pool {
    pub const EMPTY: Pool = Pool {
        lists: [PageList::EMPTY; CLASS_CT],
        bytes: null_mut(),
        step: 0,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_tables() {
        assert_eq!(small_block_size(0), 8);
        assert_eq!(small_block_size(CLASS_CT - 1), SMALL_BLOCK_MAX);
        assert_eq!(medium_block_size(0), 128);
        assert_eq!(medium_block_size(CLASS_CT - 1), MEDIUM_BLOCK_MAX);
    }

    #[test]
    fn node_regions_cover_group_commits() {
        // The last node group of a division may start below a page
        // boundary; the region must still hold a whole trailing page.
        for class in 0..CLASS_CT {
            let sz = small_block_size(class);
            let bytes = division_node_bytes(sz, SMALL_PAGE_SIZE, SMALL_DIVISION_SIZE);
            let blocks = SMALL_PAGES_PER_DIVISION * (SMALL_PAGE_SIZE / sz);
            assert!(bytes >= blocks * size_of::<BlockNode>());
            assert_eq!(bytes % SMALL_PAGE_SIZE, 0);

            let sz = medium_block_size(class);
            let bytes = division_node_bytes(sz, MEDIUM_PAGE_SIZE, MEDIUM_DIVISION_SIZE);
            let blocks = MEDIUM_PAGES_PER_DIVISION * (MEDIUM_PAGE_SIZE / sz);
            assert!(bytes >= blocks * size_of::<BlockNode>());
            assert_eq!(bytes % MEDIUM_PAGE_SIZE, 0);
        }
    }

    #[test]
    fn footprint_is_page_granular() {
        assert_eq!(ENCLAVE_FOOTPRINT % MEDIUM_PAGE_SIZE, 0);
        assert_eq!(RECORDS_SIZE, CLASS_CT * (4096 + 16384) * 8);
    }
}
