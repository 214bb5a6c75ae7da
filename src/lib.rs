//! A physical buddy page allocator for a bare-metal test harness.
//!
//! Memory is organised into *areas*: contiguous PFN ranges, each with its
//! own per-page metadata table and per-order freelists. Within an area,
//! pages are tracked as power-of-two blocks that split on demand and
//! coalesce on free. A single global lock serialises all mutation.
#![cfg_attr(not(test), no_std)]

mod addr;
mod arch;
mod area;
mod bits;
mod buddy;
mod freelist;
mod metadata;
mod ops;
#[cfg(test)]
mod test_support;

pub use addr::{set_phys_map_base, PAddr};
pub use area::{page_alloc_initialized, AreaNumber};
pub use buddy::{
    alloc_pages_area, free_pages, memalign_pages_area, reserve_pages, unreserve_pages, ReserveError, ALL_AREAS,
};
pub use ops::{installed_ops, page_alloc_ops_enable, FreeFn, MemalignFn, OpsTable};

/// Registers a memory range with the allocator.
///
/// `n = Some(number)` installs the range at that exact registry slot:
/// `AreaNumber::Custom(k)` addresses slot `k` directly, reaching any of the
/// `MAX_AREAS` registry slots the four well-known classes don't name.
/// `n = None` auto-routes the range across the well-known area classes at
/// their architecture-provided cutoffs.
///
/// # Panics
///
/// On any precondition violation: slot out of range or already in use, a
/// degenerate/undersized/over-large range, or overlap with an existing
/// area.
pub fn page_alloc_init_area(n: Option<AreaNumber>, base_pfn: usize, top_pfn: usize) {
    area::init_area(n, base_pfn, top_pfn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_arena;

    #[test]
    fn public_surface_round_trips_an_allocation() {
        with_arena(0x200, || {
            page_alloc_init_area(Some(AreaNumber::Normal), 0xff, 0x200);
            assert!(page_alloc_initialized());

            let ptr = alloc_pages_area(ALL_AREAS, 1).expect("allocation should succeed");
            free_pages(ptr);

            page_alloc_ops_enable();
            let ops = installed_ops().expect("ops table installed");
            let ptr2 = (ops.memalign)(arch::PAGE_SIZE, arch::PAGE_SIZE);
            assert!(!ptr2.is_null());
            (ops.free)(ptr2);
        });
    }
}
