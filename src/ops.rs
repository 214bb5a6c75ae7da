//! Install-once dispatch table: a pair of function pointers behind a lock,
//! installed once the caller declares the allocator ready for general use.

use spin::Mutex;

use crate::area;
use crate::buddy::{self, ALL_AREAS};

/// A `memalign`-shaped allocation entry point.
pub type MemalignFn = fn(align_bytes: usize, size_bytes: usize) -> *mut u8;

/// A `free`-shaped entry point.
pub type FreeFn = fn(*mut u8);

/// The pair of entry points installed by [`page_alloc_ops_enable`].
#[derive(Copy, Clone)]
pub struct OpsTable {
    pub memalign: MemalignFn,
    pub free: FreeFn,
}

static OPS: Mutex<Option<OpsTable>> = Mutex::new(None);

fn memalign_all_areas(align_bytes: usize, size_bytes: usize) -> *mut u8 {
    buddy::memalign_pages_area(ALL_AREAS, align_bytes, size_bytes).unwrap_or(core::ptr::null_mut())
}

fn free_all_areas(ptr: *mut u8) {
    buddy::free_pages(ptr)
}

/// Installs the dispatch table routing generic allocation requests across
/// every initialised area.
///
/// # Panics
///
/// If no area has been initialised yet.
pub fn page_alloc_ops_enable() {
    assert!(area::page_alloc_initialized(), "cannot enable page_alloc_ops before any area is initialised");
    log::debug!("ops::page_alloc_ops_enable: dispatch table installed");
    *OPS.lock() = Some(OpsTable {
        memalign: memalign_all_areas,
        free: free_all_areas,
    });
}

/// The currently installed dispatch table, if any.
pub fn installed_ops() -> Option<OpsTable> {
    *OPS.lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaNumber;
    use crate::test_support::with_arena;

    #[test]
    #[should_panic]
    fn enabling_before_init_panics() {
        with_arena(0x10, || {
            page_alloc_ops_enable();
        });
    }

    #[test]
    fn enable_installs_working_ops() {
        with_arena(0x40, || {
            area::init_area(Some(AreaNumber::Normal), 0xf, 0x20);
            page_alloc_ops_enable();

            let ops = installed_ops().expect("ops table should be installed");
            let ptr = (ops.memalign)(crate::arch::PAGE_SIZE, crate::arch::PAGE_SIZE);
            assert!(!ptr.is_null());
            (ops.free)(ptr);
        });
    }
}
