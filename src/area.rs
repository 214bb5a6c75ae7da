//! Area registry & initialisation.
//!
//! An area is a contiguous PFN range with its own metadata table and
//! per-order freelists. The registry (`AREAS`/`Registry`) holds up to
//! `MAX_AREAS` of them behind a single lock.

use spin::Mutex;
use static_assertions::const_assert_eq;

use crate::addr::{self, Pfn};
use crate::arch::{self, AREA_CUTOFFS, MAX_AREAS, NLISTS, PAGE_SIZE};
use crate::bits::div_ceil;
use crate::freelist::{self, PfList};
use crate::metadata::PageState;

const_assert_eq!(MAX_AREAS, 8);

/// A registry slot: one of the four well-known area classes, or an
/// arbitrary slot index for the remaining `MAX_AREAS - 4` slots the
/// well-known classes don't name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AreaNumber {
    Lowest,
    Low,
    Normal,
    High,
    Custom(usize),
}

impl AreaNumber {
    /// The registry slot this class occupies.
    #[inline]
    pub const fn slot(self) -> usize {
        match self {
            AreaNumber::Lowest => 0,
            AreaNumber::Low => 1,
            AreaNumber::Normal => 2,
            AreaNumber::High => 3,
            AreaNumber::Custom(n) => n,
        }
    }
}

/// A half-open PFN range of usable memory, its metadata table, and its
/// per-order freelists.
pub struct Area {
    base: Pfn,
    top: Pfn,
    page_states: *mut u8,
    pub(crate) freelists: [PfList; NLISTS],
}

// `page_states` is only ever touched while the enclosing `AREAS` mutex is
// held, so it is safe to move an `Area` (and its raw pointer) across
// threads.
unsafe impl Send for Area {}

impl Area {
    #[inline]
    pub fn base(&self) -> Pfn {
        self.base
    }

    #[inline]
    pub fn top(&self) -> Pfn {
        self.top
    }

    #[inline]
    pub(crate) fn page_states_ptr(&self) -> *mut u8 {
        self.page_states
    }

    #[inline]
    pub(crate) fn state(&self, pfn: Pfn) -> PageState {
        debug_assert!(self.usable_area_contains_pfn(pfn));
        unsafe { PageState::from_bits_truncate(*self.page_states.add(pfn - self.base)) }
    }

    #[inline]
    pub(crate) fn set_state(&mut self, pfn: Pfn, state: PageState) {
        debug_assert!(self.usable_area_contains_pfn(pfn));
        unsafe { *self.page_states.add(pfn - self.base) = state.bits() }
    }

    pub(crate) fn set_state_run(&mut self, pfn: Pfn, count: usize, state: PageState) {
        for i in 0..count {
            self.set_state(pfn + i, state);
        }
    }

    /// Whether `pfn` falls anywhere within the area, metadata table
    /// included (`[virt_to_pfn(page_states), top)`).
    pub fn area_contains_pfn(&self, pfn: Pfn) -> bool {
        pfn >= addr::pfn_of(self.page_states) && pfn < self.top
    }

    /// Whether `pfn` falls in the usable `[base, top)` range.
    pub fn usable_area_contains_pfn(&self, pfn: Pfn) -> bool {
        pfn >= self.base && pfn < self.top
    }
}

/// Whether `pfn` falls in `[meta_start, top)`.
fn range_contains(meta_start: Pfn, top: Pfn, pfn: Pfn) -> bool {
    pfn >= meta_start && pfn < top
}

/// The registry of all areas, protected by the single global lock named in
/// the concurrency model.
pub struct Registry {
    areas: [Option<Area>; MAX_AREAS],
    mask: u8,
}

impl Registry {
    const fn new() -> Self {
        Registry {
            areas: [None, None, None, None, None, None, None, None],
            mask: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self::new()
    }

    #[inline]
    pub fn initialized(&self) -> bool {
        self.mask != 0
    }

    /// The bitmask of currently occupied registry slots.
    #[inline]
    pub(crate) fn mask(&self) -> u8 {
        self.mask
    }

    pub(crate) fn area(&self, slot: usize) -> Option<&Area> {
        if self.mask & (1 << slot) != 0 {
            self.areas[slot].as_ref()
        } else {
            None
        }
    }

    pub(crate) fn area_mut(&mut self, slot: usize) -> Option<&mut Area> {
        if self.mask & (1 << slot) != 0 {
            self.areas[slot].as_mut()
        } else {
            None
        }
    }

    /// Finds the area whose usable range contains `pfn`.
    pub(crate) fn area_for_pfn_mut(&mut self, pfn: Pfn) -> Option<&mut Area> {
        for i in 0..MAX_AREAS {
            if self.mask & (1 << i) != 0 && self.areas[i].as_ref().unwrap().usable_area_contains_pfn(pfn) {
                return self.areas[i].as_mut();
            }
        }
        None
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_AREAS).filter(move |i| self.mask & (1 << i) != 0)
    }
}

/// The single global lock protecting the entire allocator state: all
/// areas, all freelists, all metadata.
pub(crate) static AREAS: Mutex<Registry> = Mutex::new(Registry::new());

/// Returns whether at least one area has been initialised.
pub fn page_alloc_initialized() -> bool {
    AREAS.lock().initialized()
}

/// Computes the metadata table size in pages: the smallest `t` such that
/// the table can describe every byte of memory that follows it.
fn table_size(start_pfn: Pfn, top_pfn: Pfn) -> usize {
    div_ceil(top_pfn - start_pfn, PAGE_SIZE + 1)
}

/// Initialises a single area at slot `n` spanning `[start_pfn, top_pfn)`,
/// carving the metadata table out of its own front.
///
/// # Panics
///
/// On any precondition violation named in the allocator's invariants: `n`
/// out of range or already used, degenerate or oversized range, or overlap
/// with an existing area.
fn init_area_at(registry: &mut Registry, n: usize, start_pfn: Pfn, top_pfn: Pfn) {
    log::trace!(
        "area::init_area_at: n = {}, start_pfn = {:#x}, top_pfn = {:#x}",
        n,
        start_pfn,
        top_pfn
    );

    assert!(n < MAX_AREAS, "area number out of range");
    assert!(registry.mask & (1 << n) == 0, "area number already in use");

    assert!(top_pfn > start_pfn, "empty or inverted area range");
    assert!(top_pfn - start_pfn > 4, "area too small");
    assert!(
        top_pfn < (1usize << (usize::BITS as usize - arch::PAGE_SHIFT)),
        "top PFN out of addressable range"
    );

    let size = table_size(start_pfn, top_pfn);
    let page_states = addr::ptr_of(start_pfn);
    let base = start_pfn + size;
    let top = top_pfn;
    let npages = top - base;
    assert!(
        (base - start_pfn) * PAGE_SIZE >= npages,
        "metadata table too small for its own area"
    );

    for i in registry.slots() {
        let other = registry.areas[i].as_ref().unwrap();
        assert!(!other.area_contains_pfn(start_pfn), "area overlap");
        assert!(!other.area_contains_pfn(top_pfn - 1), "area overlap");
        assert!(
            !range_contains(start_pfn, top, addr::pfn_of(other.page_states_ptr())),
            "area overlap"
        );
        assert!(!range_contains(start_pfn, top, other.top() - 1), "area overlap");
    }

    let mut area = Area {
        base,
        top,
        page_states,
        freelists: core::array::from_fn(|_| freelist::new_list()),
    };

    // Seed free blocks maximally greedily: the unique decomposition of
    // `[base, top)` into maximal power-of-two blocks respecting alignment.
    let mut i = base;
    let mut order = 0usize;
    while i < top {
        while i + (1usize << (order + 1)) <= top && addr::is_aligned_order(i, order + 1) {
            order += 1;
        }
        while i + (1usize << order) > top {
            assert!(order != 0, "failed to fit a block within the area");
            order -= 1;
        }
        assert!(order < NLISTS, "block order out of range");

        area.set_state_run(i, 1usize << order, PageState::free(order));
        unsafe { freelist::add(&mut area.freelists[order], i) };

        i += 1usize << order;
    }

    log::debug!(
        "area::init_area_at: area {} ready, base = {:#x}, top = {:#x}, table_size = {} pages",
        n,
        base,
        top,
        size
    );

    registry.areas[n] = Some(area);
    registry.mask |= 1 << n;
}

/// Adds a new memory area to the pool of available memory.
///
/// If `n` is `Some`, the area is installed at that exact slot. If `n` is
/// `None`, the range is auto-routed: sliced at each architecture-provided
/// cutoff, in descending order, and assigned to the corresponding
/// well-known class.
pub fn init_area(n: Option<AreaNumber>, base_pfn: Pfn, top_pfn: Pfn) {
    match n {
        Some(number) => {
            let mut registry = AREAS.lock();
            init_area_at(&mut registry, number.slot(), base_pfn, top_pfn);
        }
        None => {
            let mut top = top_pfn;
            for &(class, cutoff) in AREA_CUTOFFS {
                if top > cutoff {
                    let mut registry = AREAS.lock();
                    if base_pfn >= cutoff {
                        init_area_at(&mut registry, class.slot(), base_pfn, top);
                        top = 0;
                    } else {
                        init_area_at(&mut registry, class.slot(), cutoff, top);
                        top = cutoff;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_arena;

    #[test]
    fn table_size_covers_its_own_area() {
        // The post-condition asserted in `init_area_at`: the table must be
        // able to describe every byte of memory that follows it.
        for top in [5usize, 16, 100, 4096, 1 << 20] {
            let size = table_size(0, top);
            let base = size;
            let npages = top - base;
            assert!((base) * PAGE_SIZE >= npages, "top={top} size={size}");
        }
    }

    #[test]
    fn single_area_exact_power_of_two() {
        with_arena(0x200, || {
            let mut registry = AREAS.lock();
            init_area_at(&mut registry, 0, 0x100, 0x200);
            let area = registry.area(0).unwrap();
            // 16 usable pages (0x200-0x100), minus whatever the metadata
            // table consumes, decompose into maximal aligned blocks.
            let mut total = 0usize;
            for k in 0..NLISTS {
                if !freelist::is_empty(&area.freelists[k]) {
                    total += 1usize << k;
                }
            }
            assert_eq!(total, area.top() - area.base());
        });
    }

    #[test]
    #[should_panic]
    fn overlapping_areas_panic() {
        with_arena(0x400, || {
            let mut registry = AREAS.lock();
            init_area_at(&mut registry, 0, 0x100, 0x200);
            init_area_at(&mut registry, 1, 0x180, 0x280);
        });
    }

    #[test]
    #[should_panic]
    fn undersized_area_panics() {
        with_arena(0x10, || {
            let mut registry = AREAS.lock();
            init_area_at(&mut registry, 0, 0, 4);
        });
    }

    #[test]
    fn custom_slot_reaches_beyond_the_named_classes() {
        with_arena(0x200, || {
            init_area(Some(AreaNumber::Custom(7)), 0x100, 0x200);
            let registry = AREAS.lock();
            assert!(registry.area(7).is_some());
        });
    }
}
