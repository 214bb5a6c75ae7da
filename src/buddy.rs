//! The buddy engine: split, coalesce, allocate-with-alignment, free,
//! reserve, unreserve. Every helper here assumes the caller already holds
//! the area registry's lock.

use crate::addr::{self, PAddr, Pfn};
use crate::area::{self, Area, Registry, AREAS};
use crate::arch::{self, MAX_AREAS, NLISTS, PAGE_SIZE};
use crate::bits::div_ceil;
use crate::freelist;
use crate::metadata::PageState;

/// Bitmask selecting every registry slot.
pub const ALL_AREAS: u8 = ((1u16 << MAX_AREAS) - 1) as u8;

/// Failure of a batch reservation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReserveError {
    /// At least one requested frame was outside any area, or already
    /// allocated/special. The reservation was rolled back in full.
    Unavailable,
}

/// Splits the free block headed at `pfn` into two half-sized blocks.
///
/// # Preconditions
///
/// The lock is held; the block headed at `pfn` is free, of order `k > 0`,
/// linked in `freelists[k]`, and wholly inside `area`.
fn split(area: &mut Area, pfn: Pfn) {
    log::trace!("buddy::split: pfn = {:#x}", pfn);
    debug_assert!(area.usable_area_contains_pfn(pfn));

    let order = area.state(pfn).order();
    assert!(order > 0 && order < NLISTS, "split of an order-0 or invalid block");
    assert!(addr::is_aligned_order(pfn, order), "split of a misaligned block");
    assert!(
        area.usable_area_contains_pfn(pfn + (1usize << order) - 1),
        "block escapes its area"
    );

    unsafe { freelist::remove(&mut area.freelists[order], pfn) };

    for i in 0..(1usize << order) {
        debug_assert_eq!(area.state(pfn + i).order(), order, "inconsistent block metadata");
    }
    let half = order - 1;
    area.set_state_run(pfn, 1usize << order, PageState::free(half));

    unsafe {
        freelist::add(&mut area.freelists[half], pfn);
        freelist::add(&mut area.freelists[half], pfn + (1usize << half));
    }
}

/// Attempts to merge the adjacent order-`order` blocks headed at `pfn` and
/// `pfn2 == pfn + 2^order`. Returns `true` on success.
fn coalesce(area: &mut Area, order: usize, pfn: Pfn, pfn2: Pfn) -> bool {
    log::trace!("buddy::coalesce: order = {order}, pfn = {pfn:#x}, pfn2 = {pfn2:#x}");
    debug_assert!(addr::is_aligned_order(pfn, order) && addr::is_aligned_order(pfn2, order));
    debug_assert_eq!(pfn2, pfn + (1usize << order));

    if order + 1 >= NLISTS {
        return false;
    }

    if !area.usable_area_contains_pfn(pfn) || !area.usable_area_contains_pfn(pfn2 + (1usize << order) - 1) {
        return false;
    }

    if area.state(pfn) != PageState::free(order) || area.state(pfn2) != PageState::free(order) {
        return false;
    }

    unsafe {
        freelist::remove(&mut area.freelists[order], pfn2);
        freelist::remove(&mut area.freelists[order], pfn);
    }

    area.set_state_run(pfn, 2usize << order, PageState::free(order + 1));
    unsafe { freelist::add(&mut area.freelists[order + 1], pfn) };
    true
}

/// Returns a block whose alignment is at least `2^align_order` and whose
/// size is exactly `2^size_order`, or `None` if the area has no such block.
fn memalign_order(area: &mut Area, align_order: usize, size_order: usize) -> Option<Pfn> {
    assert!(align_order < NLISTS && size_order < NLISTS, "order out of range");

    let mut order = align_order.max(size_order);
    while order < NLISTS && freelist::is_empty(&area.freelists[order]) {
        order += 1;
    }
    if order >= NLISTS {
        return None;
    }

    let pfn = freelist::front(&area.freelists[order]).expect("non-empty freelist has a front");

    while area.state(pfn).order() > size_order {
        split(area, pfn);
    }

    unsafe { freelist::remove(&mut area.freelists[size_order], pfn) };
    area.set_state_run(pfn, 1usize << size_order, PageState::allocated(size_order));
    Some(pfn)
}

/// Iterates areas `0..MAX_AREAS` in ascending order, restricted by
/// `area_mask & areas_mask`, returning the first successful allocation.
fn memalign_order_area(registry: &mut Registry, area_mask: u8, align_order: usize, size_order: usize) -> Option<Pfn> {
    log::trace!(
        "buddy::memalign_order_area: area_mask = {area_mask:#x}, align_order = {align_order}, size_order = {size_order}"
    );
    let mask = area_mask & registry.mask();
    for i in 0..MAX_AREAS {
        if mask & (1 << i) == 0 {
            continue;
        }
        if let Some(area) = registry.area_mut(i) {
            if let Some(pfn) = memalign_order(area, align_order, size_order) {
                return Some(pfn);
            }
        }
    }
    None
}

/// Frees the block headed at `pfn`, then iteratively coalesces it with its
/// buddies for as long as they are free and of the same order.
fn free_pages_pfn(registry: &mut Registry, pfn: Pfn) {
    let area = registry
        .area_for_pfn_mut(pfn)
        .unwrap_or_else(|| panic!("memory does not belong to any area: pfn {pfn:#x}"));

    let order = area.state(pfn).order();
    assert_eq!(
        area.state(pfn),
        PageState::allocated(order),
        "free of a page that is not an allocated block header"
    );
    assert!(order < NLISTS, "corrupted block order");
    assert!(addr::is_aligned_order(pfn, order), "misaligned block");
    assert!(
        area.usable_area_contains_pfn(pfn + (1usize << order) - 1),
        "block escapes its area"
    );

    for i in 0..(1usize << order) {
        assert_eq!(
            area.state(pfn + i),
            PageState::allocated(order),
            "inconsistent block metadata"
        );
    }

    area.set_state_run(pfn, 1usize << order, PageState::free(order));
    unsafe { freelist::add(&mut area.freelists[order], pfn) };

    let mut header = pfn;
    loop {
        let order = area.state(header).order();
        if !addr::is_aligned_order(header, order + 1) {
            header -= 1usize << order;
        }
        let buddy = header + (1usize << order);
        if !coalesce(area, order, header, buddy) {
            break;
        }
    }
}

/// Frees the block previously returned by [`alloc_pages_area`] or
/// [`memalign_pages_area`]. `ptr` may be null, in which case this is a
/// no-op.
pub fn free_pages(ptr: *mut u8) {
    log::trace!("buddy::free_pages: ptr = {ptr:?}");
    if ptr.is_null() {
        return;
    }
    assert_eq!(ptr as usize & (PAGE_SIZE - 1), 0, "pointer is not page-aligned");

    let pfn = addr::pfn_of(ptr);
    let mut registry = AREAS.lock();
    free_pages_pfn(&mut registry, pfn);
}

/// Splits the block containing `pfn` down to order 0, then marks that
/// single frame special. Returns `false` if `pfn` is outside any area or
/// already allocated/special.
fn reserve_one_page(registry: &mut Registry, pfn: Pfn) -> bool {
    log::trace!("buddy::reserve_one_page: pfn = {pfn:#x}");

    let area = match registry.area_for_pfn_mut(pfn) {
        Some(area) => area,
        None => return false,
    };

    let state = area.state(pfn);
    if state.is_allocated() || state.is_special() {
        return false;
    }

    while area.state(pfn).bits() != 0 {
        let order = area.state(pfn).order();
        let header = pfn & !((1usize << order) - 1);
        split(area, header);
    }

    unsafe { freelist::remove(&mut area.freelists[0], pfn) };
    area.set_state(pfn, PageState::SPECIAL);
    true
}

/// Clears the special mark on `pfn` and returns it to the buddy pool.
///
/// # Panics
///
/// If `pfn` is not currently special.
fn unreserve_one_page(registry: &mut Registry, pfn: Pfn) {
    log::trace!("buddy::unreserve_one_page: pfn = {pfn:#x}");

    {
        let area = registry
            .area_for_pfn_mut(pfn)
            .unwrap_or_else(|| panic!("unreserve of a pfn outside any area: {pfn:#x}"));
        assert_eq!(area.state(pfn), PageState::SPECIAL, "unreserve of a non-special frame");
        area.set_state(pfn, PageState::allocated(0));
    }
    free_pages_pfn(registry, pfn);
}

/// Allocates `2^order` physically contiguous, naturally aligned pages from
/// one of the areas selected by `area_mask`. Returns `None` on OOM.
pub fn alloc_pages_area(area_mask: u8, order: usize) -> Option<*mut u8> {
    log::trace!("buddy::alloc_pages_area: area_mask = {area_mask:#x}, order = {order}");
    memalign_pages_area_order(area_mask, order, order)
}

fn memalign_pages_area_order(area_mask: u8, align_order: usize, size_order: usize) -> Option<*mut u8> {
    log::trace!(
        "buddy::memalign_pages_area_order: area_mask = {area_mask:#x}, align_order = {align_order}, size_order = {size_order}"
    );
    let mut registry = AREAS.lock();
    memalign_order_area(&mut registry, area_mask, align_order, size_order).map(addr::ptr_of)
}

/// Allocates a physically contiguous block of at least `size_bytes`, aligned
/// to `align_bytes` (a power of two), from one of the areas selected by
/// `area_mask`. Returns `None` on OOM.
pub fn memalign_pages_area(area_mask: u8, align_bytes: usize, size_bytes: usize) -> Option<*mut u8> {
    log::trace!(
        "buddy::memalign_pages_area: area_mask = {area_mask:#x}, align_bytes = {align_bytes:#x}, size_bytes = {size_bytes:#x}"
    );
    assert!(align_bytes.is_power_of_two(), "alignment must be a power of two");

    let align_order = crate::bits::log2_ceil(div_ceil(align_bytes, PAGE_SIZE).max(1));
    let size_order = crate::bits::log2_ceil(div_ceil(size_bytes, PAGE_SIZE).max(1));
    assert!(align_order < NLISTS, "alignment order out of range");
    assert!(size_order < NLISTS, "size order out of range");

    memalign_pages_area_order(area_mask, align_order, size_order)
}

/// Reserves `n` consecutive page-aligned frames starting at `addr`,
/// withdrawing them from buddy circulation. All-or-nothing: if any frame in
/// the range is unavailable, every frame reserved so far is rolled back.
pub fn reserve_pages(addr: PAddr, n: usize) -> Result<(), ReserveError> {
    assert!(addr.is_page_aligned(), "reserve address is not page-aligned");
    if n == 0 {
        return Err(ReserveError::Unavailable);
    }
    let pfn = addr.pfn();

    let mut registry = AREAS.lock();
    let mut done = 0;
    while done < n {
        if !reserve_one_page(&mut registry, pfn + done) {
            break;
        }
        done += 1;
    }

    if done < n {
        for i in 0..done {
            unreserve_one_page(&mut registry, pfn + i);
        }
        return Err(ReserveError::Unavailable);
    }
    Ok(())
}

/// Unreserves `n` consecutive frames starting at `addr`, returning them to
/// buddy circulation (with coalescing).
///
/// # Panics
///
/// If any of the `n` frames is not currently special.
pub fn unreserve_pages(addr: PAddr, n: usize) {
    assert!(addr.is_page_aligned(), "unreserve address is not page-aligned");
    let pfn = addr.pfn();

    let mut registry = AREAS.lock();
    for i in 0..n {
        unreserve_one_page(&mut registry, pfn + i);
    }
}
