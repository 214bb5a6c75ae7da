//! Architecture-layer constants: page geometry and the PFN cutoffs that
//! split a contiguous physical range into the well-known area classes. A
//! real target would provide its own values here (and could vary
//! `PAGE_SHIFT`); this module picks the conventional x86-ish defaults.

use crate::area::AreaNumber;

/// Log2 of the page size.
pub const PAGE_SHIFT: usize = 12;

/// The size of a single page, in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Mask of the in-page offset bits of an address.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Upper bound on the number of areas the registry can hold.
pub const MAX_AREAS: usize = 8;

/// Number of distinct block orders, `[0, NLISTS)`.
pub const NLISTS: usize = usize::BITS as usize - PAGE_SHIFT;

/// PFN cutoffs for the well-known area classes, in descending order, as
/// consumed by [`crate::area::init_area`]'s auto-routing path.
///
/// A PFN range handed to auto-routing is sliced at each cutoff in turn:
/// everything at or above a cutoff becomes that cutoff's class, and the
/// remainder is considered for the next (lower) cutoff.
pub const AREA_CUTOFFS: &[(AreaNumber, usize)] = &[
    (AreaNumber::High, 0x1_0000_0000 >> PAGE_SHIFT),   // 4 GiB and above
    (AreaNumber::Normal, 0x0100_0000 >> PAGE_SHIFT),   // [16 MiB, 4 GiB)
    (AreaNumber::Low, 0x0010_0000 >> PAGE_SHIFT),      // [1 MiB, 16 MiB)
    (AreaNumber::Lowest, 0),                           // [0, 1 MiB)
];
