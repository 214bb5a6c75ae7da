//! Test-only helpers shared by `area` and `buddy`'s unit tests.
//!
//! Both modules exercise the single process-wide [`crate::area::AREAS`]
//! registry and the single process-wide physical map base, so tests that
//! touch either must run serialised and must reset both between runs —
//! otherwise two tests racing on the same statics would see each other's
//! areas.

use spin::Mutex;

use crate::addr;
use crate::area::{self, AREAS};
use crate::arch::PAGE_SIZE;

/// Guards every test in this crate that touches the global registry or the
/// global physical map base.
static TEST_SERIAL: Mutex<()> = Mutex::new(());

/// Runs `f` with exclusive access to a freshly reset registry and a fresh
/// `pages`-page backing arena installed as the physical map.
pub(crate) fn with_arena<R>(pages: usize, f: impl FnOnce() -> R) -> R {
    let _guard = TEST_SERIAL.lock();
    *AREAS.lock() = area::Registry::new_for_test();

    let mut arena = vec![0u8; pages * PAGE_SIZE];
    unsafe { addr::set_phys_map_base(arena.as_mut_ptr()) };
    let r = f();
    unsafe { addr::set_phys_map_base(core::ptr::null_mut()) };
    r
}
