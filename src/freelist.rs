//! Intrusive freelist.
//!
//! Free pages carry no payload, so the list node overlays the first bytes
//! of the free page itself. The block order lives in the per-area metadata
//! table rather than on the node, so the node itself carries only the link.

use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListLink};

use crate::addr::{self, Pfn};

/// The node overlaid on the first bytes of a free page.
#[derive(Debug, Default)]
pub struct FreeNode {
    link: LinkedListLink,
}

intrusive_adapter!(pub FreeAdapter = &'static FreeNode: FreeNode { link: LinkedListLink });

/// A freelist: the circular, doubly-linked list for one block order.
pub type PfList = LinkedList<FreeAdapter>;

/// Builds a fresh, empty freelist (its sentinel pointing to itself).
#[inline]
pub fn new_list() -> PfList {
    PfList::new(FreeAdapter::new())
}

/// Views the page at `pfn` as a free-list node.
///
/// # Safety
///
/// `pfn` must be free and addressable through the installed physical map.
#[inline]
unsafe fn node_at(pfn: Pfn) -> &'static FreeNode {
    &*(addr::ptr_of(pfn).cast::<FreeNode>())
}

#[inline]
fn pfn_of_node(node: &'static FreeNode) -> Pfn {
    addr::pfn_of((node as *const FreeNode as *mut FreeNode).cast())
}

/// Links the page at `pfn` into the front of `list`.
///
/// # Safety
///
/// `pfn` must be free and not already linked into any freelist.
pub unsafe fn add(list: &mut PfList, pfn: Pfn) {
    list.push_front(node_at(pfn));
}

/// Unlinks the page at `pfn` from whichever freelist it is currently in.
///
/// # Safety
///
/// `pfn` must currently be the header of a block linked into `list`.
pub unsafe fn remove(list: &mut PfList, pfn: Pfn) {
    let mut cursor = list.cursor_mut_from_ptr(node_at(pfn));
    cursor.remove();
}

/// The PFN at the head of `list`, without unlinking it.
pub fn front(list: &PfList) -> Option<Pfn> {
    list.front().get().map(|node| pfn_of_node(node))
}

/// Pops the head of `list` and returns its PFN.
pub fn pop_front(list: &mut PfList) -> Option<Pfn> {
    list.pop_front().map(pfn_of_node)
}

/// Whether `list` has no entries.
pub fn is_empty(list: &PfList) -> bool {
    list.is_empty()
}
