//! Memory provider that forwards to the global allocator.
//!
//! This is a trivial forwarder to `std::alloc` and is excluded from coverage and mutation testing.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::pal::MemoryProvider;

/// Real memory provider backed by the global allocator.
#[derive(Debug, Default)]
pub(crate) struct SystemMemoryProvider;

// Trivial forwarder to system APIs - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl MemoryProvider for SystemMemoryProvider {
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        assert!(
            layout.size() > 0,
            "memory provider cannot acquire a zero-sized block"
        );

        // SAFETY: The layout has a non-zero size, checked above.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release(&self, block: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding safety requirements to the caller, who guarantees that the block
        // came from `acquire()` above (and therefore `alloc()`) with the same layout.
        unsafe {
            dealloc(block.as_ptr(), layout);
        }
    }
}
