//! Memory provider trait definition.

use std::alloc::Layout;
use std::fmt::Debug;
use std::ptr::NonNull;

/// Hands out opaque blocks of raw memory and takes them back.
///
/// This is the only external collaborator of the pool. Blocks are requested whole (one per
/// page) and released whole; the provider knows nothing about segments or objects.
pub(crate) trait MemoryProvider: Debug + Send + Sync + 'static {
    /// Acquires a block of memory matching `layout`.
    ///
    /// Returns `None` if the memory could not be obtained. The contents of the block are
    /// uninitialized.
    ///
    /// # Panics
    ///
    /// Panics if `layout` has zero size.
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block previously obtained from [`acquire()`][Self::acquire].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `block` was returned by `acquire()` on this provider
    /// with the same `layout`, and that it has not already been released.
    unsafe fn release(&self, block: NonNull<u8>, layout: Layout);
}
