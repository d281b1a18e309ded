//! Fake memory provider for testing.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::pal::MemoryProvider;

/// Internal state for the fake memory provider that can be shared between clones.
#[derive(Debug, Default)]
struct FakeMemoryProviderState {
    /// While set, every `acquire()` call fails.
    fail_acquire: bool,

    acquire_count: usize,
    release_count: usize,
    failed_acquire_count: usize,

    /// Address and layout of every block that has been acquired but not yet released.
    outstanding: Vec<(usize, Layout)>,
}

/// Fake implementation of the memory provider for testing.
///
/// Real memory is still obtained from the global allocator, so pools built on top of this
/// provider are fully functional. On top of that, tests can make acquisition fail on demand
/// and inspect how many blocks were acquired and released. Releasing a block that is not
/// outstanding, or with a different layout than it was acquired with, panics.
///
/// Multiple clones of the same `FakeMemoryProvider` share the same state, so a test can keep
/// a clone for inspection after handing another clone to a pool.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeMemoryProvider {
    state: Arc<Mutex<FakeMemoryProviderState>>,
}

impl FakeMemoryProvider {
    /// Creates a new fake memory provider that succeeds by default.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `acquire()` call fail (or succeed again, if `false`).
    pub(crate) fn set_fail_acquire(&self, fail: bool) {
        self.state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned")
            .fail_acquire = fail;
    }

    /// Number of blocks successfully acquired so far.
    pub(crate) fn acquire_count(&self) -> usize {
        self.state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned")
            .acquire_count
    }

    /// Number of `acquire()` calls that were made to fail.
    pub(crate) fn failed_acquire_count(&self) -> usize {
        self.state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned")
            .failed_acquire_count
    }

    /// Number of blocks released so far.
    pub(crate) fn release_count(&self) -> usize {
        self.state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned")
            .release_count
    }

    /// Number of blocks acquired but not yet released.
    pub(crate) fn outstanding_count(&self) -> usize {
        self.state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned")
            .outstanding
            .len()
    }
}

impl MemoryProvider for FakeMemoryProvider {
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        assert!(
            layout.size() > 0,
            "memory provider cannot acquire a zero-sized block"
        );

        let mut state = self
            .state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned");

        if state.fail_acquire {
            state.failed_acquire_count = state.failed_acquire_count.wrapping_add(1);
            return None;
        }

        // SAFETY: The layout has a non-zero size, checked above.
        let block = NonNull::new(unsafe { alloc(layout) })?;

        state.acquire_count = state.acquire_count.wrapping_add(1);
        state.outstanding.push((block.as_ptr() as usize, layout));

        Some(block)
    }

    unsafe fn release(&self, block: NonNull<u8>, layout: Layout) {
        let mut state = self
            .state
            .lock()
            .expect("FakeMemoryProvider state lock should not be poisoned");

        let address = block.as_ptr() as usize;

        let position = state
            .outstanding
            .iter()
            .position(|&(outstanding_address, _)| outstanding_address == address)
            .expect("released a block that is not outstanding");

        let (_, acquired_layout) = state.outstanding.swap_remove(position);
        assert_eq!(
            acquired_layout, layout,
            "block released with a different layout than it was acquired with"
        );

        state.release_count = state.release_count.wrapping_add(1);

        // SAFETY: The block is outstanding, so it came from `alloc()` in `acquire()` with the
        // same layout (verified above) and has not been released yet.
        unsafe {
            dealloc(block.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_are_counted() {
        let provider = FakeMemoryProvider::new();
        let layout = Layout::new::<u64>();

        let block = provider.acquire(layout).expect("fake provider succeeds by default");
        assert_eq!(provider.acquire_count(), 1);
        assert_eq!(provider.outstanding_count(), 1);

        // SAFETY: The block was just acquired from this provider with this layout.
        unsafe {
            provider.release(block, layout);
        }

        assert_eq!(provider.release_count(), 1);
        assert_eq!(provider.outstanding_count(), 0);
    }

    #[test]
    fn failure_can_be_toggled() {
        let provider = FakeMemoryProvider::new();
        let layout = Layout::new::<u64>();

        provider.set_fail_acquire(true);
        assert!(provider.acquire(layout).is_none());
        assert_eq!(provider.failed_acquire_count(), 1);
        assert_eq!(provider.acquire_count(), 0);

        provider.set_fail_acquire(false);
        let block = provider.acquire(layout).expect("failure was switched off");

        // SAFETY: The block was just acquired from this provider with this layout.
        unsafe {
            provider.release(block, layout);
        }
    }

    #[test]
    fn shared_state_between_clones() {
        let provider1 = FakeMemoryProvider::new();
        let provider2 = provider1.clone();
        let layout = Layout::new::<u32>();

        provider1.set_fail_acquire(true);
        assert!(provider2.acquire(layout).is_none());
        assert_eq!(provider1.failed_acquire_count(), 1);
    }

    #[test]
    #[should_panic]
    fn release_with_wrong_layout_panics() {
        let provider = FakeMemoryProvider::new();

        let block = provider
            .acquire(Layout::new::<u64>())
            .expect("fake provider succeeds by default");

        // SAFETY: This is exactly the contract violation under test; the fake detects it
        // before touching the allocator.
        unsafe {
            provider.release(block, Layout::new::<u32>());
        }
    }
}
