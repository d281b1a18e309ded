//! Facade that dispatches to either the real memory provider or a fake in tests.

use std::alloc::Layout;
use std::ptr::NonNull;

#[cfg(test)]
use crate::pal::FakeMemoryProvider;
use crate::pal::{MemoryProvider, SystemMemoryProvider};

/// Facade over the memory provider, dispatching to the real or fake implementation.
///
/// In production, this always uses `SystemMemoryProvider`. In tests, it can also wrap a
/// `FakeMemoryProvider` to inject allocation failures and audit page accounting.
#[derive(Clone)]
pub(crate) enum MemoryProviderFacade {
    /// Real memory provider backed by the global allocator.
    Target(&'static SystemMemoryProvider),

    /// Fake memory provider for testing.
    #[cfg(test)]
    Fake(FakeMemoryProvider),
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl std::fmt::Debug for MemoryProviderFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(_) => f.debug_struct("MemoryProviderFacade::Target").finish(),
            #[cfg(test)]
            Self::Fake(_) => f.debug_struct("MemoryProviderFacade::Fake").finish(),
        }
    }
}

/// Static instance of the real memory provider for production use.
static SYSTEM_MEMORY_PROVIDER: SystemMemoryProvider = SystemMemoryProvider;

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl MemoryProviderFacade {
    /// Creates a facade using the global allocator.
    pub(crate) const fn target() -> Self {
        Self::Target(&SYSTEM_MEMORY_PROVIDER)
    }

    /// Creates a facade wrapping a fake memory provider (test builds only).
    #[cfg(test)]
    pub(crate) fn from_fake(fake: FakeMemoryProvider) -> Self {
        Self::Fake(fake)
    }
}

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl MemoryProvider for MemoryProviderFacade {
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        match self {
            Self::Target(provider) => provider.acquire(layout),
            #[cfg(test)]
            Self::Fake(fake) => fake.acquire(layout),
        }
    }

    unsafe fn release(&self, block: NonNull<u8>, layout: Layout) {
        match self {
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Target(provider) => unsafe { provider.release(block, layout) },
            #[cfg(test)]
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Fake(fake) => unsafe { fake.release(block, layout) },
        }
    }
}

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Default for MemoryProviderFacade {
    fn default() -> Self {
        Self::target()
    }
}
