use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::pal::MemoryProviderFacade;
use crate::{DEFAULT_GROWTH, DropPolicy, SegmentPool};

/// Builder for creating an instance of [`SegmentPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`SegmentPool::new()`][1] grows by 64 segments at a time
/// and silently abandons objects that are still allocated when the pool is dropped.
///
/// # Examples
///
/// ```
/// use segment_pool::{DropPolicy, SegmentPool};
///
/// let pool = SegmentPool::<u64>::builder()
///     .default_growth(16)
///     .drop_policy(DropPolicy::MustNotAbandonItems)
///     .build();
///
/// assert_eq!(pool.default_growth().get(), 16);
/// ```
///
/// [1]: SegmentPool::new
#[must_use]
pub struct SegmentPoolBuilder<T> {
    default_growth: NonZero<usize>,
    drop_policy: DropPolicy,
    memory_provider: MemoryProviderFacade,

    _item: PhantomData<T>,
}

impl<T> std::fmt::Debug for SegmentPoolBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPoolBuilder")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("default_growth", &self.default_growth)
            .field("drop_policy", &self.drop_policy)
            .field("memory_provider", &self.memory_provider)
            .finish()
    }
}

impl<T> SegmentPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            default_growth: DEFAULT_GROWTH,
            drop_policy: DropPolicy::default(),
            memory_provider: MemoryProviderFacade::default(),
            _item: PhantomData,
        }
    }

    /// Sets how many segments the pool adds whenever it runs out of free segments during
    /// allocation.
    ///
    /// A value of zero is treated as one, so the pool always makes progress when it grows.
    ///
    /// # Examples
    ///
    /// ```
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::<u32>::builder().default_growth(0).build();
    ///
    /// assert_eq!(pool.default_growth().get(), 1);
    /// ```
    pub fn default_growth(mut self, segment_count: usize) -> Self {
        self.default_growth = NonZero::new(segment_count).unwrap_or(nz!(1));
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat objects that
    /// are still allocated when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use segment_pool::{DropPolicy, SegmentPool};
    ///
    /// let pool = SegmentPool::<u32>::builder()
    ///     .drop_policy(DropPolicy::MustNotAbandonItems)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn memory_provider(mut self, memory_provider: MemoryProviderFacade) -> Self {
        self.memory_provider = memory_provider;
        self
    }

    /// Builds the segment pool with the specified configuration.
    ///
    /// The pool starts without any pages; memory is only acquired on the first allocation or
    /// an explicit [`grow()`][SegmentPool::grow].
    ///
    /// # Examples
    ///
    /// ```
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::<u32>::builder().build();
    ///
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn build(self) -> SegmentPool<T> {
        SegmentPool::new_inner(self.default_growth, self.drop_policy, self.memory_provider)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SegmentPoolBuilder<u32>: Send, std::fmt::Debug);
    assert_not_impl_any!(SegmentPoolBuilder<std::rc::Rc<u32>>: Send);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = SegmentPoolBuilder::<u32>::new();

        assert_eq!(builder.default_growth, DEFAULT_GROWTH);
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn default_growth_sets_value() {
        let builder = SegmentPoolBuilder::<u32>::new().default_growth(7);

        assert_eq!(builder.default_growth.get(), 7);
    }

    #[test]
    fn zero_default_growth_is_coerced_to_one() {
        let builder = SegmentPoolBuilder::<u32>::new().default_growth(0);

        assert_eq!(builder.default_growth.get(), 1);
    }

    #[test]
    fn drop_policy_can_be_overridden() {
        let builder = SegmentPoolBuilder::<u32>::new()
            .drop_policy(DropPolicy::MustNotAbandonItems)
            .drop_policy(DropPolicy::MayAbandonItems);

        assert_eq!(builder.drop_policy, DropPolicy::MayAbandonItems);
    }

    #[test]
    fn build_carries_configuration_into_pool() {
        let pool = SegmentPoolBuilder::<String>::new()
            .default_growth(3)
            .drop_policy(DropPolicy::MustNotAbandonItems)
            .build();

        assert_eq!(pool.default_growth().get(), 3);
        assert!(pool.is_empty());
    }

    #[test]
    fn builder_is_debug() {
        let builder = SegmentPoolBuilder::<u32>::new();
        let debug_output = format!("{builder:?}");

        assert!(debug_output.contains("SegmentPoolBuilder"));
        assert!(debug_output.contains("u32"));
    }

    #[test]
    fn builder_can_move_between_threads() {
        let builder = SegmentPoolBuilder::<u64>::new().default_growth(2);
        let handle = std::thread::spawn(move || builder.build().default_growth());

        assert_eq!(handle.join().expect("thread completed successfully").get(), 2);
    }
}
