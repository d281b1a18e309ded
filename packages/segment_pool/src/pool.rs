use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use new_zealand::nz;
use scopeguard::ScopeGuard;
use tracing::{debug, trace, warn};

use crate::metrics::{GROW_FAILURES, PAGE_SEGMENTS};
use crate::pal::{MemoryProvider, MemoryProviderFacade};
use crate::{
    DropPolicy, Error, FreeList, PageHeader, PageLayout, Result, Segment, SegmentPoolBuilder,
};

/// How many segments a pool adds per automatic growth unless configured otherwise.
pub(crate) const DEFAULT_GROWTH: NonZero<usize> = nz!(64);

/// An object pool for values of a single type `T`, handing out raw pointers to fixed-size
/// segments carved from large pages.
///
/// The pool acquires memory in pages of many segments at once and threads the vacant segments
/// into an intrusive free list. Allocating pops a segment from the list and constructs the value
/// in place; deallocating drops the value and pushes the segment back. The global allocator is
/// only involved when the free list runs dry and a new page is needed.
///
/// # Raw pointers, no bookkeeping
///
/// The pool does not know which segments are live. It only knows which are free. This keeps
/// every segment exactly `max(size_of::<T>(), size_of::<pointer>())` bytes but means:
///
/// * [`deallocate()`][Self::deallocate] is `unsafe` - passing a pointer that did not come from
///   this pool, or passing the same pointer twice, is undefined behavior and is not detected.
/// * When the pool is dropped, objects that are still allocated are not dropped. Their memory
///   is released with the pages that contain them. Use [`DropPolicy::MustNotAbandonItems`] to
///   turn that situation into a panic.
///
/// Pointers returned by the pool remain valid until they are passed to `deallocate()` or the
/// pool is dropped. Pages are never released or moved while the pool exists, so moving the pool
/// itself does not invalidate any pointers.
///
/// # Failure
///
/// Acquiring a page is the only fallible operation. If it fails, the allocation or growth call
/// returns an [`Error`] and the pool is left exactly as it was.
///
/// # Thread safety
///
/// The pool performs no synchronization. It is [`Send`] when `T` is, so it can be moved to
/// another thread, but it is never [`Sync`]. Wrap it in a mutex or keep one pool per thread if
/// multiple threads need to allocate.
///
/// Moving the pool value, whether to another thread or just to another variable, is allowed
/// and keeps all outstanding pointers valid, because its bookkeeping lives in the pages.
///
/// # Example
///
/// ```rust
/// use segment_pool::SegmentPool;
///
/// let mut pool = SegmentPool::<String>::new();
///
/// let greeting = pool.allocate("Hello".to_string())?;
///
/// // SAFETY: The pointer was just returned by the pool and has not been deallocated.
/// assert_eq!(unsafe { greeting.as_ref() }, "Hello");
///
/// // SAFETY: The pointer came from this pool and is deallocated exactly once.
/// unsafe { pool.deallocate(greeting) };
/// # Ok::<(), segment_pool::Error>(())
/// ```
pub struct SegmentPool<T> {
    /// The most recently acquired page. Each page header links to the page acquired before it.
    last_page: Option<NonNull<PageHeader>>,

    free_list: FreeList<T>,

    default_growth: NonZero<usize>,
    drop_policy: DropPolicy,

    /// Number of pages in the page list.
    page_count: usize,

    /// Total number of segments across all pages, free or live.
    capacity: usize,

    memory_provider: MemoryProviderFacade,

    _items: PhantomData<T>,
}

// SAFETY: The pool exclusively owns its pages and every segment in them. Moving the pool to
// another thread moves that ownership with it, which is sound as long as the items themselves
// may be sent. The memory provider facade is Send on its own.
unsafe impl<T: Send> Send for SegmentPool<T> {}

impl<T> SegmentPool<T> {
    /// Creates a new [`SegmentPool`] with the default configuration.
    ///
    /// The pool starts without any pages and grows by 64 segments whenever it runs out.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::<u64>::new();
    ///
    /// assert!(pool.is_empty());
    /// assert_eq!(pool.capacity(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`SegmentPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::<u64>::builder().default_growth(8).build();
    ///
    /// assert_eq!(pool.default_growth().get(), 8);
    /// ```
    pub fn builder() -> SegmentPoolBuilder<T> {
        SegmentPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(
        default_growth: NonZero<usize>,
        drop_policy: DropPolicy,
        memory_provider: MemoryProviderFacade,
    ) -> Self {
        Self {
            last_page: None,
            free_list: FreeList::new(),
            default_growth,
            drop_policy,
            page_count: 0,
            capacity: 0,
            memory_provider,
            _items: PhantomData,
        }
    }

    /// The memory layout of a single segment.
    ///
    /// A segment is large enough to hold either a `T` or a free-list link, whichever is larger,
    /// and is aligned for both.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// // A u8 still takes up a pointer-sized segment.
    /// assert_eq!(
    ///     SegmentPool::<u8>::segment_layout().size(),
    ///     size_of::<usize>()
    /// );
    /// ```
    #[must_use]
    pub fn segment_layout() -> Layout {
        Layout::new::<Segment<T>>()
    }

    /// How many segments the pool adds whenever it runs out of free segments during allocation.
    #[must_use]
    pub fn default_growth(&self) -> NonZero<usize> {
        self.default_growth
    }

    /// Whether the free list is empty, meaning the next allocation will have to grow the pool.
    ///
    /// This says nothing about how many objects are currently allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<u32>::new();
    /// assert!(pool.is_empty());
    ///
    /// pool.grow(nz!(1))?;
    /// assert!(!pool.is_empty());
    ///
    /// let item = pool.allocate(42)?;
    /// assert!(pool.is_empty());
    /// # unsafe { pool.deallocate(item) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }

    /// The number of segments that can be allocated without growing the pool.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free_list.len()
    }

    /// The number of objects that are currently allocated.
    ///
    /// This is unrelated to [`is_empty()`][Self::is_empty], which only looks at the free list.
    /// A pool that has grown but not allocated anything has a live count of zero and is not
    /// empty.
    #[must_use]
    pub fn live_count(&self) -> usize {
        debug_assert!(self.free_list.len() <= self.capacity);

        // Cannot underflow because every free segment is part of the capacity.
        self.capacity.wrapping_sub(self.free_list.len())
    }

    /// The total number of segments in the pool, free or allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of pages the pool has acquired from the memory provider.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Acquires one page of `segment_count` segments and adds all of them to the free list.
    ///
    /// This is what the pool does by itself (with the default growth size) when an allocation
    /// finds the free list empty. Calling it explicitly allows sizing pages up front.
    ///
    /// # Errors
    ///
    /// Returns an error if the page could not be acquired. In that case nothing about the pool
    /// has changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use new_zealand::nz;
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<u64>::new();
    /// pool.grow(nz!(10))?;
    ///
    /// assert_eq!(pool.capacity(), 10);
    /// assert_eq!(pool.free_len(), 10);
    /// assert_eq!(pool.page_count(), 1);
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn grow(&mut self, segment_count: NonZero<usize>) -> Result<()> {
        self.try_grow(segment_count).inspect_err(|error| {
            GROW_FAILURES.with(|event| event.observe_once());
            warn!(
                segment_count = segment_count.get(),
                %error,
                "segment pool growth failed"
            );
        })
    }

    fn try_grow(&mut self, segment_count: NonZero<usize>) -> Result<()> {
        let layout = PageLayout::<T>::calculate(segment_count)?;

        let block = self
            .memory_provider
            .acquire(layout.block())
            .ok_or(Error::OutOfMemory {
                segment_count: segment_count.get(),
                page_bytes: layout.block().size(),
            })?;

        // Nothing below can fail, so the page is linked onto both lists or, if we returned
        // above, onto neither.

        // SAFETY: The block was just acquired with the layout's block layout and nobody else
        // knows about it yet.
        let page = unsafe { layout.initialize(block, self.last_page) };
        self.last_page = Some(page);

        // SAFETY: The page was acquired with this same layout.
        for segment in unsafe { layout.segments(page) } {
            // SAFETY: The segment lies within a page we own until the pool is dropped, it has
            // never held an item and it appears exactly once in the iteration.
            unsafe {
                self.free_list.push(segment);
            }
        }

        // Cannot overflow because that would imply more pages than fit in virtual memory.
        self.page_count = self.page_count.wrapping_add(1);
        self.capacity = self.capacity.wrapping_add(segment_count.get());

        PAGE_SEGMENTS.with(|event| event.observe(segment_count.get()));
        debug!(
            segment_count = segment_count.get(),
            page_bytes = layout.block().size(),
            page_count = self.page_count,
            "segment pool acquired page"
        );

        Ok(())
    }

    /// Ensures that at least `additional` more objects can be allocated without the pool
    /// growing during allocation.
    ///
    /// If the free list is too short, exactly one page is acquired to make up the difference.
    /// Does nothing if enough segments are already free.
    ///
    /// # Errors
    ///
    /// Returns an error if the page could not be acquired. In that case nothing about the pool
    /// has changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<u64>::new();
    /// pool.reserve(100)?;
    ///
    /// assert!(pool.free_len() >= 100);
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let missing = additional.saturating_sub(self.free_list.len());

        match NonZero::new(missing) {
            Some(segment_count) => self.grow(segment_count),
            None => Ok(()),
        }
    }

    /// Moves `value` into a free segment and returns a pointer to it.
    ///
    /// If the free list is empty, the pool first grows by its default growth size.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not. In that case `value` is
    /// dropped and nothing about the pool has changed. Use
    /// [`allocate_with()`][Self::allocate_with] to construct the value only once storage for it
    /// is secured.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<(u32, u32)>::new();
    ///
    /// let pair = pool.allocate((1, 2))?;
    ///
    /// // SAFETY: The pointer was just returned by the pool and has not been deallocated.
    /// assert_eq!(unsafe { *pair.as_ptr() }, (1, 2));
    ///
    /// // SAFETY: The pointer came from this pool and is deallocated exactly once.
    /// unsafe { pool.deallocate(pair) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn allocate(&mut self, value: T) -> Result<NonNull<T>> {
        self.allocate_with(|| value)
    }

    /// Constructs a value in a free segment using `constructor` and returns a pointer to it.
    ///
    /// The constructor is only called once a segment has been secured, so a failed growth never
    /// constructs anything.
    ///
    /// If the constructor panics, the segment is returned to the free list before the panic
    /// continues, leaving the pool consistent.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not. In that case the constructor
    /// is not called and nothing about the pool has changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<Vec<u8>>::new();
    ///
    /// let buffer = pool.allocate_with(|| Vec::with_capacity(1024))?;
    ///
    /// // SAFETY: The pointer was just returned by the pool and has not been deallocated.
    /// assert!(unsafe { buffer.as_ref() }.capacity() >= 1024);
    ///
    /// // SAFETY: The pointer came from this pool and is deallocated exactly once.
    /// unsafe { pool.deallocate(buffer) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn allocate_with(&mut self, constructor: impl FnOnce() -> T) -> Result<NonNull<T>> {
        // SAFETY: The closure fully initializes the slot before returning.
        unsafe {
            self.allocate_in_place(|slot: &mut MaybeUninit<T>| {
                slot.write(constructor());
            })
        }
    }

    /// Initializes a value directly in a free segment and returns a pointer to it.
    ///
    /// This allows the caller to initialize the item in place using a closure that receives
    /// a `&mut MaybeUninit<T>`, avoiding a move of the value into the pool. This can matter for
    /// large types or types that need to know their own address during construction.
    ///
    /// If the initializer panics, the segment is returned to the free list before the panic
    /// continues. Whatever the initializer had written by then is not dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not. In that case the initializer
    /// is not called and nothing about the pool has changed.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the closure fully initializes the `MaybeUninit<T>` before
    /// returning.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::mem::MaybeUninit;
    ///
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<[u64; 32]>::new();
    ///
    /// // SAFETY: The closure initializes the whole array.
    /// let table = unsafe {
    ///     pool.allocate_in_place(|slot: &mut MaybeUninit<[u64; 32]>| {
    ///         slot.write([7; 32]);
    ///     })
    /// }?;
    ///
    /// // SAFETY: The pointer was just returned by the pool and has not been deallocated.
    /// assert!(unsafe { table.as_ref() }.iter().all(|&x| x == 7));
    ///
    /// // SAFETY: The pointer came from this pool and is deallocated exactly once.
    /// unsafe { pool.deallocate(table) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub unsafe fn allocate_in_place(
        &mut self,
        initializer: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<NonNull<T>> {
        if self.is_empty() {
            self.grow(self.default_growth)?;
        }

        let segment = self
            .free_list
            .pop()
            .expect("free list cannot be empty after a successful growth");

        // If the initializer panics, the segment goes back where it came from.
        let restore_guard = scopeguard::guard(&mut self.free_list, |free_list| {
            // SAFETY: The segment was popped above and never became live, so it is still vacant
            // storage inside one of our pages.
            unsafe {
                free_list.push(segment);
            }
        });

        let item = Segment::item_ptr(segment);

        // SAFETY: The segment is at least as large and as aligned as T, lies within a page we
        // own and is no longer on the free list, so nothing else refers to it.
        initializer(unsafe { item.cast::<MaybeUninit<T>>().as_mut() });

        ScopeGuard::into_inner(restore_guard);

        trace!(item = ?item, "segment pool allocated segment");

        Ok(item)
    }

    /// Drops the object at `item` and returns its segment to the free list.
    ///
    /// The segment becomes the first one handed out by the next allocation. If the object's
    /// `Drop` implementation panics, the segment is still returned before the panic continues.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `item` was returned by an allocation method of this same
    /// pool and has not already been deallocated, and that no references to the object outlive
    /// this call. None of this is checked; violating it is undefined behavior.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let mut pool = SegmentPool::<String>::new();
    ///
    /// let first = pool.allocate("first".to_string())?;
    ///
    /// // SAFETY: The pointer came from this pool and is deallocated exactly once.
    /// unsafe { pool.deallocate(first) };
    ///
    /// // The freed segment is reused right away.
    /// let second = pool.allocate("second".to_string())?;
    /// assert_eq!(first, second);
    ///
    /// // SAFETY: The pointer came from this pool and is deallocated exactly once.
    /// unsafe { pool.deallocate(second) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub unsafe fn deallocate(&mut self, item: NonNull<T>) {
        let segment = Segment::from_item_ptr(item);

        let _return_guard = scopeguard::guard(&mut self.free_list, |free_list| {
            // SAFETY: The caller guarantees the segment belongs to this pool and was live; by
            // the time this runs the item has been dropped, so the segment is vacant.
            unsafe {
                free_list.push(segment);
            }
        });

        // SAFETY: The caller guarantees the item is a live object allocated by this pool.
        unsafe {
            item.drop_in_place();
        }

        trace!(item = ?item, "segment pool deallocated segment");
    }

    /// Releases every page back to the memory provider.
    ///
    /// Items that are still live are abandoned without being dropped.
    fn release_pages(&mut self) {
        self.free_list = FreeList::new();

        let mut next_page = self.last_page.take();

        while let Some(page) = next_page {
            // SAFETY: Every page on the page list was initialized by try_grow() and is released
            // only here, after which it is no longer reachable from the list.
            let (previous, block_layout) = unsafe { PageHeader::read(page) };

            // SAFETY: The page was acquired from this memory provider with the layout stored
            // in its header and has not been released yet.
            unsafe {
                self.memory_provider.release(page.cast::<u8>(), block_layout);
            }

            next_page = previous;
        }
    }
}

impl<T> Default for SegmentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SegmentPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentPool")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("free_list", &self.free_list)
            .field("default_growth", &self.default_growth)
            .field("drop_policy", &self.drop_policy)
            .field("page_count", &self.page_count)
            .field("capacity", &self.capacity)
            .field("memory_provider", &self.memory_provider)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for SegmentPool<T> {
    fn drop(&mut self) {
        let live_count = self.live_count();
        let page_count = self.page_count;

        self.release_pages();

        if live_count > 0 {
            debug!(
                live_count,
                page_count, "segment pool dropped with live items, abandoning them"
            );
        } else {
            debug!(page_count, "segment pool dropped");
        }

        // We do this check at the end so we release the pages first. If we are already
        // panicking, we do not want to panic again because that would obscure the original panic.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotAbandonItems) {
            assert!(
                live_count == 0,
                "dropped a SegmentPool with {live_count} live items - this is forbidden by DropPolicy::MustNotAbandonItems"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::items_after_statements,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use nm::{Magnitude, Report};

    use super::*;
    use crate::pal::FakeMemoryProvider;

    assert_impl_all!(SegmentPool<u32>: Send, fmt::Debug, Default);
    assert_impl_all!(SegmentPool<String>: Send);
    assert_not_impl_any!(SegmentPool<u32>: Sync, Clone, Copy);
    assert_not_impl_any!(SegmentPool<Rc<u32>>: Send, Sync);

    /// Increments a shared counter when dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn pool_with_fake<T>(default_growth: usize) -> (SegmentPool<T>, FakeMemoryProvider) {
        let fake = FakeMemoryProvider::new();

        let pool = SegmentPool::builder()
            .default_growth(default_growth)
            .memory_provider(MemoryProviderFacade::from_fake(fake.clone()))
            .build();

        (pool, fake)
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = SegmentPool::<u64>::new();

        assert!(pool.is_empty());
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.default_growth(), DEFAULT_GROWTH);
    }

    #[test]
    fn new_pool_acquires_no_memory() {
        let (pool, fake) = pool_with_fake::<u64>(4);

        assert_eq!(fake.acquire_count(), 0);
        drop(pool);
        assert_eq!(fake.release_count(), 0);
    }

    #[test]
    fn smoke_test() {
        let mut pool = SegmentPool::<String>::new();

        let a = pool.allocate("Hello".to_string()).unwrap();
        let b = pool.allocate("World".to_string()).unwrap();
        let c = pool.allocate("Test".to_string()).unwrap();

        assert_eq!(pool.live_count(), 3);

        unsafe {
            assert_eq!(a.as_ref(), "Hello");
            assert_eq!(b.as_ref(), "World");
            assert_eq!(c.as_ref(), "Test");
        }

        unsafe { pool.deallocate(b) };
        let d = pool.allocate("Updated".to_string()).unwrap();

        unsafe {
            assert_eq!(a.as_ref(), "Hello");
            assert_eq!(c.as_ref(), "Test");
            assert_eq!(d.as_ref(), "Updated");

            pool.deallocate(a);
            pool.deallocate(c);
            pool.deallocate(d);
        }

        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn grow_adds_exactly_requested_segments() {
        let (mut pool, fake) = pool_with_fake::<u64>(1);

        pool.grow(nz!(5)).unwrap();

        assert_eq!(pool.free_len(), 5);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.page_count(), 1);
        assert_eq!(fake.acquire_count(), 1);

        let mut items = Vec::new();
        for i in 0..5_u64 {
            items.push(pool.allocate(i).unwrap());
        }

        // All five came from the explicit growth.
        assert_eq!(fake.acquire_count(), 1);
        assert!(pool.is_empty());

        // The sixth triggers an automatic growth.
        items.push(pool.allocate(5).unwrap());
        assert_eq!(fake.acquire_count(), 2);
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.capacity(), 6);

        for item in items {
            unsafe { pool.deallocate(item) };
        }
    }

    #[test]
    fn allocated_segments_are_distinct() {
        let (mut pool, _fake) = pool_with_fake::<u32>(3);

        let items = (0..10_u32)
            .map(|i| pool.allocate(i).unwrap())
            .collect::<Vec<_>>();

        let unique = items.iter().map(|p| p.as_ptr() as usize).collect::<HashSet<_>>();
        assert_eq!(unique.len(), 10);

        for (i, item) in items.iter().enumerate() {
            assert_eq!(unsafe { item.read() }, i as u32);
        }

        for item in items {
            unsafe { pool.deallocate(item) };
        }
    }

    #[test]
    fn allocation_round_trips_fields() {
        #[derive(Debug, PartialEq)]
        struct Record {
            id: u64,
            name: &'static str,
            weight: f32,
        }

        let mut pool = SegmentPool::<Record>::new();

        let item = pool
            .allocate(Record {
                id: 7,
                name: "seven",
                weight: 7.5,
            })
            .unwrap();

        let record = unsafe { item.as_ref() };
        assert_eq!(record.id, 7);
        assert_eq!(record.name, "seven");
        assert!((record.weight - 7.5).abs() < f32::EPSILON);

        unsafe { pool.deallocate(item) };
    }

    #[test]
    fn deallocate_drops_exactly_once() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = SegmentPool::<DropCounter>::new();

        let first = pool
            .allocate(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();
        let second = pool
            .allocate(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();

        assert_eq!(drops.get(), 0);

        unsafe { pool.deallocate(first) };
        assert_eq!(drops.get(), 1);

        unsafe { pool.deallocate(second) };
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn freed_segment_is_reused_first() {
        let mut pool = SegmentPool::<u64>::new();
        pool.grow(nz!(1)).unwrap();

        let first = pool.allocate(1).unwrap();
        unsafe { pool.deallocate(first) };

        let second = pool.allocate(2).unwrap();
        assert_eq!(first, second);
        assert_eq!(unsafe { second.read() }, 2);

        unsafe { pool.deallocate(second) };
    }

    #[test]
    fn reuse_is_last_in_first_out() {
        let mut pool = SegmentPool::<u64>::new();

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(2).unwrap();

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }

        assert_eq!(pool.allocate(3).unwrap(), b);
        assert_eq!(pool.allocate(4).unwrap(), a);
    }

    #[test]
    fn new_page_hands_out_last_segment_first() {
        let mut pool = SegmentPool::<u64>::new();
        pool.grow(nz!(3)).unwrap();

        let first = pool.allocate(1).unwrap();
        let second = pool.allocate(2).unwrap();
        let third = pool.allocate(3).unwrap();

        let stride = SegmentPool::<u64>::segment_layout().size();
        assert_eq!(first.as_ptr() as usize - second.as_ptr() as usize, stride);
        assert_eq!(second.as_ptr() as usize - third.as_ptr() as usize, stride);
    }

    #[test]
    fn failed_growth_leaves_pool_unchanged() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);

        fake.set_fail_acquire(true);

        let result = pool.grow(nz!(4));
        assert!(matches!(
            result,
            Err(Error::OutOfMemory {
                segment_count: 4,
                ..
            })
        ));

        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(fake.failed_acquire_count(), 1);
        assert_eq!(fake.outstanding_count(), 0);
    }

    /// Total count and sum of an event across all threads that have observed it so far.
    ///
    /// Tests run in parallel and share the registry, so callers compare before and after values
    /// and only rely on the difference growing.
    fn event_totals(name: &str) -> (u64, Magnitude) {
        Report::collect()
            .events()
            .filter(|event| event.name() == name)
            .fold((0, 0), |(count, sum), event| {
                (count + event.count(), sum + event.sum())
            })
    }

    #[test]
    fn failed_growth_is_observed_in_metrics() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);
        fake.set_fail_acquire(true);

        let (failures_before, _) = event_totals("segment_pool_grow_failures");

        pool.grow(nz!(4)).unwrap_err();
        pool.allocate(1).unwrap_err();

        let (failures_after, _) = event_totals("segment_pool_grow_failures");
        assert!(failures_after >= failures_before + 2);
    }

    #[test]
    fn acquired_page_is_observed_in_metrics() {
        let mut pool = SegmentPool::<u64>::new();

        let (pages_before, segments_before) = event_totals("segment_pool_page_segments");

        pool.grow(nz!(5)).unwrap();

        let (pages_after, segments_after) = event_totals("segment_pool_page_segments");
        assert!(pages_after > pages_before);
        assert!(segments_after >= segments_before + 5);
    }

    #[test]
    fn live_count_is_independent_of_free_list() {
        let (mut pool, _fake) = pool_with_fake::<u64>(1);

        pool.grow(nz!(1)).unwrap();
        assert_eq!(pool.live_count(), 0);
        assert!(!pool.is_empty());

        let item = pool.allocate(7).unwrap();
        assert_eq!(pool.live_count(), 1);
        assert!(pool.is_empty());

        unsafe { pool.deallocate(item) };
        assert_eq!(pool.live_count(), 0);
        assert!(!pool.is_empty());
    }

    #[test]
    fn failed_growth_preserves_existing_free_segments() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);
        pool.grow(nz!(3)).unwrap();

        fake.set_fail_acquire(true);
        pool.grow(nz!(4)).unwrap_err();

        assert!(!pool.is_empty());
        assert_eq!(pool.free_len(), 3);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn failed_allocation_does_not_construct() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);
        fake.set_fail_acquire(true);

        let constructed = Cell::new(false);
        let result = pool.allocate_with(|| {
            constructed.set(true);
            5
        });

        assert!(result.is_err());
        assert!(!constructed.get());
        assert!(pool.is_empty());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn allocation_succeeds_after_memory_returns() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);

        fake.set_fail_acquire(true);
        pool.allocate(1).unwrap_err();

        fake.set_fail_acquire(false);
        let item = pool.allocate(1).unwrap();
        assert_eq!(unsafe { item.read() }, 1);

        unsafe { pool.deallocate(item) };
    }

    #[test]
    fn overflowing_growth_is_error_without_acquiring() {
        let (mut pool, fake) = pool_with_fake::<u64>(2);

        let result = pool.grow(NonZero::new(usize::MAX).unwrap());

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
        assert_eq!(fake.acquire_count(), 0);
        assert_eq!(fake.failed_acquire_count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn pool_drop_does_not_drop_live_items() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = SegmentPool::<DropCounter>::new();

        _ = pool
            .allocate(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();

        drop(pool);

        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn pool_drop_releases_every_page_once() {
        let (mut pool, fake) = pool_with_fake::<u32>(2);

        for i in 0..7_u32 {
            _ = pool.allocate(i).unwrap();
        }
        pool.grow(nz!(10)).unwrap();

        assert_eq!(fake.acquire_count(), 5);
        assert_eq!(fake.outstanding_count(), 5);

        drop(pool);

        assert_eq!(fake.release_count(), 5);
        assert_eq!(fake.outstanding_count(), 0);
    }

    #[test]
    fn small_items_use_pointer_sized_segments() {
        let (mut pool, fake) = pool_with_fake::<u8>(2);
        assert_eq!(
            SegmentPool::<u8>::segment_layout().size(),
            size_of::<usize>()
        );

        let first = pool.allocate(1).unwrap();
        let second = pool.allocate(2).unwrap();
        assert!(pool.is_empty());
        assert_eq!(fake.acquire_count(), 1);

        let third = pool.allocate(3).unwrap();
        assert_eq!(fake.acquire_count(), 2);
        assert!(!pool.is_empty());
        assert_eq!(pool.free_len(), 1);

        unsafe {
            assert_eq!(first.read(), 1);
            assert_eq!(second.read(), 2);
            assert_eq!(third.read(), 3);
        }
    }

    #[test]
    fn zero_sized_items_are_supported() {
        let mut pool = SegmentPool::<()>::builder().default_growth(2).build();

        let a = pool.allocate(()).unwrap();
        let b = pool.allocate(()).unwrap();
        assert_ne!(a, b);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }
        assert_eq!(pool.free_len(), 2);
    }

    #[test]
    fn over_aligned_items_are_aligned() {
        #[repr(align(64))]
        struct Aligned(u8);

        let mut pool = SegmentPool::<Aligned>::builder().default_growth(3).build();

        let items = (0..5_u8)
            .map(|i| pool.allocate(Aligned(i)).unwrap())
            .collect::<Vec<_>>();

        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.as_ptr() as usize % 64, 0);
            assert_eq!(unsafe { item.as_ref() }.0, i as u8);
        }
    }

    #[test]
    fn reserve_grows_only_by_missing_amount() {
        let (mut pool, fake) = pool_with_fake::<u64>(1);
        pool.grow(nz!(3)).unwrap();

        pool.reserve(2).unwrap();
        assert_eq!(fake.acquire_count(), 1);

        pool.reserve(10).unwrap();
        assert_eq!(fake.acquire_count(), 2);
        assert_eq!(pool.free_len(), 10);
        assert_eq!(pool.capacity(), 10);
    }

    #[test]
    fn reserve_zero_does_nothing() {
        let (mut pool, fake) = pool_with_fake::<u64>(1);

        pool.reserve(0).unwrap();

        assert_eq!(fake.acquire_count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn panicking_constructor_returns_segment() {
        let mut pool = SegmentPool::<u64>::builder().default_growth(2).build();

        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.allocate_with(|| panic!("constructor failed"))
        }));
        assert!(result.is_err());

        assert_eq!(pool.free_len(), 2);
        assert_eq!(pool.live_count(), 0);

        // The pool is still fully usable.
        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(2).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn panicking_drop_returns_segment() {
        struct PanicOnDrop;

        impl Drop for PanicOnDrop {
            fn drop(&mut self) {
                panic!("drop failed");
            }
        }

        let mut pool = SegmentPool::<PanicOnDrop>::builder().default_growth(1).build();
        let item = pool.allocate(PanicOnDrop).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| unsafe { pool.deallocate(item) }));
        assert!(result.is_err());

        assert_eq!(pool.free_len(), 1);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn allocate_in_place_initializes_value() {
        let mut pool = SegmentPool::<[u32; 16]>::new();

        let item = unsafe {
            pool.allocate_in_place(|slot| {
                slot.write([3; 16]);
            })
        }
        .unwrap();

        assert_eq!(unsafe { item.read() }, [3; 16]);
        unsafe { pool.deallocate(item) };
    }

    #[test]
    fn drop_with_no_live_items_does_not_panic_if_policy_must_not_abandon() {
        let mut pool = SegmentPool::<u64>::builder()
            .drop_policy(DropPolicy::MustNotAbandonItems)
            .build();

        let item = pool.allocate(42).unwrap();
        unsafe { pool.deallocate(item) };

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_items_panics_if_policy_must_not_abandon() {
        let mut pool = SegmentPool::<u64>::builder()
            .drop_policy(DropPolicy::MustNotAbandonItems)
            .build();

        _ = pool.allocate(42).unwrap();

        drop(pool);
    }

    #[test]
    fn must_not_abandon_still_releases_pages_before_panicking() {
        let fake = FakeMemoryProvider::new();
        let mut pool = SegmentPool::<u64>::builder()
            .drop_policy(DropPolicy::MustNotAbandonItems)
            .memory_provider(MemoryProviderFacade::from_fake(fake.clone()))
            .build();

        _ = pool.allocate(42).unwrap();

        let result = catch_unwind(AssertUnwindSafe(move || drop(pool)));
        assert!(result.is_err());
        assert_eq!(fake.outstanding_count(), 0);
    }

    #[test]
    fn pool_can_move_between_threads() {
        let mut pool = SegmentPool::<String>::new();
        let item = pool.allocate("moved".to_string()).unwrap();
        let address = item.as_ptr() as usize;

        let handle = std::thread::spawn(move || {
            let item = NonNull::new(address as *mut String).unwrap();
            let value = unsafe { item.as_ref() }.clone();
            unsafe { pool.deallocate(item) };
            value
        });

        assert_eq!(handle.join().unwrap(), "moved");
    }

    #[test]
    fn pool_is_debug() {
        let pool = SegmentPool::<u32>::new();
        let debug_output = format!("{pool:?}");

        assert!(debug_output.contains("SegmentPool"));
        assert!(debug_output.contains("u32"));
    }
}
