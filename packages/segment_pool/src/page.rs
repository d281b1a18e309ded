use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Error, Result};

/// One fixed-size slot of a page.
///
/// The same bytes are either a link to the next free segment (while the segment is on the free
/// list) or the storage of a live `T` (after it has been handed out). Nothing records which of
/// the two a given segment currently is - the pool's free list and the caller's pointers are the
/// only ground truth.
///
/// Being a union, the size is `max(size_of::<T>(), size_of::<pointer>())` rounded up to the
/// larger of the two alignments, and both fields start at offset zero.
#[repr(C)]
pub(crate) union Segment<T> {
    next_free: Option<NonNull<Segment<T>>>,
    item: ManuallyDrop<T>,
}

impl<T> Segment<T> {
    /// A segment that is vacant and links to nothing. Used to build free lists over
    /// stack memory in tests.
    #[cfg(test)]
    pub(crate) const fn vacant() -> Self {
        Self { next_free: None }
    }

    /// Returns a pointer to the storage of the item that lives (or will live) in the segment.
    #[must_use]
    pub(crate) fn item_ptr(segment: NonNull<Self>) -> NonNull<T> {
        // SAFETY: The pointer is to a segment, so projecting to one of its fields stays in bounds
        // of the same allocation. We only compute the address, never read through it.
        let item = unsafe { &raw mut (*segment.as_ptr()).item };

        // ManuallyDrop<T> is repr(transparent), so a pointer to it is a pointer to T.
        // SAFETY: Derived from a non-null pointer with an in-bounds field projection.
        unsafe { NonNull::new_unchecked(item) }.cast::<T>()
    }

    /// Returns the segment that contains the item at `item`.
    ///
    /// The result is only meaningful if `item` was obtained from [`item_ptr()`][Self::item_ptr].
    #[must_use]
    pub(crate) fn from_item_ptr(item: NonNull<T>) -> NonNull<Self> {
        // Union fields all start at offset zero.
        item.cast::<Self>()
    }

    /// Reads the free-list link of a vacant segment.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `segment` is valid for reads and that its link field
    /// was written by [`set_next_free()`][Self::set_next_free] after it last held an item.
    #[must_use]
    pub(crate) unsafe fn next_free(segment: NonNull<Self>) -> Option<NonNull<Self>> {
        // SAFETY: Forwarding the validity and initialization requirements to the caller.
        unsafe { (*segment.as_ptr()).next_free }
    }

    /// Overwrites the segment storage with a free-list link.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `segment` is valid for writes and that it does not
    /// contain a live item (any item it contained must already have been dropped).
    pub(crate) unsafe fn set_next_free(segment: NonNull<Self>, next: Option<NonNull<Self>>) {
        // SAFETY: Forwarding the validity requirements to the caller. Writing a Copy field of
        // a union does not drop anything.
        unsafe {
            (*segment.as_ptr()).next_free = next;
        }
    }
}

/// The header at the start of every page.
///
/// Pages form a singly-linked list from the most recently acquired page backwards. The header
/// also remembers the layout of the whole block because the memory provider needs it back when
/// the page is released.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct PageHeader {
    previous: Option<NonNull<PageHeader>>,
    block_layout: Layout,
}

impl PageHeader {
    /// Reads the link to the previously acquired page and the layout of this page's block.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `page` was initialized by
    /// [`PageLayout::initialize()`] and has not yet been released.
    #[must_use]
    pub(crate) unsafe fn read(page: NonNull<Self>) -> (Option<NonNull<Self>>, Layout) {
        // SAFETY: Forwarding the validity requirements to the caller.
        let header = unsafe { page.as_ref() };

        (header.previous, header.block_layout)
    }
}

/// Layout calculations for a page holding a specific number of `Segment<T>`.
pub(crate) struct PageLayout<T> {
    /// Layout of the whole block requested from the memory provider.
    block: Layout,

    /// Byte offset from the start of the block to the first segment.
    segments_offset: usize,

    segment_count: NonZero<usize>,

    _segment: PhantomData<Segment<T>>,
}

impl<T> PageLayout<T> {
    /// Calculates the layout of a page with `segment_count` segments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the page would be too large to describe.
    pub(crate) fn calculate(segment_count: NonZero<usize>) -> Result<Self> {
        let overflow = || Error::CapacityOverflow {
            segment_count: segment_count.get(),
        };

        let segments = Layout::array::<Segment<T>>(segment_count.get())
            .ok()
            .ok_or_else(overflow)?;

        let (block, segments_offset) = Layout::new::<PageHeader>()
            .extend(segments)
            .ok()
            .ok_or_else(overflow)?;

        Ok(Self {
            block: block.pad_to_align(),
            segments_offset,
            segment_count,
            _segment: PhantomData,
        })
    }

    /// The layout of the block to request from the memory provider.
    #[must_use]
    pub(crate) fn block(&self) -> Layout {
        self.block
    }

    /// Writes the page header into a freshly acquired block and returns the page.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `block` was acquired with [`block()`][Self::block] as
    /// its layout and that nothing else is using it.
    #[must_use]
    pub(crate) unsafe fn initialize(
        &self,
        block: NonNull<u8>,
        previous: Option<NonNull<PageHeader>>,
    ) -> NonNull<PageHeader> {
        // The header is the first field of the extended layout, so it sits at offset zero
        // with an alignment the block satisfies.
        #[expect(
            clippy::cast_ptr_alignment,
            reason = "the block layout is an extension of the PageHeader layout"
        )]
        let page = block.cast::<PageHeader>();

        // SAFETY: The caller guarantees the block is large and aligned enough for the header
        // and that we have exclusive access to it.
        unsafe {
            page.write(PageHeader {
                previous,
                block_layout: self.block,
            });
        }

        page
    }

    /// Returns pointers to every segment in the page, in ascending address order.
    ///
    /// The segments are uninitialized; the iterator only computes addresses.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `page` was acquired with [`block()`][Self::block] of
    /// this same layout.
    pub(crate) unsafe fn segments(
        &self,
        page: NonNull<PageHeader>,
    ) -> impl Iterator<Item = NonNull<Segment<T>>> {
        // SAFETY: The caller guarantees the block follows this layout, so the segment array
        // starts `segments_offset` bytes in and stays within the block.
        let first = unsafe { page.byte_add(self.segments_offset) }.cast::<Segment<T>>();

        (0..self.segment_count.get()).map(move |index| {
            // SAFETY: The index is below the segment count the block was sized for.
            unsafe { first.add(index) }
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::mem::{align_of, size_of};

    use new_zealand::nz;

    use super::*;

    #[test]
    fn segment_is_at_least_pointer_sized() {
        assert_eq!(size_of::<Segment<u8>>(), size_of::<usize>());
        assert_eq!(align_of::<Segment<u8>>(), align_of::<usize>());
        assert_eq!(size_of::<Segment<()>>(), size_of::<usize>());
    }

    #[test]
    fn segment_grows_with_large_items() {
        assert_eq!(size_of::<Segment<[u64; 5]>>(), size_of::<[u64; 5]>());
        assert_eq!(align_of::<Segment<u128>>(), align_of::<u128>());
    }

    #[test]
    fn item_pointer_round_trips_to_segment() {
        let mut segment = Segment::<u64>::vacant();
        let segment_ptr = NonNull::from(&mut segment);

        let item = Segment::item_ptr(segment_ptr);
        assert_eq!(item.cast::<u8>(), segment_ptr.cast::<u8>());
        assert_eq!(Segment::from_item_ptr(item), segment_ptr);
    }

    #[test]
    fn link_is_written_over_item_storage() {
        let mut first = Segment::<u32>::vacant();
        let mut second = Segment::<u32>::vacant();
        let first_ptr = NonNull::from(&mut first);
        let second_ptr = NonNull::from(&mut second);

        unsafe {
            Segment::item_ptr(first_ptr).write(0xdead_beef);
            Segment::set_next_free(first_ptr, Some(second_ptr));

            assert_eq!(Segment::next_free(first_ptr), Some(second_ptr));
        }
    }

    #[test]
    fn page_layout_places_segments_after_header() {
        let layout = PageLayout::<u64>::calculate(nz!(3)).unwrap();

        assert!(layout.segments_offset >= size_of::<PageHeader>());
        assert_eq!(layout.segments_offset % align_of::<Segment<u64>>(), 0);
        assert!(
            layout.block().size() >= layout.segments_offset + 3 * size_of::<Segment<u64>>()
        );
        assert!(layout.block().align() >= align_of::<PageHeader>());
    }

    #[test]
    fn page_layout_respects_large_alignment() {
        #[allow(dead_code, reason = "only the layout matters")]
        #[repr(align(64))]
        struct Aligned(u8);

        let layout = PageLayout::<Aligned>::calculate(nz!(2)).unwrap();

        assert_eq!(layout.block().align(), 64);
        assert_eq!(layout.segments_offset % 64, 0);
    }

    #[test]
    fn page_layout_overflow_is_error() {
        let result = PageLayout::<u64>::calculate(NonZero::new(usize::MAX).unwrap());

        assert!(matches!(
            result,
            Err(Error::CapacityOverflow {
                segment_count: usize::MAX
            })
        ));
    }

    #[test]
    fn segments_cover_page_in_address_order() {
        let layout = PageLayout::<u16>::calculate(nz!(4)).unwrap();
        let block = unsafe { std::alloc::alloc(layout.block()) };
        let block = NonNull::new(block).unwrap();

        let page = unsafe { layout.initialize(block, None) };
        let segments = unsafe { layout.segments(page) }.collect::<Vec<_>>();

        assert_eq!(segments.len(), 4);

        for pair in segments.windows(2) {
            assert_eq!(
                pair[1].as_ptr() as usize - pair[0].as_ptr() as usize,
                size_of::<Segment<u16>>()
            );
        }

        let block_end = block.as_ptr() as usize + layout.block().size();
        let last_end = segments[3].as_ptr() as usize + size_of::<Segment<u16>>();
        assert!(last_end <= block_end);

        let (previous, block_layout) = unsafe { PageHeader::read(page) };
        assert!(previous.is_none());
        assert_eq!(block_layout, layout.block());

        unsafe { std::alloc::dealloc(block.as_ptr(), layout.block()) };
    }
}
