use std::fmt;
use std::ptr::NonNull;

use crate::Segment;

/// Intrusive LIFO stack of vacant segments.
///
/// The links are stored inside the segments themselves, so the list needs no memory of its own
/// beyond the front pointer. The length is tracked on the side purely for reporting.
pub(crate) struct FreeList<T> {
    front: Option<NonNull<Segment<T>>>,
    len: usize,
}

impl<T> FreeList<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            front: None,
            len: 0,
        }
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Makes `segment` the new front of the list.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `segment` is valid for reads and writes for as long as
    /// it remains on the list, that it does not contain a live item and that it is not already
    /// on this (or any other) list.
    pub(crate) unsafe fn push(&mut self, segment: NonNull<Segment<T>>) {
        // SAFETY: Forwarding the validity and vacancy requirements to the caller.
        unsafe {
            Segment::set_next_free(segment, self.front);
        }

        self.front = Some(segment);

        // Cannot overflow because every segment occupies at least one byte of virtual memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Detaches the front segment from the list, if there is one.
    ///
    /// The returned segment still contains its stale link; the caller owns it and may write an
    /// item over it.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<NonNull<Segment<T>>> {
        let segment = self.front?;

        // SAFETY: Every segment on the list was linked by push(), whose contract guarantees
        // that it is still valid and that its link field is the one push() wrote.
        self.front = unsafe { Segment::next_free(segment) };

        // Cannot underflow because the list had at least one segment.
        self.len = self.len.wrapping_sub(1);

        Some(segment)
    }
}

impl<T> fmt::Debug for FreeList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("front", &self.front)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn new_list_is_empty() {
        let mut list = FreeList::<u64>::new();

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert!(list.pop().is_none());
    }

    #[test]
    fn pop_returns_segments_in_reverse_push_order() {
        let mut segments = [
            Segment::<u64>::vacant(),
            Segment::<u64>::vacant(),
            Segment::<u64>::vacant(),
        ];
        let ptrs = segments.each_mut().map(NonNull::from);

        let mut list = FreeList::new();

        for ptr in ptrs {
            unsafe { list.push(ptr) };
        }

        assert_eq!(list.len(), 3);
        assert!(!list.is_empty());

        assert_eq!(list.pop(), Some(ptrs[2]));
        assert_eq!(list.pop(), Some(ptrs[1]));
        assert_eq!(list.pop(), Some(ptrs[0]));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn pushed_segment_is_reused_first() {
        let mut segments = [Segment::<u8>::vacant(), Segment::<u8>::vacant()];
        let ptrs = segments.each_mut().map(NonNull::from);

        let mut list = FreeList::new();
        unsafe {
            list.push(ptrs[0]);
            list.push(ptrs[1]);
        }

        let taken = list.pop().unwrap();
        assert_eq!(taken, ptrs[1]);

        // Scribble over the segment as a live item would, then return it.
        unsafe { Segment::item_ptr(taken).write(0xff) };
        unsafe { list.push(taken) };

        assert_eq!(list.pop(), Some(ptrs[1]));
        assert_eq!(list.pop(), Some(ptrs[0]));
        assert_eq!(list.len(), 0);
    }
}
