use thiserror::Error;

/// Errors that can occur when a [`SegmentPool`][crate::SegmentPool] tries to acquire a new page.
///
/// Every variant means the same thing to the caller: no raw memory could be obtained for the
/// requested growth. The pool is left exactly as it was before the failed call, so the caller
/// may retry later (e.g. after releasing memory elsewhere).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The memory provider could not satisfy the request for a new page.
    #[error("failed to acquire a page of {page_bytes} bytes for {segment_count} segments")]
    OutOfMemory {
        /// The number of segments the page was meant to hold.
        segment_count: usize,

        /// The total size of the requested page, including the page header.
        page_bytes: usize,
    },

    /// A page with the requested number of segments cannot be described as a valid memory
    /// layout, typically because its size would exceed `isize::MAX` bytes.
    #[error("a page of {segment_count} segments exceeds the maximum supported allocation size")]
    CapacityOverflow {
        /// The number of segments that was requested.
        segment_count: usize,
    },
}

/// A specialized `Result` type for segment pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
