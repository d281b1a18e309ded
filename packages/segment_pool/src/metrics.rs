//! Metrics for segment pools.
//!
//! Growth is the only moment a pool talks to the memory provider, so that is what we observe.
//! The metrics use per-thread event instances, like everything else built on `nm`.

use nm::{Event, Magnitude};

/// Histogram buckets for the number of segments in an acquired page.
///
/// Pools grow by their default growth size unless `grow()` or `reserve()` is called explicitly,
/// so we expect most observations to cluster around a handful of configured values.
const PAGE_SEGMENTS_BUCKETS: &[Magnitude] = &[1, 2, 4, 8, 16, 32, 64, 128, 256, 1024, 4096];

thread_local! {
    /// Event for observing a page being acquired from the memory provider.
    ///
    /// The magnitude is the number of segments in the page.
    pub(crate) static PAGE_SEGMENTS: Event = Event::builder()
        .name("segment_pool_page_segments")
        .histogram(PAGE_SEGMENTS_BUCKETS)
        .build();

    /// Event for observing a growth that could not acquire a page.
    pub(crate) static GROW_FAILURES: Event = Event::builder()
        .name("segment_pool_grow_failures")
        .build();
}
