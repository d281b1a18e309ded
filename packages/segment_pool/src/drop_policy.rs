/// Determines what the pool does with objects that are still allocated when the pool is dropped.
///
/// The pool only tracks free segments, not live ones, so it has no way to run the teardown
/// logic of objects that were never deallocated. Their storage is always released together
/// with the pages that contain them. The policy only decides whether that situation is
/// acceptable or a bug.
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
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Objects still allocated when the pool is dropped are abandoned: their storage is released
    /// but their `Drop` implementation never runs. This is the default.
    #[default]
    MayAbandonItems,

    /// The pool will panic if objects are still allocated when it is dropped.
    ///
    /// This is useful when the objects own resources that must be released through their
    /// `Drop` implementation, so abandoning them would be a bug. The pages are released before
    /// the panic, so the pool's own memory is never leaked.
    MustNotAbandonItems,
}
