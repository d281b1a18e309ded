#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-size object pool that recycles memory through an intrusive free list.
//!
//! [`SegmentPool<T>`] amortizes the cost of allocating and freeing many values of the same type.
//! It acquires large pages from the global allocator, carves each page into fixed-size segments
//! and keeps the vacant segments on a free list that is threaded through the segments
//! themselves. Allocation pops a segment and constructs the value in place; deallocation drops
//! the value and pushes the segment back, so the next allocation reuses it.
//!
//! This is part of the [Folo project](https://github.com/folo-rs/folo) that provides mechanisms for
//! high-performance hardware-aware programming in Rust.
//!
//! # Key Features
//!
//! - **No per-object bookkeeping**: a segment is exactly as large as `T` or a pointer,
//!   whichever is larger
//! - **Stable addresses**: values never move; pages are only released when the pool is dropped
//! - **Failure without side effects**: if a page cannot be acquired, the pool is left untouched
//!   and the error is returned to the caller
//! - **In-place construction**: [`allocate_with()`][SegmentPool::allocate_with] and
//!   [`allocate_in_place()`][SegmentPool::allocate_in_place] only run the constructor once
//!   storage is secured
//! - **Configurable growth**: choose how many segments each automatic growth adds, or grow and
//!   reserve explicitly
//!
//! # Limitations
//!
//! These are deliberate trade-offs, not omissions:
//!
//! - The pool is not thread-safe. It can be moved between threads but not shared.
//! - [`deallocate()`][SegmentPool::deallocate] does not verify that the pointer came from the
//!   pool; misuse is undefined behavior.
//! - Pages are never returned to the system before the pool is dropped.
//! - Objects still allocated when the pool is dropped are not dropped themselves. Their storage
//!   is released with the pages. See [`DropPolicy`].
//!
//! # Example
//!
//! ```rust
//! use segment_pool::SegmentPool;
//!
//! #[derive(Debug)]
//! struct Particle {
//!     position: (f32, f32),
//!     velocity: (f32, f32),
//! }
//!
//! let mut pool = SegmentPool::<Particle>::builder().default_growth(256).build();
//!
//! let particle = pool.allocate(Particle {
//!     position: (0.0, 0.0),
//!     velocity: (1.0, 0.5),
//! })?;
//!
//! // SAFETY: The pointer came from this pool and has not been deallocated, and no other
//! // references to the particle exist.
//! unsafe {
//!     let p = &mut *particle.as_ptr();
//!     p.position.0 += p.velocity.0;
//!     p.position.1 += p.velocity.1;
//! }
//!
//! // SAFETY: The pointer came from this pool and is deallocated exactly once.
//! unsafe { pool.deallocate(particle) };
//!
//! assert_eq!(pool.live_count(), 0);
//! # Ok::<(), segment_pool::Error>(())
//! ```
//!
//! # Observability
//!
//! The pool logs page acquisition and teardown at `debug` level and growth failures at `warn`
//! level via [`tracing`](https://docs.rs/tracing). Acquired page sizes and failed growths are
//! also published as [`nm`](https://docs.rs/nm) events named `segment_pool_page_segments` and
//! `segment_pool_grow_failures`.

mod builder;
mod drop_policy;
mod error;
mod free_list;
mod metrics;
mod page;
mod pal;
mod pool;

pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub(crate) use free_list::*;
pub(crate) use page::*;
pub(crate) use pool::DEFAULT_GROWTH;
pub use pool::SegmentPool;
