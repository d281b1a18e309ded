//! Basic benchmarks for the `segment_pool` crate.
//!
//! The interesting comparison is against `Box`, which goes to the global allocator for every
//! value. The allocation tracker shows how many bytes each variant allocates per iteration.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;
use segment_pool::SegmentPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 4];
const TEST_VALUE: TestItem = [1, 2, 3, 4];

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("sp_basic");

    let mut allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SegmentPool::<TestItem>::new()));
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("allocate_first");
    group.bench_function("allocate_first", |b| {
        // The first allocation includes acquiring the first page.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SegmentPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(TEST_VALUE)).unwrap());
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("allocate_deallocate_warm");
    group.bench_function("allocate_deallocate_warm", |b| {
        b.iter_custom(|iters| {
            let mut pool = SegmentPool::<TestItem>::new();
            pool.grow(nz!(1)).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let item = pool.allocate(black_box(TEST_VALUE)).unwrap();

                // SAFETY: The item was just allocated from this pool and is deallocated once.
                unsafe { pool.deallocate(black_box(item)) };
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("box_new_drop");
    group.bench_function("box_new_drop", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(Box::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("sp_slow");

    let mut allocs_op = allocs.operation("allocate_10k");
    group.bench_function("allocate_10k", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SegmentPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..10_000 {
                    _ = black_box(pool.allocate(black_box(TEST_VALUE)).unwrap());
                }
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("forward_10_back_5_times_1000");
    group.bench_function("forward_10_back_5_times_1000", |b| {
        // We allocate 10 items and free the first 5, repeating this 1000 times.
        // This interleaves reuse of freed segments with growth.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(SegmentPool::<TestItem>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut to_free = Vec::with_capacity(5);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..1000 {
                    to_free.clear();

                    for _ in 0..5 {
                        to_free.push(pool.allocate(black_box(TEST_VALUE)).unwrap());
                    }

                    for _ in 0..5 {
                        _ = black_box(pool.allocate(black_box(TEST_VALUE)).unwrap());
                    }

                    #[expect(clippy::iter_with_drain, reason = "to avoid moving the value")]
                    for item in to_free.drain(..) {
                        // SAFETY: The item was allocated from this pool and is deallocated once.
                        unsafe { pool.deallocate(item) };
                    }
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
