//! Integration tests for the `segment_pool` package.
//!
//! These tests exercise `SegmentPool` purely through its public API: growth accounting,
//! segment reuse, drop behavior and the documented teardown semantics.
#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::cell::Cell;
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;

use new_zealand::nz;
use segment_pool::{DropPolicy, SegmentPool};

struct Tracked {
    value: u64,
    drops: Rc<Cell<usize>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn fresh_pool_is_empty() {
    let pool = SegmentPool::<u64>::new();

    assert!(pool.is_empty());
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.capacity(), 0);
}

#[test]
fn explicit_growth_serves_exactly_that_many_allocations() {
    let mut pool = SegmentPool::<u64>::builder().default_growth(1).build();
    pool.grow(nz!(4)).unwrap();

    let items = (0..4_u64)
        .map(|i| pool.allocate(i).unwrap())
        .collect::<Vec<_>>();

    assert_eq!(pool.page_count(), 1);
    assert!(pool.is_empty());

    let extra = pool.allocate(4).unwrap();
    assert_eq!(pool.page_count(), 2);

    for item in items.into_iter().chain([extra]) {
        unsafe { pool.deallocate(item) };
    }

    assert_eq!(pool.free_len(), 5);
}

#[test]
fn values_survive_unrelated_churn() {
    let mut pool = SegmentPool::<String>::builder().default_growth(4).build();

    let keeper = pool.allocate("keep me".to_string()).unwrap();

    for round in 0..20 {
        let temporary = (0..10)
            .map(|i| pool.allocate(format!("{round}-{i}")).unwrap())
            .collect::<Vec<_>>();

        for item in temporary {
            unsafe { pool.deallocate(item) };
        }
    }

    assert_eq!(unsafe { keeper.as_ref() }, "keep me");
    assert_eq!(pool.live_count(), 1);

    unsafe { pool.deallocate(keeper) };
}

#[test]
fn churn_does_not_grow_pool() {
    let mut pool = SegmentPool::<[u8; 24]>::builder().default_growth(8).build();

    for _ in 0..1000 {
        let item = pool.allocate([0xab; 24]).unwrap();
        unsafe { pool.deallocate(item) };
    }

    assert_eq!(pool.page_count(), 1);
    assert_eq!(pool.capacity(), 8);
}

#[test]
fn deallocate_runs_drop_once_per_call() {
    let drops = Rc::new(Cell::new(0));
    let mut pool = SegmentPool::<Tracked>::new();

    let items = (0..5)
        .map(|value| {
            pool.allocate(Tracked {
                value,
                drops: Rc::clone(&drops),
            })
            .unwrap()
        })
        .collect::<Vec<_>>();

    for (index, item) in items.into_iter().enumerate() {
        assert_eq!(unsafe { item.as_ref() }.value, index as u64);
        unsafe { pool.deallocate(item) };
        assert_eq!(drops.get(), index + 1);
    }
}

#[test]
fn live_items_are_abandoned_on_pool_drop() {
    let drops = Rc::new(Cell::new(0));
    let mut pool = SegmentPool::<Tracked>::new();

    let _abandoned = pool
        .allocate(Tracked {
            value: 1,
            drops: Rc::clone(&drops),
        })
        .unwrap();
    let freed = pool
        .allocate(Tracked {
            value: 2,
            drops: Rc::clone(&drops),
        })
        .unwrap();

    unsafe { pool.deallocate(freed) };
    assert_eq!(drops.get(), 1);

    drop(pool);

    // Only the explicitly deallocated item was dropped.
    assert_eq!(drops.get(), 1);
    // The abandoned item still holds its clone of the counter.
    assert_eq!(Rc::strong_count(&drops), 2);
}

#[test]
#[should_panic]
fn must_not_abandon_policy_panics_with_live_items() {
    let mut pool = SegmentPool::<u64>::builder()
        .drop_policy(DropPolicy::MustNotAbandonItems)
        .build();

    _ = pool.allocate(1).unwrap();
}

#[test]
fn pointer_sized_segments_for_small_items() {
    let mut pool = SegmentPool::<u16>::builder().default_growth(2).build();

    let first = pool.allocate(1).unwrap();
    let second = pool.allocate(2).unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.page_count(), 1);

    let third = pool.allocate(3).unwrap();
    assert_eq!(pool.page_count(), 2);
    assert!(!pool.is_empty());
    assert_eq!(pool.free_len(), 1);

    let addresses = [first, second, third]
        .iter()
        .map(|p| p.as_ptr() as usize)
        .collect::<HashSet<_>>();
    assert_eq!(addresses.len(), 3);

    // Segments in the same page are one pointer apart.
    let distance = (first.as_ptr() as usize).abs_diff(second.as_ptr() as usize);
    assert_eq!(distance, size_of::<usize>());
}

#[test]
fn zero_growth_behaves_like_one() {
    let mut pool = SegmentPool::<u64>::builder().default_growth(0).build();

    let item = pool.allocate(9).unwrap();

    assert_eq!(pool.capacity(), 1);
    assert!(pool.is_empty());

    unsafe { pool.deallocate(item) };
}

#[test]
fn pool_behind_mutex_serves_multiple_threads() {
    let pool = Arc::new(Mutex::new(SegmentPool::<u64>::builder().default_growth(16).build()));

    let handles = (0..4_u64)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                for i in 0..100_u64 {
                    let value = thread_index * 1000 + i;

                    let address = {
                        let mut pool = pool.lock().unwrap();
                        pool.allocate(value).unwrap().as_ptr() as usize
                    };

                    let item = NonNull::new(address as *mut u64).unwrap();
                    assert_eq!(unsafe { item.read() }, value);

                    unsafe { pool.lock().unwrap().deallocate(item) };
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let pool = pool.lock().unwrap();
    assert_eq!(pool.live_count(), 0);
    assert!(pool.capacity() <= 64);
}
