//! Basic usage example for `SegmentPool`.
//!
//! This example allocates a batch of values, frees some of them and shows that the freed
//! segments are reused before the pool grows again.

use segment_pool::SegmentPool;

#[derive(Debug)]
struct Order {
    id: u32,
    quantity: u16,
}

fn main() -> Result<(), segment_pool::Error> {
    let mut pool = SegmentPool::<Order>::builder().default_growth(4).build();

    println!(
        "Each segment takes {} bytes",
        SegmentPool::<Order>::segment_layout().size()
    );

    let orders = (0..6)
        .map(|id| pool.allocate(Order { id, quantity: 10 }))
        .collect::<Result<Vec<_>, _>>()?;

    println!(
        "Allocated {} orders using {} pages, {} segments free",
        pool.live_count(),
        pool.page_count(),
        pool.free_len()
    );

    let (freed, kept) = orders.split_at(3);

    for order in freed {
        // SAFETY: Each pointer came from this pool and is deallocated exactly once.
        unsafe { pool.deallocate(*order) };
    }

    println!("Freed 3 orders, {} segments free", pool.free_len());

    let replacement = pool.allocate(Order {
        id: 100,
        quantity: 1,
    })?;

    // SAFETY: The pointer came from this pool and has not been deallocated.
    let replacement_ref = unsafe { replacement.as_ref() };
    println!(
        "Replacement order {} (quantity {}) reused a freed segment: {}",
        replacement_ref.id,
        replacement_ref.quantity,
        freed.contains(&replacement)
    );

    for order in kept.iter().chain([&replacement]) {
        // SAFETY: Each pointer came from this pool and is deallocated exactly once.
        unsafe { pool.deallocate(*order) };
    }

    println!("All orders returned, {} live", pool.live_count());

    Ok(())
}
