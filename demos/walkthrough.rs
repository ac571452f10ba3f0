//! A guided tour of one pool: allocate until a request fails, free a
//! block, allocate into the gap, and reset — dumping the chain after
//! every step.
//!
//! Run with `RUST_LOG=debug` to also see the pool's internal decisions.

use fitpool::{Pool, PoolError, Strategy};

fn main() -> Result<(), PoolError> {
    env_logger::init();

    let mut pool = Pool::new(Strategy::FirstFit, 512)?;
    println!("--- START - everything is free\n{}", pool);

    let p1 = pool.allocate(100)?;
    println!("--- AFTER ALLOCATION 1 (100 bytes)\n{}", pool);

    let _p2 = pool.allocate(200)?;
    println!("--- AFTER ALLOCATION 2 (200 bytes)\n{}", pool);

    let p3 = pool.allocate(300)?;
    assert!(p3.is_none());
    println!("--- ALLOCATION 3 FAILED as expected (300 bytes)\n{}", pool);

    pool.deallocate(p1)?;
    println!("--- DEALLOCATED Block 1\n{}", pool);

    let _p4 = pool.allocate(50)?;
    println!("--- AFTER ALLOCATION 4 (50 bytes into the freed gap)\n{}", pool);

    let _p5 = pool.allocate(30)?;
    println!("--- AFTER ALLOCATION 5 (30 bytes into the leftover)\n{}", pool);

    pool.reset(512)?;
    println!("--- AFTER RESET (full pool restored)\n{}", pool);

    Ok(())
}
