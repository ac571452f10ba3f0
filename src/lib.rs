//! A fixed-size memory pool with pluggable placement strategies.
//!
//! ## Basic Types
//!
//! ### [`Pool`](pool/struct.Pool.html)
//!
//! A `Pool` owns a contiguous byte buffer partitioned into a gapless chain
//! of variable-size blocks, each a header followed by its payload. It
//! allocates by searching the chain with a [`Strategy`], splitting the
//! found block when the remainder can hold a new header, and frees by
//! marking a block free and merging it forward into free successors.
//! Usage statistics (used bytes, peak usage, failed allocations) are
//! tracked alongside.
//!
//! ### [`Strategy`](strategy/enum.Strategy.html)
//!
//! The placement policy: first-fit, best-fit, or worst-fit. Strategies are
//! pure search functions over the chain; everything else is shared.
//!
//! ### [`Handle`](pool/struct.Handle.html)
//!
//! An opaque reference to an allocated payload. Handles are validated
//! against the live chain on every use, so stale or foreign handles fail
//! with an error instead of corrupting the pool.
//!
//! ### [`Simulator`](sim/struct.Simulator.html)
//!
//! A workload driver that exercises a pool with synthetic allocation
//! patterns (random, ramps, fragmentation, bursts, mixed load) and reports
//! failure rates and peak usage per scenario.
//!
//! ## Example
//!
//! ```
//! use fitpool::{Pool, Strategy};
//!
//! let mut pool = Pool::new(Strategy::BestFit, 512)?;
//! let handle = pool.allocate(100)?.expect("512 bytes were free");
//! pool.payload_mut(handle)?.fill(42);
//! pool.deallocate(Some(handle))?;
//! assert_eq!(pool.used_memory(), 0);
//! # Ok::<(), fitpool::PoolError>(())
//! ```

pub mod block;
pub mod error;
pub mod pool;
pub mod sim;
pub mod strategy;

pub use block::{Block, HEADER_SIZE};
pub use error::PoolError;
pub use pool::{ChainStats, Handle, Pool, Validity};
pub use sim::{Scenario, ScenarioReport, Simulator};
pub use strategy::Strategy;
