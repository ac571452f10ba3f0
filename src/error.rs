use thiserror::Error;

use crate::pool::Handle;

/// Everything that can go wrong talking to a [`Pool`](crate::pool::Pool).
///
/// Running out of space is deliberately absent: a failed allocation is a
/// normal outcome reported as `Ok(None)` plus a bump of the pool's
/// failed-allocation counter, not an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// A caller-supplied value was rejected before any state changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The requested pool size cannot hold even a single block header.
    #[error("pool size {requested} too small to hold a block header")]
    PoolTooSmall { requested: usize },

    /// The handle does not address any payload in the live chain. Stale
    /// handles kept across a `reset` end up here.
    #[error("handle {0:?} does not belong to this pool")]
    UnknownHandle(Handle),
}
