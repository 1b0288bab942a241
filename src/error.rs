//! Pool-facing error surface.
//!
//! Errors that occur *inside* a coroutine's body (a failed `read`, a refused `connect`, ...) are
//! never routed through this type — they flow back to the coroutine as `std::io::Result` values,
//! exactly like any other syscall result (see `crate::io`). This enum only covers the handful of
//! ways the pool itself, as opposed to a scheduled task, can fail.

use std::io;

/// Errors returned by pool lifecycle and join operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `init` was called while the pool was already running.
    #[error("pool already initialized")]
    AlreadyInitialized,

    /// The kernel readiness facility (`epoll`) could not be constructed or failed fatally.
    #[error("readiness facility failure: {0}")]
    ReadinessFacility(#[source] io::Error),
}

/// Convenience alias for pool-facing fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
