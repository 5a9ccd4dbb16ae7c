//! Low-level primitives for the page cache.
//!
//! Includes positioned I/O over swap media and the lock, wake-up and start
//! barrier helpers shared by the background workers.

/// Concurrency primitives and synchronization.
///
/// Timeout-bounded locking and coordination between request paths and workers.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Positioned read/write interfaces over files and memory buffers.
pub mod io;
