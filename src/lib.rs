//! A single-threaded TCP echo server built on io_uring and mirrored ring
//! buffers.
//!
//! Each connection owns a one-page byte queue whose backing memory is
//! mapped twice, back-to-back, in the process address space. The filled and
//! free regions of the queue are therefore always contiguous slices, so the
//! kernel receives into and sends from the queue in place and the echo path
//! never copies a byte in userspace.
//!
//! A single io_uring instance schedules the work: one continuously re-armed
//! `accept` on the listener, and per connection a strictly alternating
//! `recv`/`send` cycle with exactly one operation in flight at a time. The
//! completion handlers walk the queue counters forward and resubmit.
//!
//! Linux only.

use std::sync::OnceLock;

mod error;
pub use self::error::{Error, Input, Operation, Result};

/// Low-level virtual memory functions
pub mod os;

mod ring;
pub use self::ring::RingBuffer;

mod conn;
pub use self::conn::{ConnTable, MAX_CONNECTIONS};

mod server;
pub use self::server::Server;

/// Gets a cached version of the system page size.
///
/// ```
/// let size = echod::page_size();
/// println!("the system page size is {} bytes", size);
/// ```
pub fn page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(self::os::page_size)
}
