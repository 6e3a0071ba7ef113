//! The slot registry pairing each client socket with its buffer.

use std::os::unix::io::RawFd;

use crate::ring::RingBuffer;
use crate::{Error, Input, Operation, Result};

/// Most clients served at once; additional accepts are turned away.
pub const MAX_CONNECTIONS: usize = 512;

/// Reserved descriptor value marking an unused slot.
const INVALID_SOCK: RawFd = -1;

/// Fixed-size table owning one socket and one ring buffer per connection.
///
/// A slot is active iff its descriptor is not the sentinel, and an inactive
/// slot always has an empty buffer. Handles are the slot indices: they stay
/// stable for the life of a connection and the lowest free index is always
/// claimed first, so a released handle is reused by the next accept.
pub struct ConnTable {
    socks: [RawFd; MAX_CONNECTIONS],
    bufs: Vec<RingBuffer>,
}

impl ConnTable {
    /// Builds the table, allocating every ring buffer up front.
    ///
    /// If any allocation fails, the buffers built so far are released before
    /// the error is returned.
    pub fn new() -> Result<Self> {
        let mut bufs = Vec::with_capacity(MAX_CONNECTIONS);
        for _ in 0..MAX_CONNECTIONS {
            bufs.push(RingBuffer::new()?);
        }
        Ok(Self {
            socks: [INVALID_SOCK; MAX_CONNECTIONS],
            bufs,
        })
    }

    /// Claims the lowest free slot for `sock` and returns its handle.
    ///
    /// Fails with `ConnectionsLimitReached` when every slot is occupied; the
    /// caller still owns `sock` and is expected to close it.
    pub fn add(&mut self, sock: RawFd) -> Result<u32> {
        match self.socks.iter().position(|&s| s == INVALID_SOCK) {
            Some(id) => {
                self.socks[id] = sock;
                Ok(id as u32)
            }
            None => Err(Error::input(
                Operation::ConnAdd,
                Input::ConnectionsLimitReached,
            )),
        }
    }

    /// Closes the slot's socket and resets its buffer to empty.
    ///
    /// The buffer keeps its head position; an empty buffer is legal at any
    /// offset. Removing an inactive slot is a no-op.
    pub fn remove(&mut self, id: u32) {
        let id = id as usize;
        if self.socks[id] != INVALID_SOCK {
            unsafe {
                libc::close(self.socks[id]);
            }
            self.socks[id] = INVALID_SOCK;
            self.bufs[id].clear();
        }
    }

    /// Tests whether the slot currently owns a socket.
    pub fn is_active(&self, id: u32) -> bool {
        self.socks[id as usize] != INVALID_SOCK
    }

    /// Gets the socket stored in the slot, or the sentinel when inactive.
    pub fn sock(&self, id: u32) -> RawFd {
        self.socks[id as usize]
    }

    /// Gets the slot's ring buffer.
    pub fn buf_mut(&mut self, id: u32) -> &mut RingBuffer {
        &mut self.bufs[id as usize]
    }
}

impl Drop for ConnTable {
    fn drop(&mut self) {
        for &sock in self.socks.iter() {
            if sock != INVALID_SOCK {
                unsafe {
                    libc::close(sock);
                }
            }
        }
    }
}
