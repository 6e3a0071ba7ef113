//! The mirrored byte queue backing each connection.

use std::cmp;
use std::slice;

use crate::os::{map_ring, unmap_ring};
use crate::{page_size, Error, Input, Operation, Result};

/// Fixed-size FIFO byte queue with sequential address mapping.
///
/// This uses a mirrored mapping scheme. For a buffer of size `N`, the
/// address range `0..N` maps the same physical page as the range `N..2*N`.
/// This guarantees that both the filled region and the free region may
/// always be addressed as a single contiguous slice, no matter where the
/// queue has wrapped. The capacity is exactly one system page.
///
/// Bytes become visible to the consumer by *committing*: the kernel (or an
/// in-process producer) writes into [`avail_slice`] and then accounts for
/// the write with [`commit_push`]; the consumer reads from [`slice`] and
/// accounts for the read with [`commit_pop`].
///
/// # Example
///
/// ```
/// # fn main() -> echod::Result<()> {
/// let mut buf = echod::RingBuffer::new()?;
/// assert_eq!(buf.push(b"echo"), 4);
/// assert_eq!(buf.slice(), b"echo");
/// buf.commit_pop(4)?;
/// assert!(buf.is_empty());
/// # Ok(())
/// # }
/// ```
///
/// [`avail_slice`]: #method.avail_slice
/// [`slice`]: #method.slice
/// [`commit_push`]: #method.commit_push
/// [`commit_pop`]: #method.commit_pop
#[derive(Debug)]
pub struct RingBuffer {
    ptr: *mut u8,
    size: usize,
    pos: u16,
    len: u16,
}

// The buffer exclusively owns its mapping; nothing else aliases the pages.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Allocates a one-page buffer backed by an anonymous memory file.
    ///
    /// The allocation occupies double the space in the virtual memory
    /// table, but the physical memory usage stays at one page.
    pub fn new() -> Result<Self> {
        let size = page_size();
        if size > usize::from(u16::MAX) {
            return Err(Error::input(Operation::RingAllocate, Input::InvalidSize));
        }
        unsafe {
            let ptr = map_ring(size)?;
            ptr.write_bytes(0, size);
            Ok(Self {
                ptr,
                size,
                pos: 0,
                len: 0,
            })
        }
    }

    /// Gets the number of bytes the buffer has space for in total.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Gets the number of filled bytes waiting to be consumed.
    #[inline]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Gets the offset of the head of the filled region.
    #[inline]
    pub fn pos(&self) -> usize {
        usize::from(self.pos)
    }

    /// Tests if all filled bytes have been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tests if there is no room for further writes.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.size
    }

    /// Gets a read-only view of the entire filled region.
    ///
    /// The slice starts at the head of the queue and is contiguous even
    /// when the filled bytes wrap past the end of the page.
    #[inline]
    pub fn slice(&self) -> &[u8] {
        self.sized_slice(self.len())
    }

    /// Gets a read-only view of the first `max` filled bytes.
    ///
    /// The length is clamped to the filled count.
    #[inline]
    pub fn sized_slice(&self, max: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.add(self.pos()), cmp::min(self.len(), max)) }
    }

    /// Gets a writable view of the free region following the filled bytes.
    ///
    /// The slice covers every free byte and is contiguous even when the
    /// free region wraps past the end of the page. A full buffer returns
    /// an empty slice.
    #[inline]
    pub fn avail_slice(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(self.ptr.add(self.pos() + self.len()), self.size - self.len())
        }
    }

    /// Copies as much of `bytes` as fits and marks the copy filled.
    ///
    /// Returns the number of bytes copied, which is the smaller of the free
    /// space and `bytes.len()`.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = {
            let dst = self.avail_slice();
            let n = cmp::min(dst.len(), bytes.len());
            dst[..n].copy_from_slice(&bytes[..n]);
            n
        };
        self.len += n as u16;
        n
    }

    /// Marks `n` bytes of the free region as filled without copying.
    ///
    /// Used after the kernel has already written into [`avail_slice`].
    /// Fails with `NotEnoughSpace` when `n` exceeds the free space, leaving
    /// the counters unchanged.
    ///
    /// [`avail_slice`]: #method.avail_slice
    pub fn commit_push(&mut self, n: usize) -> Result<()> {
        if n > self.size - self.len() {
            return Err(Error::input(Operation::RingPush, Input::NotEnoughSpace));
        }
        self.len += n as u16;
        Ok(())
    }

    /// Releases `n` filled bytes from the head of the queue.
    ///
    /// Used after the kernel has already read from [`slice`]. Fails with
    /// `NotEnoughSpace` when `n` exceeds the filled count, leaving the
    /// counters unchanged.
    ///
    /// [`slice`]: #method.slice
    pub fn commit_pop(&mut self, n: usize) -> Result<()> {
        if n > self.len() {
            return Err(Error::input(Operation::RingPop, Input::NotEnoughSpace));
        }
        self.pos = ((self.pos() + n) % self.size) as u16;
        self.len -= n as u16;
        Ok(())
    }

    /// Drops all filled bytes, keeping the head position.
    ///
    /// A cleared buffer has an empty [`slice`] and a full-capacity
    /// [`avail_slice`] starting at the current head. Any head offset is
    /// legal for an empty buffer, so the position is not rewound.
    ///
    /// [`slice`]: #method.slice
    /// [`avail_slice`]: #method.avail_slice
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe { unmap_ring(self.ptr, self.size) }.unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::RingBuffer;
    use crate::Operation;
    use std::io::ErrorKind;

    #[test]
    fn fresh_state() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        let cap = buf.capacity();
        assert_eq!(buf.pos(), 0);
        assert_eq!(buf.len(), 0);
        assert!(buf.slice().is_empty());
        assert_eq!(buf.avail_slice().len(), cap);
    }

    #[test]
    fn push_fill_drain() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        let cap = buf.capacity();

        assert_eq!(buf.push(b"something to be written"), 23);
        assert_eq!(buf.slice(), b"something to be written");
        assert_eq!(buf.avail_slice().len(), cap - 23);
        buf.commit_pop(23).expect("failed to pop");
        assert_eq!(buf.pos(), 23);
        assert_eq!(buf.len(), 0);

        let fill = vec![b'A'; cap];
        assert_eq!(buf.push(&fill), cap);
        assert_eq!(buf.slice(), &fill[..]);
        assert!(buf.is_full());
        assert!(buf.avail_slice().is_empty());
        assert_eq!(buf.push(b"something to be written"), 0);

        buf.commit_pop(cap / 2).expect("failed to pop");
        assert_eq!(buf.pos(), (23 + cap / 2) % cap);
        assert_eq!(buf.len(), cap / 2);
        buf.commit_pop(cap / 2).expect("failed to pop");
        assert_eq!(buf.pos(), 23);
        assert!(buf.slice().is_empty());
        // the freed region still holds the old fill bytes
        assert!(buf.avail_slice().iter().all(|&b| b == b'A'));
    }

    #[test]
    fn wrap() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        // pick some bytes that won't fit evenly in the capacity
        let bytes = b"anthropomorphologically";
        let n = buf.capacity() / bytes.len();
        for _ in 0..n {
            assert_eq!(buf.push(bytes), bytes.len());
        }
        assert_eq!(buf.len(), n * bytes.len());
        buf.commit_pop((n - 1) * bytes.len()).expect("failed to pop");
        assert_eq!(buf.len(), bytes.len());
        assert_eq!(buf.push(bytes), bytes.len());

        // the filled region now spans the wrap point yet reads contiguously
        let cmp = b"anthropomorphologicallyanthropomorphologically";
        assert_eq!(buf.sized_slice(cmp.len()), &cmp[..]);
    }

    #[test]
    fn mirrored_halves() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        let cap = buf.capacity();
        buf.commit_push(cap - 2).expect("failed to push");
        buf.commit_pop(cap - 2).expect("failed to pop");
        assert_eq!(buf.pos(), cap - 2);

        // the free region starts two bytes from the end of the page, so the
        // tail of this write lands in the second mapping
        buf.avail_slice()[..4].copy_from_slice(b"wrap");
        buf.commit_push(4).expect("failed to push");
        assert_eq!(buf.slice(), b"wrap");

        // after popping past the boundary, the head reads the same bytes
        // back through the first mapping
        buf.commit_pop(2).expect("failed to pop");
        assert_eq!(buf.pos(), 0);
        assert_eq!(buf.slice(), b"ap");
    }

    #[test]
    fn commit_bounds() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        assert_eq!(buf.push(b"abc"), 3);

        let err = buf.commit_pop(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.operation(), Operation::RingPop);
        assert_eq!(buf.pos(), 0);
        assert_eq!(buf.len(), 3);

        let free = buf.capacity() - 3;
        let err = buf.commit_push(free + 1).unwrap_err();
        assert_eq!(err.operation(), Operation::RingPush);
        assert_eq!(buf.len(), 3);

        buf.commit_push(free).expect("failed to push");
        assert!(buf.is_full());
        assert!(buf.commit_push(1).is_err());
    }

    #[test]
    fn clear_keeps_position() {
        let mut buf = RingBuffer::new().expect("failed to create ring");
        buf.push(b"hello");
        buf.commit_pop(2).expect("failed to pop");
        buf.clear();
        assert_eq!(buf.pos(), 2);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.avail_slice().len(), buf.capacity());

        buf.push(b"yo");
        assert_eq!(buf.slice(), b"yo");
        assert_eq!(buf.pos(), 2);
    }
}
