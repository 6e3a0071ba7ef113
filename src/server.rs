//! The completion-driven socket multiplexer.
//!
//! One io_uring instance drives every socket: a re-armed `accept` on the
//! listener plus, per connection, a strictly alternating recv/send cycle.
//! At most one operation is ever in flight for a given connection, so each
//! ring buffer has exactly one producer or consumer at any moment and the
//! commit calls need no synchronization.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

use io_uring::{opcode, squeue, types, IoUring};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::conn::ConnTable;
use crate::{Error, Operation, Result};

/// Capacity of the submission and completion queues.
const RING_ENTRIES: u32 = 1024;

/// Most completions harvested in one `handle_updates` pass.
const CQ_BATCH: usize = 1024;

/// Listen backlog for the accept socket.
const LISTEN_BACKLOG: i32 = 1024;

/// What a completion refers to, carried through the kernel as user data.
///
/// The tag sits in the upper half of the 64-bit word and the payload in the
/// lower half, so every variant round-trips bit-for-bit through the
/// completion queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    /// Accept on the listening socket.
    Accept(RawFd),
    /// Receive into the handle's free region.
    Recv(u32),
    /// Send from the handle's filled region.
    Send(u32),
}

const TAG_SHIFT: u32 = 32;
const TAG_ACCEPT: u64 = 0;
const TAG_RECV: u64 = 1;
const TAG_SEND: u64 = 2;

impl Op {
    fn token(self) -> u64 {
        match self {
            Op::Accept(sock) => (TAG_ACCEPT << TAG_SHIFT) | u64::from(sock as u32),
            Op::Recv(id) => (TAG_RECV << TAG_SHIFT) | u64::from(id),
            Op::Send(id) => (TAG_SEND << TAG_SHIFT) | u64::from(id),
        }
    }

    fn from_token(token: u64) -> Option<Self> {
        let payload = token as u32;
        match token >> TAG_SHIFT {
            TAG_ACCEPT => Some(Op::Accept(payload as RawFd)),
            TAG_RECV => Some(Op::Recv(payload)),
            TAG_SEND => Some(Op::Send(payload)),
            _ => None,
        }
    }
}

/// Single-threaded TCP echo server over one io_uring instance.
///
/// Every byte a client sends transits that client's ring buffer between a
/// producing `recv` completion and a consuming `send` completion, so bytes
/// are echoed back in arrival order. Partial reads and writes fall out of
/// the commit accounting: the next cycle simply resubmits with the new
/// filled or free region.
pub struct Server {
    uring: IoUring,
    listener: TcpListener,
    conns: ConnTable,
}

impl Server {
    /// Binds the listen socket and prepares the completion ring.
    pub fn bind(addr: SocketAddrV4) -> Result<Self> {
        let listener = listen(addr).map_err(|e| Error::io(Operation::Listen, e))?;
        let uring = IoUring::new(RING_ENTRIES).map_err(|e| Error::io(Operation::UringSetup, e))?;
        let conns = ConnTable::new()?;
        Ok(Self {
            uring,
            listener,
            conns,
        })
    }

    /// The address the listen socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Drives accept/recv/send completions until a fatal error.
    pub fn run(&mut self) -> Result<()> {
        self.submit_accept()?;
        loop {
            // flush queued submissions, then sleep until a completion lands
            self.uring
                .submit_and_wait(1)
                .map_err(|e| Error::io(Operation::UringSubmit, e))?;
            self.handle_updates()?;
        }
    }

    /// Harvests one batch of completions and dispatches each in kernel
    /// delivery order.
    pub fn handle_updates(&mut self) -> Result<()> {
        let mut handled = 0;
        while handled < CQ_BATCH {
            let cqe = match self.uring.completion().next() {
                Some(cqe) => cqe,
                None => break,
            };
            handled += 1;

            let res = cqe.result();
            match Op::from_token(cqe.user_data()) {
                Some(Op::Accept(_)) => self.on_accept(res)?,
                Some(Op::Recv(id)) => self.on_recv(id, res)?,
                Some(Op::Send(id)) => self.on_send(id, res)?,
                None => warn!(token = cqe.user_data(), "completion with unknown token"),
            }
        }
        Ok(())
    }

    fn on_accept(&mut self, res: i32) -> Result<()> {
        if res <= 0 {
            if res < 0 {
                warn!(err = %io::Error::from_raw_os_error(-res), "accept failed");
            }
            return Ok(());
        }

        let sock = res as RawFd;
        match self.conns.add(sock) {
            Ok(id) => {
                debug!(id, sock, "connection accepted");
                self.submit_recv(id)?;
            }
            Err(err) => {
                warn!(%err, sock, "dropping connection");
                unsafe {
                    libc::close(sock);
                }
            }
        }
        self.submit_accept()
    }

    fn on_recv(&mut self, id: u32, res: i32) -> Result<()> {
        if res <= 0 {
            if res < 0 {
                debug!(id, err = %io::Error::from_raw_os_error(-res), "recv failed");
            } else {
                debug!(id, "peer closed");
            }
            self.conns.remove(id);
            return Ok(());
        }
        // the kernel never reports more bytes than the slice it was handed
        self.conns.buf_mut(id).commit_push(res as usize)?;
        self.submit_send(id)
    }

    fn on_send(&mut self, id: u32, res: i32) -> Result<()> {
        if res <= 0 {
            if res < 0 {
                debug!(id, err = %io::Error::from_raw_os_error(-res), "send failed");
            }
            self.conns.remove(id);
            return Ok(());
        }
        self.conns.buf_mut(id).commit_pop(res as usize)?;
        self.submit_recv(id)
    }

    fn submit_accept(&mut self) -> Result<()> {
        let sock = self.listener.as_raw_fd();
        // the peer address is discarded, so no sockaddr storage is passed
        let entry = opcode::Accept::new(types::Fd(sock), ptr::null_mut(), ptr::null_mut())
            .build()
            .user_data(Op::Accept(sock).token());
        self.push_entry(&entry)
    }

    fn submit_recv(&mut self, id: u32) -> Result<()> {
        let sock = self.conns.sock(id);
        let buf = self.conns.buf_mut(id).avail_slice();
        let (buf_ptr, buf_len) = (buf.as_mut_ptr(), buf.len() as u32);
        let entry = opcode::Recv::new(types::Fd(sock), buf_ptr, buf_len)
            .build()
            .user_data(Op::Recv(id).token());
        self.push_entry(&entry)
    }

    fn submit_send(&mut self, id: u32) -> Result<()> {
        let sock = self.conns.sock(id);
        let buf = self.conns.buf_mut(id).slice();
        let (buf_ptr, buf_len) = (buf.as_ptr(), buf.len() as u32);
        let entry = opcode::Send::new(types::Fd(sock), buf_ptr, buf_len)
            .build()
            .user_data(Op::Send(id).token());
        self.push_entry(&entry)
    }

    /// Queues one submission entry, flushing to the kernel and retrying
    /// once if the submission queue is full.
    fn push_entry(&mut self, entry: &squeue::Entry) -> Result<()> {
        // SAFETY: the buffers an entry points into live in the connection
        // table and are left untouched until the entry's completion is
        // reaped.
        unsafe {
            if self.uring.submission().push(entry).is_ok() {
                return Ok(());
            }
        }
        self.uring
            .submit()
            .map_err(|e| Error::io(Operation::UringSubmit, e))?;
        unsafe {
            self.uring.submission().push(entry).map_err(|_| {
                Error::io(
                    Operation::UringPush,
                    io::Error::new(io::ErrorKind::Other, "submission queue full"),
                )
            })
        }
    }
}

fn listen(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from(addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
