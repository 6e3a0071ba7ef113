//! Types for working with ring, table, and submission errors.

use std::{fmt, io};

/// A specialized `Result` type for echo-server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for buffer mapping, connection, and io_uring failures.
///
/// Every error records the [`Operation`] that was being attempted along
/// with the underlying cause: either an OS-level `std::io::Error` or a
/// domain [`Input`] condition such as a commit that exceeds the space the
/// buffer has left.
///
/// [`Operation`]: enum.Operation.html
/// [`Input`]: enum.Input.html
#[non_exhaustive]
pub struct Error {
    repr: Repr,
    op: Operation,
}

enum Repr {
    Io(io::Error),
    Input(Input),
}

impl Error {
    /// Returns an error that wraps a `std::io::Error` along with an [`Operation`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::ErrorKind;
    /// use echod::{Error, Operation};
    ///
    /// println!("I/O error: {:?}", Error::io(
    ///     Operation::RingAllocate,
    ///     ErrorKind::OutOfMemory.into(),
    /// ));
    /// ```
    ///
    /// [`Operation`]: enum.Operation.html
    pub fn io(op: Operation, err: io::Error) -> Self {
        Self {
            repr: Repr::Io(err),
            op,
        }
    }

    /// Returns an error that wraps an [`Input`] condition along with an [`Operation`].
    ///
    /// # Examples
    ///
    /// ```
    /// use echod::{Error, Operation, Input};
    ///
    /// println!("input error: {:?}", Error::input(
    ///     Operation::RingPush,
    ///     Input::NotEnoughSpace,
    /// ));
    /// ```
    ///
    /// [`Input`]: enum.Input.html
    /// [`Operation`]: enum.Operation.html
    pub fn input(op: Operation, input: Input) -> Self {
        Self {
            repr: Repr::Input(input),
            op,
        }
    }

    /// Returns an error representing the last OS error which occurred.
    ///
    /// This reads the value of `errno` and returns a corresponding instance
    /// of `Error` for the error code.
    pub fn last_os_error(op: Operation) -> Self {
        Self::io(op, io::Error::last_os_error())
    }

    /// Returns the OS error that this error represents (if any).
    ///
    /// If this `Error` was constructed via `last_os_error`, then this
    /// function will return `Some`, otherwise it will return `None`.
    pub fn raw_os_error(&self) -> Option<i32> {
        if let Repr::Io(e) = &self.repr {
            e.raw_os_error()
        } else {
            None
        }
    }

    /// Returns the corresponding `std::io::ErrorKind` for this error.
    pub fn kind(&self) -> io::ErrorKind {
        match self.repr {
            Repr::Io(ref err) => err.kind(),
            Repr::Input(_) => io::ErrorKind::InvalidInput,
        }
    }

    /// Returns the [`Operation`] that caused the error.
    ///
    /// [`Operation`]: enum.Operation.html
    pub fn operation(&self) -> Operation {
        self.op
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.repr {
            Repr::Io(ref err) => Some(err),
            Repr::Input(_) => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (field, value) = match self.repr {
            Repr::Io(ref err) => ("io", err as &dyn fmt::Debug),
            Repr::Input(ref input) => ("input", input as &dyn fmt::Debug),
        };
        fmt.debug_struct("Error")
            .field("op", &self.op)
            .field("kind", &self.kind())
            .field(field, value)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.repr {
            Repr::Io(ref err) => err as &dyn fmt::Display,
            Repr::Input(ref input) => input as &dyn fmt::Display,
        };
        write!(fmt, "failed to {}, {}", self.op.as_str(), value)
    }
}

/// A list specifying general categories of erroneous operations.
///
/// This list is intended to grow over time and it is not recommended to
/// exhaustively match against it.
///
/// It is used with the [`Error`] type.
///
/// [`Error`]: struct.Error.html
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Operation {
    /// The backing memory file descriptor failed to open or resize.
    MemoryFd,
    /// The full address space for a ring could not be reserved.
    RingAllocate,
    /// The mapping for the first half of the ring failed.
    RingPrimary,
    /// The mapping for the second half of the ring failed.
    RingSecondary,
    /// The full address space for a ring could not be released.
    RingDeallocate,
    /// Bytes could not be committed into the ring's free region.
    RingPush,
    /// Bytes could not be released from the ring's filled region.
    RingPop,
    /// A connection could not be registered in the table.
    ConnAdd,
    /// The listen socket could not be opened or bound.
    Listen,
    /// The submission/completion ring could not be created.
    UringSetup,
    /// A submission entry could not be queued.
    UringPush,
    /// Queued submission entries could not be handed to the kernel.
    UringSubmit,
}

impl Operation {
    /// Returns a display message fragment describing the `Operation` type.
    ///
    /// The result of `as_str` is used to `Display` the `Operation`.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Operation::MemoryFd => "open memory fd",
            Operation::RingAllocate => "allocate full ring",
            Operation::RingPrimary => "map ring first half",
            Operation::RingSecondary => "map ring second half",
            Operation::RingDeallocate => "deallocate full ring",
            Operation::RingPush => "commit bytes into ring",
            Operation::RingPop => "release bytes from ring",
            Operation::ConnAdd => "register connection",
            Operation::Listen => "open listen socket",
            Operation::UringSetup => "create submission ring",
            Operation::UringPush => "queue submission entry",
            Operation::UringSubmit => "submit queued entries",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// A list specifying conditions where the state of a buffer or table cannot
/// satisfy the requested operation.
///
/// This list is intended to grow over time and it is not recommended to
/// exhaustively match against it.
///
/// It is used with the [`Error`] type.
///
/// [`Error`]: struct.Error.html
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Input {
    /// The commit size exceeds what the buffer currently has room for.
    NotEnoughSpace,
    /// Every connection slot is occupied.
    ConnectionsLimitReached,
    /// The requested size cannot be tracked by the buffer counters.
    InvalidSize,
}

impl Input {
    /// Returns a display message fragment describing the `Input` type.
    ///
    /// The result of `as_str` is used to `Display` the `Input`.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Input::NotEnoughSpace => "not enough space",
            Input::ConnectionsLimitReached => "connection limit reached",
            Input::InvalidSize => "invalid size",
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}
