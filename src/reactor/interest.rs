use super::poller::Filters;

use std::fmt;
use std::ops::BitOr;

/// Identifies one registration inside a [`Multiplexer`](super::Multiplexer).
///
/// Tokens are slab indices: they are unique among live registrations but a
/// token freed by a deregistration may be handed out again later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// The set of operations a socket is registered to be notified about.
///
/// Masks combine with `|`:
///
/// ```
/// use muxloop::Interest;
///
/// let both = Interest::READ | Interest::WRITE;
/// assert!(both.contains(Interest::WRITE));
/// assert!(!both.contains(Interest::CONNECT));
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interest {
    accept: bool,
    connect: bool,
    read: bool,
    write: bool,
}

impl Interest {
    pub const NONE: Self = Self {
        accept: false,
        connect: false,
        read: false,
        write: false,
    };

    /// A listening socket has a pending connection.
    pub const ACCEPT: Self = Self {
        accept: true,
        ..Self::NONE
    };

    /// An outbound connect has completed, successfully or not.
    pub const CONNECT: Self = Self {
        connect: true,
        ..Self::NONE
    };

    pub const READ: Self = Self {
        read: true,
        ..Self::NONE
    };

    pub const WRITE: Self = Self {
        write: true,
        ..Self::NONE
    };

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }

    /// Returns `true` if every operation in `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        (self | other) == self
    }

    /// Returns `self` without the operations in `other`.
    pub fn remove(self, other: Self) -> Self {
        Self {
            accept: self.accept && !other.accept,
            connect: self.connect && !other.connect,
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }

    /// Folds the mask down to what the OS poller understands.
    pub(crate) fn filters(self) -> Filters {
        Filters {
            read: self.accept || self.read,
            write: self.connect || self.write,
        }
    }
}

impl BitOr for Interest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            accept: self.accept || rhs.accept,
            connect: self.connect || rhs.connect,
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.accept, "ACCEPT"),
            (self.connect, "CONNECT"),
            (self.read, "READ"),
            (self.write, "WRITE"),
        ];

        let mut first = true;
        for (set, name) in names {
            if set {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("NONE")?;
        }

        Ok(())
    }
}

/// One readiness operation, as dispatched by the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Connect,
    Accept,
    Read,
    Write,
}

impl Op {
    /// Dispatch order within one readiness notification.
    ///
    /// A completed connect must settle the interest mask before any read
    /// or write runs against the socket.
    pub const ORDER: [Op; 4] = [Op::Connect, Op::Accept, Op::Read, Op::Write];

    pub fn interest(self) -> Interest {
        match self {
            Op::Connect => Interest::CONNECT,
            Op::Accept => Interest::ACCEPT,
            Op::Read => Interest::READ,
            Op::Write => Interest::WRITE,
        }
    }
}

/// What the OS reported for one socket in one wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Readable, or the peer hung up.
    pub readable: bool,
    pub writable: bool,
    /// A socket error is pending.
    pub error: bool,
}

impl Readiness {
    /// Returns `true` if this readiness should run the handler for `op`
    /// given the socket's current interest.
    ///
    /// An error condition triggers every operation the socket is interested
    /// in, so the handler observes the failure instead of the socket spinning.
    pub fn triggers(self, op: Op, interest: Interest) -> bool {
        if !interest.contains(op.interest()) {
            return false;
        }

        match op {
            // A failed connect may only report a hang-up.
            Op::Connect => self.writable || self.readable || self.error,
            Op::Accept | Op::Read => self.readable || self.error,
            Op::Write => self.writable || self.error,
        }
    }

    /// The operations triggered under `interest`, in dispatch order.
    pub fn ops(self, interest: Interest) -> impl Iterator<Item = Op> {
        Op::ORDER
            .into_iter()
            .filter(move |&op| self.triggers(op, interest))
    }
}
