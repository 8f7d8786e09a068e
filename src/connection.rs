//! Per-socket connection records.
//!
//! A [`Connection`] is created when a connection is initiated (an outbound
//! connect, an accepted socket, or a listening socket) and lives inside the
//! multiplexer for as long as its socket is registered. Closing consumes the
//! record and drops its socket, leaving a [`ClosedConnection`] summary behind.

use crate::error::Error;
use crate::net::{TcpListener, TcpStream};
use crate::payload;
use crate::reactor::{Interest, Source};

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// Identifies a connection for the lifetime of its event loop.
///
/// Ids increase monotonically and are never reused, unlike multiplexer tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the socket of a record is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// An outbound connect is in progress.
    Connecting,
    /// A listening socket accepting inbound connections.
    Accepting,
    /// A connected stream, outbound or accepted.
    Established,
}

/// Lifecycle phase of a record.
///
/// `Closed` has no variant: a closed record no longer exists, only its
/// [`ClosedConnection`] summary does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Listening,
    Connecting,
    AwaitingWrite,
    AwaitingRead,
}

/// The socket handle: a listener, or a stream that is connecting or connected.
#[derive(Debug)]
pub(crate) enum Socket {
    Listening(TcpListener),
    Stream(TcpStream),
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Socket::Listening(listener) => listener.as_raw_fd(),
            Socket::Stream(stream) => stream.as_raw_fd(),
        }
    }
}

/// The per-socket state tracked by the event loop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    socket: Socket,

    /// Host name the caller asked for, for outbound connections.
    host: Option<String>,

    /// Address a connect was started towards.
    target: Option<SocketAddr>,

    /// Remote address, once known.
    peer: Option<SocketAddr>,

    inbound: Vec<u8>,

    /// Payload to send and how much of it the socket already took.
    outbound: Vec<u8>,
    written: usize,

    interest: Interest,
    phase: Phase,

    opened_at: Instant,

    /// Connect deadline, outbound connections only.
    deadline: Option<Instant>,

    /// Error the connect call returned synchronously, reported on the first
    /// connect readiness.
    pending_error: Option<std::io::Error>,
}

impl Connection {
    pub(crate) fn listening(id: ConnectionId, listener: TcpListener) -> Self {
        let local = listener.local_addr().ok();

        Self::new(id, Socket::Listening(listener), Phase::Listening, local)
    }

    pub(crate) fn connecting(
        id: ConnectionId,
        host: &str,
        target: SocketAddr,
        stream: TcpStream,
        request: Vec<u8>,
        timeout: Option<Duration>,
        pending_error: Option<std::io::Error>,
    ) -> Self {
        let mut connection = Self::new(id, Socket::Stream(stream), Phase::Connecting, None);
        connection.host = Some(host.to_string());
        connection.target = Some(target);
        connection.outbound = request;
        connection.deadline = timeout.and_then(|t| connection.opened_at.checked_add(t));
        connection.pending_error = pending_error;

        connection
    }

    pub(crate) fn accepted(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        response: Vec<u8>,
    ) -> Self {
        let mut connection = Self::new(
            id,
            Socket::Stream(stream),
            Phase::AwaitingWrite,
            Some(peer),
        );
        connection.outbound = response;

        connection
    }

    fn new(id: ConnectionId, socket: Socket, phase: Phase, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            socket,
            host: None,
            target: None,
            peer,
            inbound: Vec::new(),
            outbound: Vec::new(),
            written: 0,
            interest: Interest::NONE,
            phase,
            opened_at: Instant::now(),
            deadline: None,
            pending_error: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        match (&self.socket, self.phase) {
            (Socket::Listening(_), _) => Role::Accepting,
            (Socket::Stream(_), Phase::Connecting) => Role::Connecting,
            (Socket::Stream(_), _) => Role::Established,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The remote address, or the connect target while still connecting.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.peer.or(self.target)
    }

    /// Bytes accumulated so far.
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// The part of the outbound payload not yet written.
    pub fn pending_outbound(&self) -> &[u8] {
        &self.outbound[self.written..]
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// When the record was created.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(self.opened_at))
    }

    pub(crate) fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    pub(crate) fn listener(&self) -> Option<&TcpListener> {
        match &self.socket {
            Socket::Listening(listener) => Some(listener),
            _ => None,
        }
    }

    /// The stream, whether connecting or established.
    pub(crate) fn stream(&self) -> Option<&TcpStream> {
        match &self.socket {
            Socket::Stream(stream) => Some(stream),
            Socket::Listening(_) => None,
        }
    }

    pub(crate) fn take_pending_error(&mut self) -> Option<std::io::Error> {
        self.pending_error.take()
    }

    /// Moves a connecting record to `Established(awaiting-write)`.
    ///
    /// Has no effect on a record that is not connecting.
    pub(crate) fn establish(&mut self, peer: SocketAddr) {
        if self.phase != Phase::Connecting {
            return;
        }

        self.peer = Some(peer);
        self.deadline = None;
        self.phase = Phase::AwaitingWrite;
    }

    /// Records that `n` more outbound bytes were written.
    ///
    /// Returns `true` once the whole payload is out, at which point the record
    /// moves to `AwaitingRead`.
    pub(crate) fn advance_written(&mut self, n: usize) -> bool {
        self.written = (self.written + n).min(self.outbound.len());

        let drained = self.written == self.outbound.len();
        if drained {
            self.phase = Phase::AwaitingRead;
        }

        drained
    }

    /// Appends received bytes, refusing to grow past `limit`.
    pub(crate) fn accumulate(&mut self, bytes: &[u8], limit: usize) -> Result<(), Error> {
        if self.inbound.len().saturating_add(bytes.len()) > limit {
            return Err(Error::InboundLimit {
                peer: self.remote(),
                limit,
            });
        }

        self.inbound.extend_from_slice(bytes);

        Ok(())
    }

    /// Consumes the record, closing its socket.
    pub(crate) fn close(self, reason: CloseReason) -> ClosedConnection {
        let role = self.role();

        ClosedConnection {
            id: self.id,
            role,
            host: self.host,
            peer: self.peer.or(self.target),
            received: self.inbound,
            reason,
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Source for Connection {
    fn interest(&self) -> Interest {
        self.interest
    }

    fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }
}

/// Why a connection reached `Closed`.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its side and every received byte was accounted for.
    EndOfStream,

    /// Establishment failure or I/O fault.
    Failed(Error),

    /// The loop was asked to stop while the connection was still open.
    Shutdown,
}

/// Summary left behind by a closed connection.
#[derive(Debug)]
pub struct ClosedConnection {
    pub id: ConnectionId,

    /// Role of the socket when it was closed.
    pub role: Role,

    pub host: Option<String>,

    /// Remote address, or the connect target if the connect never completed.
    pub peer: Option<SocketAddr>,

    /// Everything accumulated before the close.
    pub received: Vec<u8>,

    pub reason: CloseReason,
}

impl ClosedConnection {
    /// `true` if the connection ran to end of stream.
    pub fn is_success(&self) -> bool {
        matches!(self.reason, CloseReason::EndOfStream)
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.reason {
            CloseReason::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The received bytes decoded one character per byte.
    pub fn received_text(&self) -> String {
        payload::decode(&self.received)
    }
}
