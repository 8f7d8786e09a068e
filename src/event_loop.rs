//! The event loop.
//!
//! An [`EventLoop`] owns one multiplexer and every connection registered with
//! it. It is driven from a single thread: [`run`](EventLoop::run) blocks in
//! the readiness wait and dispatches each ready socket to the driver.
//!
//! ```no_run
//! use muxloop::{Config, EventLoop};
//!
//! let mut event_loop = EventLoop::new(Config::default())?;
//! event_loop.open("localhost", 9527)?;
//! event_loop.open("127.0.0.1", 9527)?;
//!
//! for closed in event_loop.run()? {
//!     println!("{} -> {}", closed.id, closed.received_text());
//! }
//! # Ok::<(), muxloop::Error>(())
//! ```

use crate::config::Config;
use crate::connection::{CloseReason, ClosedConnection, Connection, ConnectionId};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::net::{TcpListener, TcpStream};
use crate::reactor::{Interest, Multiplexer, Op, Readiness, Token, Wait, Waker};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Asks a running [`EventLoop`] to stop, from any thread.
///
/// The loop closes every connection still registered with
/// [`CloseReason::Shutdown`] and returns from [`run`](EventLoop::run).
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Builder for an [`EventLoop`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use muxloop::EventLoopBuilder;
///
/// let event_loop = EventLoopBuilder::new()
///     .connect_timeout(Duration::from_secs(3))
///     .read_buffer_size(4096)
///     .build()?;
/// # Ok::<(), muxloop::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct EventLoopBuilder {
    config: Config,
}

impl EventLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(Some(timeout));
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config = self.config.read_buffer_size(size);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.event_capacity(capacity);
        self
    }

    /// Validates the configuration and creates the loop.
    pub fn build(self) -> Result<EventLoop> {
        EventLoop::new(self.config)
    }
}

/// A single-threaded readiness loop over client and server connections.
pub struct EventLoop {
    mux: Multiplexer<Connection>,
    driver: Driver,
    config: Config,

    requested: Arc<AtomicBool>,

    /// Connects whose `connect` call failed synchronously.
    deferred: VecDeque<Token>,

    /// Connect deadlines, earliest first. Entries whose connection has
    /// moved on are skipped when popped.
    deadlines: BinaryHeap<Reverse<(Instant, Token, ConnectionId)>>,
}

impl EventLoop {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            mux: Multiplexer::new(config.event_capacity)?,
            driver: Driver::new(&config),
            config,
            requested: Arc::new(AtomicBool::new(false)),
            deferred: VecDeque::new(),
            deadlines: BinaryHeap::new(),
        })
    }

    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The multiplexer and the connections it holds.
    pub fn multiplexer(&self) -> &Multiplexer<Connection> {
        &self.mux
    }

    /// Number of registered sockets, listeners included.
    pub fn len(&self) -> usize {
        self.mux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mux.is_empty()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: Arc::clone(&self.requested),
            waker: self.mux.waker(),
        }
    }

    /// Starts a non-blocking connect to `host:port` using the configured
    /// connect timeout.
    ///
    /// Returns as soon as the socket is registered. Whether the connection
    /// succeeds is only known once the loop runs.
    pub fn open(&mut self, host: &str, port: u16) -> Result<ConnectionId> {
        self.open_with_timeout(host, port, self.config.connect_timeout_duration())
    }

    /// Like [`open`](Self::open) with an explicit connect timeout.
    pub fn open_with_timeout(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<ConnectionId> {
        let target = resolve(host, port)?;

        let (stream, immediate) = TcpStream::connect(target).map_err(|source| Error::Connect {
            peer: target,
            source,
        })?;

        let id = self.driver.next_id();
        let failed_early = immediate.is_some();
        let request = self.driver.request(host);
        let connection =
            Connection::connecting(id, host, target, stream, request, timeout, immediate);
        let deadline = connection.deadline();

        let token = self.mux.register(connection, Interest::CONNECT)?;

        if failed_early {
            self.deferred.push_back(token);
        }

        if let Some(deadline) = deadline {
            self.deadlines.push(Reverse((deadline, token, id)));
        }

        info!(%id, host, peer = %target, "connecting");

        Ok(id)
    }

    /// Binds a listening socket and registers it for accepts.
    ///
    /// Returns the bound address, which carries the real port when `addr`
    /// asked for port 0.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr, self.config.backlog)
            .map_err(|source| Error::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;

        let id = self.driver.next_id();
        self.mux
            .register(Connection::listening(id, listener), Interest::ACCEPT)?;

        info!(%id, addr = %local, "listening");

        Ok(local)
    }

    /// Listens on every interface at `port` and runs until shutdown or a
    /// fatal error.
    ///
    /// A server never runs out of sockets, so summaries are not kept: they go
    /// to the sink installed with [`on_close`](Self::on_close), or are dropped
    /// once their close is logged.
    pub fn listen(&mut self, port: u16) -> Result<()> {
        self.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;

        if !self.driver.has_sink() {
            self.on_close(|_| {});
        }

        self.run().map(|_| ())
    }

    /// Hands each closed connection's summary to `sink` as soon as it closes,
    /// instead of keeping it until [`run`](Self::run) returns.
    ///
    /// Summaries already kept are passed to `sink` first.
    ///
    /// ```no_run
    /// use muxloop::{Config, EventLoop};
    ///
    /// let mut event_loop = EventLoop::new(Config::default())?;
    /// event_loop.bind("0.0.0.0:9527".parse().unwrap())?;
    /// event_loop.on_close(|closed| println!("{} -> {}", closed.id, closed.received_text()));
    /// event_loop.run()?;
    /// # Ok::<(), muxloop::Error>(())
    /// ```
    pub fn on_close<F>(&mut self, sink: F)
    where
        F: FnMut(ClosedConnection) + Send + 'static,
    {
        self.driver.set_sink(Box::new(sink));
    }

    /// Runs the loop until no socket is registered or shutdown is requested.
    ///
    /// Returns the summaries of the connections closed along the way, or
    /// nothing when a sink is installed. Only a failing readiness wait ends
    /// the loop with an error.
    pub fn run(&mut self) -> Result<Vec<ClosedConnection>> {
        info!(registered = self.mux.len(), "event loop started");

        while self.run_once()? {}

        let closed = self.driver.take_closed();
        info!(closed = closed.len(), "event loop finished");

        Ok(closed)
    }

    /// Runs a single turn: one wait, and every handler it makes ready.
    ///
    /// Returns `false` once the loop has nothing left to do. Connections
    /// closed during the turn are available through
    /// [`take_closed`](Self::take_closed).
    pub fn run_once(&mut self) -> Result<bool> {
        if self.requested.load(Ordering::Acquire) {
            self.close_all();
            return Ok(false);
        }

        while let Some(token) = self.deferred.pop_front() {
            self.driver.on_connectable(&mut self.mux, token);
        }

        let timeout = self.expire_deadlines(Instant::now());

        let ready = match self.mux.wait(timeout) {
            Ok(Wait::Ready(ready)) => ready,
            Ok(Wait::Idle) => return Ok(false),
            Err(err) => {
                error!(error = %err, "readiness wait failed");
                return Err(err);
            }
        };

        for (token, readiness) in ready {
            self.dispatch(token, readiness);
        }

        Ok(true)
    }

    /// Summaries of the connections closed since the last call, while no
    /// sink is installed.
    pub fn take_closed(&mut self) -> Vec<ClosedConnection> {
        self.driver.take_closed()
    }

    /// Runs the handlers `readiness` triggers, connect first.
    ///
    /// The mask is re-read before each operation, so a handler that narrows
    /// or drops the registration decides what runs after it.
    fn dispatch(&mut self, token: Token, readiness: Readiness) {
        for op in Op::ORDER {
            let Some(interest) = self.mux.interest(token) else {
                return;
            };

            if !readiness.triggers(op, interest) {
                continue;
            }

            match op {
                Op::Connect => self.driver.on_connectable(&mut self.mux, token),
                Op::Accept => self.driver.on_acceptable(&mut self.mux, token),
                Op::Read => self.driver.on_readable(&mut self.mux, token),
                Op::Write => self.driver.on_writable(&mut self.mux, token),
            }
        }
    }

    /// Fails every connect past its deadline and returns how long the next
    /// wait may block.
    fn expire_deadlines(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&Reverse((deadline, token, id))) = self.deadlines.peek() {
            let live = self
                .mux
                .get(token)
                .is_some_and(|connection| connection.id() == id && connection.deadline().is_some());

            if !live {
                self.deadlines.pop();
                continue;
            }

            if deadline > now {
                return Some(deadline - now);
            }

            self.deadlines.pop();
            self.driver.expire(&mut self.mux, token);
        }

        None
    }

    fn close_all(&mut self) {
        let tokens = self.mux.tokens();
        info!(remaining = tokens.len(), "shutdown requested");

        for token in tokens {
            self.driver.close(&mut self.mux, token, CloseReason::Shutdown);
        }

        self.deferred.clear();
        self.deadlines.clear();
    }
}

/// Resolves `host:port`, preferring an IPv4 address when the host has both.
fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_error = |source: io::Error| Error::Resolve {
        host: host.to_string(),
        port,
        source,
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .collect();

    debug!(host, port, candidates = addrs.len(), "resolved");

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}
