//! Connection driver: one handler per readiness operation.
//!
//! Handlers run to completion on the loop thread and never block. A fault on
//! one connection is logged and closes that connection only; nothing a
//! handler does can fail the loop.

use crate::config::Config;
use crate::connection::{CloseReason, ClosedConnection, Connection, ConnectionId, Role};
use crate::error::Error;
use crate::payload;
use crate::reactor::{Interest, Multiplexer, Token};

use std::io;
use tracing::{debug, info, warn};

/// Receives each summary the moment its connection closes.
pub(crate) type CloseSink = Box<dyn FnMut(ClosedConnection) + Send>;

pub(crate) struct Driver {
    /// Bounded buffer every read goes through.
    buffer: Vec<u8>,

    response: Vec<u8>,
    user_agent: String,
    max_inbound: usize,

    next_id: u64,

    /// Summaries kept for the caller while no sink is installed.
    closed: Vec<ClosedConnection>,
    sink: Option<CloseSink>,
}

impl Driver {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            buffer: vec![0u8; config.read_buffer_size],
            response: payload::encode(&config.response),
            user_agent: config.user_agent.clone(),
            max_inbound: config.max_inbound_bytes,
            next_id: 0,
            closed: Vec::new(),
            sink: None,
        }
    }

    pub(crate) fn next_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    /// The client request for `host`.
    pub(crate) fn request(&self, host: &str) -> Vec<u8> {
        payload::request(host, &self.user_agent)
    }

    /// Summaries of every connection closed since the last call.
    pub(crate) fn take_closed(&mut self) -> Vec<ClosedConnection> {
        std::mem::take(&mut self.closed)
    }

    /// Routes every later summary to `sink` and hands it the ones kept so far.
    pub(crate) fn set_sink(&mut self, mut sink: CloseSink) {
        for closed in self.closed.drain(..) {
            sink(closed);
        }

        self.sink = Some(sink);
    }

    pub(crate) fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Completes an outbound connect.
    pub(crate) fn on_connectable(&mut self, mux: &mut Multiplexer<Connection>, token: Token) {
        let Some(connection) = mux.get_mut(token) else {
            return;
        };

        let Some(target) = connection.target() else {
            return;
        };

        let outcome = match connection.take_pending_error() {
            Some(err) => Err(err),
            None => match connection.stream() {
                Some(stream) => match stream.take_error() {
                    Ok(None) => stream.peer_addr(),
                    Ok(Some(err)) | Err(err) => Err(err),
                },
                None => return,
            },
        };

        let peer = match outcome {
            Ok(peer) => peer,
            Err(source) => {
                self.fail(mux, token, Error::Connect {
                    peer: target,
                    source,
                });
                return;
            }
        };

        connection.establish(peer);
        info!(
            id = %connection.id(),
            host = connection.host().unwrap_or_default(),
            %peer,
            "connected"
        );

        if let Err(err) = mux.update_interest(token, Interest::WRITE) {
            self.fail(mux, token, err);
        }
    }

    /// Accepts one pending connection on a listening socket.
    ///
    /// The listener stays registered whatever happens to the accepted socket.
    pub(crate) fn on_acceptable(&mut self, mux: &mut Multiplexer<Connection>, token: Token) {
        let accepted = match mux.get(token).and_then(Connection::listener) {
            Some(listener) => listener.accept(),
            None => return,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) if is_transient(&err) || err.kind() == io::ErrorKind::ConnectionAborted => {
                return;
            }
            Err(err) => {
                warn!(%token, error = %err, "accept failed");
                return;
            }
        };

        let id = self.next_id();
        let connection = Connection::accepted(id, stream, peer, self.response.clone());

        match mux.register(connection, Interest::READ | Interest::WRITE) {
            Ok(accepted) => info!(%id, %peer, token = %accepted, "accepted"),
            Err(err) => warn!(%id, %peer, error = %err, "could not register accepted connection"),
        }
    }

    /// Writes as much of the pending outbound payload as the socket takes.
    ///
    /// Write interest stays armed until the payload is drained, then the
    /// mask narrows to read only.
    pub(crate) fn on_writable(&mut self, mux: &mut Multiplexer<Connection>, token: Token) {
        let Some(connection) = mux.get_mut(token) else {
            return;
        };

        let pending = connection.pending_outbound();
        let result = match connection.stream() {
            Some(_) if pending.is_empty() => Ok(0),
            Some(stream) => stream.write(pending),
            None => return,
        };

        let written = match result {
            Ok(0) if !connection.pending_outbound().is_empty() => {
                let peer = connection.remote();
                self.fail(mux, token, Error::Io {
                    peer,
                    op: "write",
                    source: io::ErrorKind::WriteZero.into(),
                });
                return;
            }
            Ok(n) => n,
            Err(err) if is_transient(&err) => return,
            Err(source) => {
                let peer = connection.remote();
                self.fail(mux, token, Error::Io {
                    peer,
                    op: "write",
                    source,
                });
                return;
            }
        };

        let drained = connection.advance_written(written);
        info!(
            id = %connection.id(),
            peer = ?connection.remote(),
            bytes = written,
            remaining = connection.pending_outbound().len(),
            "wrote"
        );

        if drained {
            if let Err(err) = mux.update_interest(token, Interest::READ) {
                self.fail(mux, token, err);
            }
        }
    }

    /// Performs one read; end of stream closes the connection.
    pub(crate) fn on_readable(&mut self, mux: &mut Multiplexer<Connection>, token: Token) {
        let Some(connection) = mux.get_mut(token) else {
            return;
        };

        let result = match connection.stream() {
            Some(stream) => stream.read(&mut self.buffer),
            None => return,
        };

        match result {
            Ok(0) => {
                info!(
                    id = %connection.id(),
                    peer = ?connection.remote(),
                    bytes = connection.inbound().len(),
                    text = %payload::decode(connection.inbound()),
                    "received"
                );
                self.close(mux, token, CloseReason::EndOfStream);
            }
            Ok(n) => {
                if let Err(err) = connection.accumulate(&self.buffer[..n], self.max_inbound) {
                    self.fail(mux, token, err);
                    return;
                }
                info!(id = %connection.id(), bytes = n, "read");
            }
            Err(err) if is_transient(&err) => {}
            Err(source) => {
                let peer = connection.remote();
                self.fail(mux, token, Error::Io {
                    peer,
                    op: "read",
                    source,
                });
            }
        }
    }

    /// Tears down a connect that missed its deadline.
    pub(crate) fn expire(&mut self, mux: &mut Multiplexer<Connection>, token: Token) {
        let Some(connection) = mux.get(token) else {
            return;
        };

        if connection.role() != Role::Connecting {
            return;
        }

        let (Some(peer), Some(after)) = (connection.target(), connection.connect_timeout()) else {
            return;
        };

        self.fail(mux, token, Error::ConnectTimeout { peer, after });
    }

    /// Logs a fault and closes the connection it belongs to.
    pub(crate) fn fail(&mut self, mux: &mut Multiplexer<Connection>, token: Token, err: Error) {
        if let Some(connection) = mux.get(token) {
            warn!(
                id = %connection.id(),
                host = connection.host().unwrap_or_default(),
                peer = ?connection.remote(),
                error = %err,
                "connection failed"
            );
        }

        self.close(mux, token, CloseReason::Failed(err));
    }

    /// Deregisters the connection, then closes its socket.
    pub(crate) fn close(
        &mut self,
        mux: &mut Multiplexer<Connection>,
        token: Token,
        reason: CloseReason,
    ) {
        let connection = match mux.deregister(token) {
            Ok(connection) => connection,
            Err(err) => {
                debug!(%token, error = %err, "close of unknown registration");
                return;
            }
        };

        let closed = connection.close(reason);
        info!(id = %closed.id, peer = ?closed.peer, success = closed.is_success(), "closed");

        match self.sink.as_mut() {
            Some(sink) => sink(closed),
            None => self.closed.push(closed),
        }
    }
}

/// Would-block means no event yet; an interrupted call is retried on the next turn.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
