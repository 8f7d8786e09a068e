use super::event::Event;
use super::interest::{Interest, Readiness, Token};
use super::poller::{Poller, Waker};
use crate::error::{Error, Result};
use crate::utils::Slab;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A socket-owning value that can be registered with a [`Multiplexer`].
///
/// The source mirrors its registered interest mask. The multiplexer is the
/// only caller of [`set_interest`](Source::set_interest), and calls it in the
/// same step that changes the OS registration, so the two never diverge.
pub trait Source: AsRawFd {
    fn interest(&self) -> Interest;

    fn set_interest(&mut self, interest: Interest);
}

/// Outcome of [`Multiplexer::wait`].
#[derive(Debug)]
pub enum Wait {
    /// Ready sockets, at most one entry per token. Empty after a wake-up
    /// or an elapsed timeout.
    Ready(Vec<(Token, Readiness)>),

    /// Nothing is registered; waiting would block forever.
    Idle,
}

struct Registration<T> {
    source: T,
    fd: RawFd,
    interest: Interest,
}

/// The readiness multiplexer.
///
/// Owns the OS poller and every registered source. A source handed to
/// [`register`](Self::register) stays owned here until
/// [`deregister`](Self::deregister) gives it back, so a socket can never be
/// closed while the poller still watches it.
///
/// Each descriptor is registered at most once: the descriptor index rejects
/// a second registration of the same socket.
pub struct Multiplexer<T> {
    poller: Poller,
    events: Vec<Event>,
    entries: Slab<Registration<T>>,
    by_fd: HashMap<RawFd, usize>,
}

impl<T: Source> Multiplexer<T> {
    /// Creates a multiplexer fetching at most `event_capacity` events per wait.
    pub fn new(event_capacity: usize) -> Result<Self> {
        let poller = Poller::new(event_capacity).map_err(Error::Poll)?;

        Ok(Self {
            poller,
            events: Vec::with_capacity(event_capacity),
            entries: Slab::new(64),
            by_fd: HashMap::new(),
        })
    }

    /// Registers `source` with an initial interest mask.
    ///
    /// Fails if the source's descriptor is already registered or the mask is
    /// empty. On failure the source is dropped, which closes its socket.
    pub fn register(&mut self, mut source: T, interest: Interest) -> Result<Token> {
        if interest.is_empty() {
            return Err(Error::EmptyInterest);
        }

        let fd = source.as_raw_fd();
        if self.by_fd.contains_key(&fd) {
            return Err(Error::AlreadyRegistered(fd));
        }

        source.set_interest(interest);

        let index = self.entries.insert(Registration {
            source,
            fd,
            interest,
        });

        if let Err(source) = self.poller.register(fd, index, interest.filters()) {
            self.entries.remove(index);
            return Err(Error::Io {
                peer: None,
                op: "register",
                source,
            });
        }

        self.by_fd.insert(fd, index);
        debug!(token = index, fd, %interest, "registered");

        Ok(Token(index))
    }

    /// Changes the interest mask of a registration in place.
    ///
    /// An empty mask deregisters the source and returns it; the caller is
    /// then responsible for closing it.
    pub fn update_interest(&mut self, token: Token, interest: Interest) -> Result<Option<T>> {
        if interest.is_empty() {
            return self.deregister(token).map(Some);
        }

        let entry = self
            .entries
            .get_mut(token.0)
            .ok_or(Error::NotRegistered(token))?;

        if entry.interest == interest {
            return Ok(None);
        }

        if entry.interest.filters() != interest.filters() {
            self.poller
                .reregister(entry.fd, token.0, interest.filters())
                .map_err(|source| Error::Io {
                    peer: None,
                    op: "reregister",
                    source,
                })?;
        }

        debug!(token = token.0, from = %entry.interest, to = %interest, "interest changed");

        entry.interest = interest;
        entry.source.set_interest(interest);

        Ok(None)
    }

    /// Removes a registration and returns its source without closing it.
    pub fn deregister(&mut self, token: Token) -> Result<T> {
        let entry = self
            .entries
            .remove(token.0)
            .ok_or(Error::NotRegistered(token))?;

        self.by_fd.remove(&entry.fd);

        if let Err(err) = self.poller.deregister(entry.fd) {
            debug!(token = token.0, fd = entry.fd, error = %err, "poller deregistration failed");
        }

        debug!(token = token.0, fd = entry.fd, "deregistered");

        Ok(entry.source)
    }

    /// Blocks until at least one registered socket is ready, the timeout
    /// elapses, or the multiplexer is woken.
    ///
    /// Returns [`Wait::Idle`] immediately when nothing is registered.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Wait> {
        if self.entries.is_empty() {
            return Ok(Wait::Idle);
        }

        self.poller
            .poll(&mut self.events, timeout)
            .map_err(Error::Poll)?;

        let ready = self
            .events
            .iter()
            .filter(|event| self.entries.contains(event.token))
            .map(|event| {
                (
                    Token(event.token),
                    Readiness {
                        readable: event.readable,
                        writable: event.writable,
                        error: event.error,
                    },
                )
            })
            .collect();

        Ok(Wait::Ready(ready))
    }

    pub fn get(&self, token: Token) -> Option<&T> {
        self.entries.get(token.0).map(|entry| &entry.source)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.entries.get_mut(token.0).map(|entry| &mut entry.source)
    }

    /// The mask currently registered with the OS poller for `token`.
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.entries.get(token.0).map(|entry| entry.interest)
    }

    /// Looks up the registration owning descriptor `fd`.
    pub fn token_of(&self, fd: RawFd) -> Option<Token> {
        self.by_fd.get(&fd).copied().map(Token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains(token.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tokens of every live registration, in ascending order.
    pub fn tokens(&self) -> Vec<Token> {
        self.entries.indices().map(Token).collect()
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.poller.waker()
    }
}

impl<T> Drop for Multiplexer<T> {
    /// Deregisters every remaining descriptor before the slab drops (and
    /// closes) the sources.
    fn drop(&mut self) {
        for &fd in self.by_fd.keys() {
            let _ = self.poller.deregister(fd);
        }
    }
}
