//! Readiness multiplexing.
//!
//! This module wraps the OS readiness mechanism (epoll on Linux, kqueue on
//! macOS) behind a [`Multiplexer`] that owns the set of watched sockets and
//! their interest masks. It holds no connection logic: it registers,
//! re-arms, deregisters and reports which sockets are ready.
//!
//! - `interest`: interest masks, readiness and dispatch order
//! - `multiplexer`: the registration set and the blocking wait
//! - `poller`: per-platform backends and raw socket calls

mod event;
mod interest;
mod multiplexer;

pub(crate) mod poller;

pub use interest::{Interest, Op, Readiness, Token};
pub use multiplexer::{Multiplexer, Source, Wait};

pub(crate) use poller::Waker;
