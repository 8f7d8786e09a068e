//! # muxloop
//!
//! **muxloop** is a single-threaded, readiness-based TCP connection manager.
//! One thread multiplexes many non-blocking sockets through the OS readiness
//! facility (epoll on Linux, kqueue on macOS) and drives each of them through
//! a small per-connection state machine:
//!
//! ```text
//! Connecting -> Established(awaiting-write) -> Established(awaiting-read) -> Closed
//! ```
//!
//! Accepted sockets start at `Established(awaiting-write)`. Each side writes
//! one fixed payload, then accumulates whatever the peer sends until end of
//! stream.
//!
//! ## Quick Start
//!
//! ```no_run
//! use muxloop::{Config, EventLoop};
//! use std::time::Duration;
//!
//! let config = Config::new().connect_timeout(Some(Duration::from_secs(5)));
//! let mut event_loop = EventLoop::new(config)?;
//!
//! event_loop.open("localhost", 9527)?;
//!
//! for closed in event_loop.run()? {
//!     match closed.error() {
//!         None => println!("{}: {}", closed.id, closed.received_text()),
//!         Some(err) => eprintln!("{}: {err}", closed.id),
//!     }
//! }
//! # Ok::<(), muxloop::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`reactor`]: the readiness multiplexer and interest masks
//! - [`net`]: non-blocking TCP listener and stream
//! - [`config`]: loop configuration
//! - [`payload`]: the fixed request and response text

mod connection;
mod driver;
mod error;
mod event_loop;
mod utils;

pub mod config;
pub mod net;
pub mod payload;
pub mod reactor;

pub use config::Config;
pub use connection::{ClosedConnection, CloseReason, Connection, ConnectionId, Phase, Role};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, EventLoopBuilder, ShutdownHandle};
pub use reactor::{Interest, Multiplexer, Op, Readiness, Source, Token, Wait};
