//! Error types for the readiness loop.
//!
//! A single [`Error`] enum covers every failure the crate reports. Only
//! [`Error::Poll`] is fatal to a running loop; every other variant is tied
//! to one connection (or to one call) and ends up either returned to the
//! caller or attached to a [`ClosedConnection`](crate::ClosedConnection).

use crate::reactor::Token;

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by the multiplexer, the connection driver and the loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Connection establishment failed at the OS level (refused, unreachable, timed out).
    #[error("connection to {peer} failed: {source}")]
    Connect {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection to {peer} not established within {after:?}")]
    ConnectTimeout { peer: SocketAddr, after: Duration },

    /// I/O fault on an established or listening socket.
    #[error("{op} failed on {}: {source}", display_peer(.peer))]
    Io {
        peer: Option<SocketAddr>,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("inbound data from {} exceeded {limit} bytes", display_peer(.peer))]
    InboundLimit {
        peer: Option<SocketAddr>,
        limit: usize,
    },

    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    #[error("no registration for {0}")]
    NotRegistered(Token),

    #[error("a registration needs a non-empty interest mask")]
    EmptyInterest,

    /// The multiplexer wait itself failed. Fatal to the loop.
    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Returns `true` for failures that happened while establishing a connection.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::ConnectTimeout { .. })
    }

    /// Returns the underlying OS error kind, when there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Resolve { source, .. }
            | Error::Bind { source, .. }
            | Error::Connect { source, .. }
            | Error::Io { source, .. }
            | Error::ConfigRead { source, .. }
            | Error::Poll(source) => Some(source.kind()),
            Error::ConnectTimeout { .. } => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }
}

fn display_peer(peer: &Option<SocketAddr>) -> String {
    match peer {
        Some(addr) => addr.to_string(),
        None => String::from("<unknown peer>"),
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_peer() {
        let peer: SocketAddr = "127.0.0.1:9527".parse().unwrap();

        let err = Error::Io {
            peer: Some(peer),
            op: "read",
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(err.to_string().starts_with("read failed on 127.0.0.1:9527"));

        let err = Error::InboundLimit {
            peer: None,
            limit: 16,
        };
        assert_eq!(
            err.to_string(),
            "inbound data from <unknown peer> exceeded 16 bytes"
        );
    }

    #[test]
    fn test_connect_failures_are_classified() {
        let peer: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let timeout = Error::ConnectTimeout {
            peer,
            after: Duration::from_secs(1),
        };

        assert!(timeout.is_connect_failure());
        assert_eq!(timeout.io_kind(), Some(io::ErrorKind::TimedOut));
        assert!(!Error::EmptyInterest.is_connect_failure());
    }
}
