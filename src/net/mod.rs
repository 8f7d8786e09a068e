//! Non-blocking TCP sockets.
//!
//! Thin owners of socket descriptors used as the handles inside connection
//! records. Every call returns immediately; a would-block condition comes
//! back as `io::ErrorKind::WouldBlock` for the caller to interpret. Each
//! type closes its descriptor on drop.

mod tcp;

pub use tcp::listener::TcpListener;
pub use tcp::stream::TcpStream;
