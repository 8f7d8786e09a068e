use crate::reactor::poller::platform::{
    sys_close, sys_connect, sys_peername, sys_recv, sys_send, sys_socket,
    sys_socket_error, sys_sockname,
};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

/// A non-blocking TCP stream.
///
/// A stream is either connecting or connected; which one is tracked by the
/// owner (see [`Connection`](crate::Connection)), not by the stream.
#[derive(Debug)]
pub struct TcpStream {
    fd: RawFd,
}

impl TcpStream {
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Starts a non-blocking connection to `addr`.
    ///
    /// Only socket creation failures are returned as `Err`. The connect call
    /// itself normally reports `EINPROGRESS`; any other error it reports
    /// synchronously is handed back next to the stream, so the caller can
    /// surface it through the same path as an asynchronous failure.
    pub fn connect(addr: SocketAddr) -> io::Result<(Self, Option<io::Error>)> {
        let stream = Self {
            fd: sys_socket(&addr)?,
        };

        match sys_connect(stream.fd, &addr) {
            Ok(()) => Ok((stream, None)),

            Err(err)
                if err.raw_os_error() == Some(libc::EINPROGRESS)
                    || err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                Ok((stream, None))
            }

            Err(err) => Ok((stream, Some(err))),
        }
    }

    /// Reads and clears the pending socket error.
    ///
    /// After connect readiness, `None` means the connection is established.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        sys_socket_error(self.fd)
    }

    /// Reads up to `buffer.len()` bytes. `Ok(0)` is end of stream.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        sys_recv(self.fd, buffer)
    }

    /// Writes as much of `buffer` as the socket accepts right now.
    pub fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        sys_send(self.fd, buffer)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.fd)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::TcpStream;
    use crate::net::TcpListener;

    use std::io::{self, Read, Write};
    use std::time::{Duration, Instant};

    fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match f() {
                Ok(v) => return v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_nonblocking_stream_exchanges_bytes_with_std_peer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let (stream, sync_err) = TcpStream::connect(addr).unwrap();
        assert!(sync_err.is_none());

        let (mut peer, _) = listener.accept().unwrap();

        assert!(retry(|| stream.take_error()).is_none());
        assert_eq!(retry(|| stream.peer_addr()), addr);

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(retry(|| stream.write(b"ping")), 4);
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        peer.write_all(b"pong").unwrap();
        drop(peer);

        assert_eq!(retry(|| stream.read(&mut buf)), 4);
        assert_eq!(&buf[..4], b"pong");
        assert_eq!(retry(|| stream.read(&mut buf)), 0);
    }

    #[test]
    fn test_listener_accept_would_block_then_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();

        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let client = std::net::TcpStream::connect(addr).unwrap();
        let (stream, peer) = retry(|| listener.accept());

        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(stream.local_addr().unwrap(), addr);
    }
}
