//! Thin wrappers over the POSIX socket calls used by the loop.
//!
//! Every wrapper converts the C return convention into an `io::Result`.
//! A would-block condition surfaces as `io::ErrorKind::WouldBlock`; deciding
//! that it means "no event yet" is left to the caller.

use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, IPPROTO_IPV6, IPV6_V6ONLY, O_NONBLOCK, SO_ERROR,
    SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, accept, bind, c_int, close, connect, fcntl,
    getpeername, getsockname, getsockopt, listen, read, recv, send, setsockopt, sockaddr,
    sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t, write,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

#[cfg(target_os = "linux")]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: c_int = 0;

fn cvt(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

fn cvt_unit(rc: c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// `read(2)` on a wake descriptor or test pipe. `Ok(0)` is end of file.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt(unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) })
}

/// Writes the buffer to a non-socket file descriptor (wake pipes, eventfd).
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt(unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) })
}

/// Receives from a connected socket.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt(unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) })
}

/// Sends on a connected socket.
///
/// A reset peer must surface as `EPIPE`, never as a process-wide `SIGPIPE`:
/// Linux passes `MSG_NOSIGNAL`, macOS sets `SO_NOSIGPIPE` at socket creation.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt(unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) })
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    cvt_unit(unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) })
}

/// Creates a non-blocking stream socket for the address family of `addr`.
pub(crate) fn sys_socket(addr: &SocketAddr) -> io::Result<RawFd> {
    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = sys_set_nonblocking(fd).and_then(|_| sys_set_nosigpipe(fd));
    if let Err(e) = configured {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

#[cfg(target_os = "macos")]
fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    sys_setsockopt(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
}

#[cfg(not(target_os = "macos"))]
fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

fn sys_setsockopt(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    cvt_unit(unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
}

pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt_unit(unsafe { bind(fd, &storage as *const _ as *const sockaddr, len) })
}

pub(crate) fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt_unit(unsafe { listen(fd, backlog) })
}

/// Accepts one pending connection and makes it non-blocking.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = sys_set_nonblocking(client_fd).and_then(|_| sys_set_nosigpipe(client_fd));
    if let Err(e) = configured {
        sys_close(client_fd);
        return Err(e);
    }

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client_fd, addr)),
        Err(e) => {
            sys_close(client_fd);
            Err(e)
        }
    }
}

pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt_unit(unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Returns the remote address of a connected socket.
///
/// Fails with `ENOTCONN` while a connect is still in progress or after it failed.
pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt_unit(unsafe { getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Initiates a connection.
///
/// On a non-blocking socket this normally fails with `EINPROGRESS`.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt_unit(unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) })
}

/// Reads and clears the pending socket error (`SO_ERROR`).
pub(crate) fn sys_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt_unit(unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    })?;

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    sys_setsockopt(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

/// Enables IPv6 dual-stack support when binding an IPv6 address.
pub(crate) fn sys_ipv6_is_necessary(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    if addr.is_ipv6() {
        sys_set_v6only(fd, false)?;
    }
    Ok(())
}

pub(crate) fn sys_set_v6only(fd: RawFd, v6only: bool) -> io::Result<()> {
    sys_setsockopt(fd, IPPROTO_IPV6, IPV6_V6ONLY, c_int::from(v6only))
}

/// Fails for any family other than `AF_INET` / `AF_INET6`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Returns the storage together with the length of the family-specific part.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_conversion_preserves_v4_and_v6() {
        let addrs: [SocketAddr; 2] = ["127.0.0.1:9527".parse().unwrap(), "[::1]:80".parse().unwrap()];

        for addr in addrs {
            let (storage, _) = socketaddr_to_storage(&addr);
            assert_eq!(sockaddr_storage_to_socketaddr(&storage).unwrap(), addr);
        }
    }

    #[test]
    fn test_read_on_empty_nonblocking_pipe_would_block() {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe() failed");
        sys_set_nonblocking(fds[0]).unwrap();

        let mut buf = [0u8; 4];
        let err = sys_read(fds[0], &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(sys_write(fds[1], b"ab").unwrap(), 2);
        assert_eq!(sys_read(fds[0], &mut buf).unwrap(), 2);

        sys_close(fds[0]);
        sys_close(fds[1]);
    }
}
