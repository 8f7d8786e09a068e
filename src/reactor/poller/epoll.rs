//! Linux backend: level-triggered `epoll` with an `eventfd` waker.
//!
//! A socket that still has unread data, or still has room to write, is
//! reported again on every wait until its filters change.

use super::common::{Filters, Waker};
use super::platform::sys_read;
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Token of the eventfd. Slab indices never reach it.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct EpollPoller {
    epoll: RawFd,

    /// Raw events, sized to the configured event capacity.
    events: Vec<epoll_event>,

    /// Owns the eventfd, shared with shutdown handles.
    waker: Arc<Waker>,
}

impl EpollPoller {
    /// Creates the epoll instance and registers the eventfd as a
    /// permanent wake source.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let waker = Arc::new(Waker(eventfd));

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
            waker,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, filters: Filters) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, filters)
    }

    /// Update the filters of an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: usize, filters: Filters) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, filters)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: usize, filters: Filters) -> io::Result<()> {
        let mut flags = EPOLLRDHUP;

        if filters.read {
            flags |= EPOLLIN;
        }
        if filters.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Waits for readiness and fills `events`, one entry per token.
    ///
    /// `None` waits without limit. A timeout is rounded up to whole
    /// milliseconds so a deadline is never woken for early. An interrupted
    /// wait returns `Ok` with no events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|t| t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                let mut buf = [0u8; 8];
                let _ = sys_read(self.waker.0, &mut buf);
                continue;
            }

            let token = ev.u64 as usize;
            let bits = ev.events;

            let readable = bits & ((EPOLLIN | EPOLLHUP | EPOLLRDHUP) as u32) != 0;
            let writable = bits & (EPOLLOUT as u32) != 0;
            let error = bits & (EPOLLERR as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
                e.error |= error;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                    error,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
