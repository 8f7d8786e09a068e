//! macOS `kqueue`-based poller implementation.
//!
//! Mirrors the Linux `epoll` backend. Read and write readiness are separate
//! kqueue filters, so changing the filters of a descriptor deletes the ones
//! no longer wanted and adds the new ones. Wake-ups go through a
//! non-blocking pipe whose read end is registered like any other source.

use super::common::{Filters, Waker};
use super::platform::{sys_close, sys_read, sys_set_nonblocking};
use crate::reactor::event::Event;

use libc::{
    EV_ADD, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent, kqueue,
};
use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

const WAKE_TOKEN: usize = usize::MAX;

pub(crate) struct KqueuePoller {
    kqueue: RawFd,
    events: Vec<kevent>,
    /// Read end of the wake pipe.
    wake_reader: RawFd,
    waker: Arc<Waker>,
}

fn change(fd: RawFd, filter: i16, flags: u16, token: usize) -> kevent {
    kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as *mut _,
    }
}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            sys_close(kq);
            return Err(err);
        }

        let [wake_reader, wake_writer] = fds;
        let waker = Arc::new(Waker(wake_writer));

        let setup = sys_set_nonblocking(wake_reader)
            .and_then(|_| sys_set_nonblocking(wake_writer))
            .and_then(|_| {
                let event = change(wake_reader, EVFILT_READ, EV_ADD | EV_ENABLE, WAKE_TOKEN);
                submit(kq, &[event])
            });

        if let Err(err) = setup {
            sys_close(wake_reader);
            sys_close(kq);
            return Err(err);
        }

        Ok(Self {
            kqueue: kq,
            events: Vec::with_capacity(capacity.max(1)),
            wake_reader,
            waker,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub(crate) fn register(&self, fd: RawFd, token: usize, filters: Filters) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);

        if filters.read {
            changes.push(change(fd, EVFILT_READ, EV_ADD | EV_ENABLE, token));
        }
        if filters.write {
            changes.push(change(fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token));
        }

        submit(self.kqueue, &changes)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: usize, filters: Filters) -> io::Result<()> {
        // Deleting a filter that was never added reports ENOENT; ignore it.
        if !filters.read {
            let _ = submit(self.kqueue, &[change(fd, EVFILT_READ, EV_DELETE, token)]);
        }
        if !filters.write {
            let _ = submit(self.kqueue, &[change(fd, EVFILT_WRITE, EV_DELETE, token)]);
        }

        self.register(fd, token, filters)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let read = submit(self.kqueue, &[change(fd, EVFILT_READ, EV_DELETE, 0)]);
        let write = submit(self.kqueue, &[change(fd, EVFILT_WRITE, EV_DELETE, 0)]);

        // At least one of the two filters was registered.
        match (read, write) {
            (Err(err), Err(_)) => Err(err),
            _ => Ok(()),
        }
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(ptr::null());

        events.clear();

        let n = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
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
            let token = ev.udata as usize;

            if token == WAKE_TOKEN {
                let mut buf = [0u8; 64];
                while matches!(sys_read(self.wake_reader, &mut buf), Ok(n) if n > 0) {}
                continue;
            }

            let readable = ev.filter == EVFILT_READ || ev.flags & EV_EOF != 0;
            let writable = ev.filter == EVFILT_WRITE;
            let error = ev.flags & EV_ERROR != 0;

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

fn submit(kq: RawFd, changes: &[kevent]) -> io::Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let rc = unsafe {
        kevent(
            kq,
            changes.as_ptr(),
            changes.len() as i32,
            ptr::null_mut(),
            0,
            ptr::null(),
        )
    };

    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

unsafe impl Send for KqueuePoller {}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        sys_close(self.wake_reader);
        sys_close(self.kqueue);
    }
}
