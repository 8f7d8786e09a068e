use super::platform::{sys_close, sys_write};

use std::os::fd::RawFd;

/// Readiness filters as understood by the OS poller.
///
/// The multiplexer folds its richer [`Interest`](crate::Interest) mask
/// down to these two bits: accept and read readiness are both "readable",
/// connect completion and write readiness are both "writable".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Filters {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

/// Handle used to interrupt a blocking poll from another thread.
///
/// Wraps the descriptor the poller listens on for wake-ups (an `eventfd`
/// on Linux, the write end of a pipe on macOS). The descriptor is owned by
/// the waker and closed when the last reference goes away, so a handle that
/// outlives the poller never writes into a recycled descriptor.
#[derive(Debug)]
pub(crate) struct Waker(pub(crate) RawFd);

impl Waker {
    /// Wakes the poller.
    ///
    /// Writes an 8-byte counter increment; a full wake buffer already
    /// guarantees a pending wake-up, so the result is ignored.
    pub(crate) fn wake(&self) {
        let buf = 1u64.to_ne_bytes();
        let _ = sys_write(self.0, &buf);
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}
