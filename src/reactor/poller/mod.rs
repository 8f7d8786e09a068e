//! OS readiness backends, selected at compile time.
//!
//! Both backends expose the same surface: `register`, `reregister` and
//! `deregister` by descriptor and token, a `poll` bounded by an optional
//! timeout, and a [`Waker`] that interrupts a blocked `poll` from another
//! thread.

pub(crate) mod common;

pub(crate) use common::{Filters, Waker};

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
