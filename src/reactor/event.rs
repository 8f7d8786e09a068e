/// An I/O event reported by the poller.
///
/// An `Event` represents raw readiness information for a registered
/// file descriptor. It is produced by the poller, merged per token so a
/// descriptor appears at most once per batch, and turned into a
/// [`Readiness`](crate::Readiness) by the multiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// Token associated with the registered file descriptor.
    ///
    /// This token is the slab index of the multiplexer registration.
    pub(crate) token: usize,

    /// The descriptor is readable, or the peer hung up.
    pub(crate) readable: bool,

    /// The descriptor is writable.
    pub(crate) writable: bool,

    /// The descriptor has a pending error.
    pub(crate) error: bool,
}
