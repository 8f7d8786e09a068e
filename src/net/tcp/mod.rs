//! TCP networking implementation.
//!
//! It is split into:
//! - [`listener`]: accepting incoming TCP connections,
//! - [`stream`]: connecting, reading and writing.

pub mod listener;
pub mod stream;
